use anyhow::{Context, Result, bail};
use geo::{BoundingRect, Intersects};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiPolygon, Polygon, Rect, coord,
};
use std::path::{Path, PathBuf};

use crate::config::BoundarySpec;
use crate::osm::Location;

/// Spatial test of an extract. Points on the boundary count as inside.
#[derive(Debug, Clone)]
pub enum Boundary {
    BBox(Rect<f64>),
    Polygon {
        area: MultiPolygon<f64>,
        envelope: Rect<f64>,
    },
}

impl Boundary {
    pub fn bbox(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Boundary::BBox(Rect::new(
            coord! { x: min_lon, y: min_lat },
            coord! { x: max_lon, y: max_lat },
        ))
    }

    pub fn from_multipolygon(area: MultiPolygon<f64>) -> Result<Self> {
        let envelope = area
            .bounding_rect()
            .context("Boundary: Polygon has no coordinates")?;
        Ok(Boundary::Polygon { area, envelope })
    }

    pub fn from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Self> {
        let mut rings = rings.iter().map(|ring| {
            LineString::from(
                ring.iter()
                    .map(|position| (position[0], position[1]))
                    .collect::<Vec<_>>(),
            )
        });
        let Some(exterior) = rings.next() else {
            bail!("Boundary: Polygon needs an outer ring");
        };
        let polygon = Polygon::new(exterior, rings.collect());
        Self::from_multipolygon(MultiPolygon::new(vec![polygon]))
    }

    /// Loads all polygons and multipolygons of a GeoJSON file into one area.
    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Boundary: Failed to read {:?}", path))?;
        let geojson: geojson::GeoJson = text
            .parse()
            .with_context(|| format!("Boundary: Invalid GeoJSON in {:?}", path))?;
        let collection = GeometryCollection::<f64>::try_from(&geojson)
            .with_context(|| format!("Boundary: Unsupported GeoJSON in {:?}", path))?;

        let mut polygons = Vec::new();
        for geometry in collection {
            collect_polygons(geometry, &mut polygons);
        }
        if polygons.is_empty() {
            bail!("Boundary: No (multi)polygon found in {:?}", path);
        }
        Self::from_multipolygon(MultiPolygon::new(polygons))
    }

    pub fn from_spec(spec: &BoundarySpec<'_>, resolve: impl Fn(&Path) -> PathBuf) -> Result<Self> {
        match spec {
            BoundarySpec::BBox([min_lon, min_lat, max_lon, max_lat]) => {
                Ok(Self::bbox(*min_lon, *min_lat, *max_lon, *max_lat))
            }
            BoundarySpec::Polygon(rings) => Self::from_rings(rings),
            BoundarySpec::GeoJson(path) => Self::from_geojson_file(&resolve(path)),
        }
    }

    pub fn envelope(&self) -> Rect<f64> {
        match self {
            Boundary::BBox(rect) => *rect,
            Boundary::Polygon { envelope, .. } => *envelope,
        }
    }

    pub fn contains(&self, location: Location) -> bool {
        let point = coord! { x: location.lon(), y: location.lat() };
        match self {
            Boundary::BBox(rect) => rect_contains(rect, point),
            Boundary::Polygon { area, envelope } => {
                rect_contains(envelope, point) && area.intersects(&point)
            }
        }
    }

    pub fn geometry_type(&self) -> &'static str {
        match self {
            Boundary::BBox(_) => "bbox",
            Boundary::Polygon { .. } => "polygon",
        }
    }

    pub fn envelope_as_text(&self) -> String {
        let rect = self.envelope();
        format!(
            "({},{},{},{})",
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y
        )
    }
}

fn rect_contains(rect: &Rect<f64>, point: Coord<f64>) -> bool {
    point.x >= rect.min().x
        && point.x <= rect.max().x
        && point.y >= rect.min().y
        && point.y <= rect.max().y
}

fn collect_polygons(geometry: Geometry<f64>, polygons: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(polygon) => polygons.push(polygon),
        Geometry::MultiPolygon(multi) => polygons.extend(multi),
        Geometry::GeometryCollection(collection) => {
            for geometry in collection {
                collect_polygons(geometry, polygons);
            }
        }
        _ => {}
    }
}
