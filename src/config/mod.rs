use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::sinks::OutputFormat;

/// The extracts to produce and how, as read from the config file.
#[derive(Debug, Deserialize, Serialize)]
pub struct ExtractsConfig {
    /// Directory that relative output paths are resolved against.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub extracts: Vec<ExtractConfig>,
    /// Directory of the config file itself, for relative GeoJSON paths.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ExtractsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .with_context(|| format!("Config: Failed to read {:?}", path))?;
        let mut config: ExtractsConfig = settings
            .try_deserialize()
            .with_context(|| format!("Config: Invalid extracts config {:?}", path))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extracts.is_empty() {
            bail!("Config: No extracts defined");
        }
        for (index, extract) in self.extracts.iter().enumerate() {
            extract
                .boundary_spec()
                .with_context(|| format!("Config: Extract #{} ({:?})", index + 1, extract.output))?;
        }
        Ok(())
    }

    pub fn output_path(&self, extract: &ExtractConfig, directory: Option<&Path>) -> PathBuf {
        if extract.output.is_absolute() || extract.output == Path::new("-") {
            return extract.output.clone();
        }
        match directory.or(self.directory.as_deref()) {
            Some(dir) => dir.join(&extract.output),
            None => extract.output.clone(),
        }
    }

    pub fn resolve_input(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractConfig {
    pub output: PathBuf,
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    #[serde(default)]
    pub description: Option<String>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    /// Rings of `[lon, lat]` pairs, the first one is the outer ring.
    #[serde(default)]
    pub polygon: Option<Vec<Vec<Vec<f64>>>>,
    /// GeoJSON file with (multi)polygons.
    #[serde(default)]
    pub geojson: Option<PathBuf>,
    #[serde(default)]
    pub conflicting_tags: Option<String>,
    #[serde(default)]
    pub matching_tags: Option<String>,
}

/// Which boundary an extract uses.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundarySpec<'a> {
    BBox([f64; 4]),
    Polygon(&'a [Vec<Vec<f64>>]),
    GeoJson(&'a Path),
}

impl ExtractConfig {
    pub fn boundary_spec(&self) -> Result<BoundarySpec<'_>> {
        let given = [
            self.bbox.is_some(),
            self.polygon.is_some(),
            self.geojson.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count();
        if given != 1 {
            bail!("exactly one of 'bbox', 'polygon' or 'geojson' must be given");
        }

        if let Some(bbox) = &self.bbox {
            let [min_lon, min_lat, max_lon, max_lat] = bbox.as_slice() else {
                bail!("'bbox' needs four values: min_lon, min_lat, max_lon, max_lat");
            };
            if min_lon > max_lon || min_lat > max_lat {
                bail!("'bbox' minimum is larger than its maximum");
            }
            return Ok(BoundarySpec::BBox([*min_lon, *min_lat, *max_lon, *max_lat]));
        }
        if let Some(rings) = &self.polygon {
            if rings.is_empty() {
                bail!("'polygon' needs at least an outer ring");
            }
            for ring in rings {
                if ring.len() < 3 {
                    bail!("polygon rings need at least three positions");
                }
                if ring.iter().any(|position| position.len() != 2) {
                    bail!("polygon positions must be [lon, lat] pairs");
                }
            }
            return Ok(BoundarySpec::Polygon(rings));
        }
        match &self.geojson {
            Some(path) => Ok(BoundarySpec::GeoJson(path)),
            None => bail!("no boundary given"),
        }
    }
}

/// Free-form `key=value` options passed to the strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyOptions {
    values: BTreeMap<String, String>,
}

impl StrategyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parses `key=value`. A bare `key` is stored with the value `true`.
    pub fn set_assignment(&mut self, data: &str) {
        match data.split_once('=') {
            Some((key, value)) => self.set(key, value),
            None => self.set(data, "true"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for StrategyOptions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut options = Self::new();
        for data in iter {
            options.set_assignment(data);
        }
        options
    }
}

impl fmt::Display for StrategyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(" "))
    }
}
