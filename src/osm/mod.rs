//! In-memory OSM element model shared by the input source, the strategies and the sinks.

use std::fmt;

use crate::metadata::Metadata;

// Coordinates are kept as fixed precision integers (deg * 10^7), like PBF does.
const SCALE_FACTOR: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The element kinds a scan is interested in. Elements of other kinds are
/// skipped by the source without being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementKinds {
    nodes: bool,
    ways: bool,
    relations: bool,
}

impl ElementKinds {
    pub const ALL: Self = Self {
        nodes: true,
        ways: true,
        relations: true,
    };
    pub const NODES: Self = Self {
        nodes: true,
        ways: false,
        relations: false,
    };
    pub const WAYS: Self = Self {
        nodes: false,
        ways: true,
        relations: false,
    };
    pub const RELATIONS: Self = Self {
        nodes: false,
        ways: false,
        relations: true,
    };

    pub fn contains(&self, kind: ElementKind) -> bool {
        match kind {
            ElementKind::Node => self.nodes,
            ElementKind::Way => self.ways,
            ElementKind::Relation => self.relations,
        }
    }

    pub fn label(&self) -> String {
        let mut labels = Vec::new();
        if self.nodes {
            labels.push("nodes");
        }
        if self.ways {
            labels.push("ways");
        }
        if self.relations {
            labels.push("relations");
        }
        labels.join("+")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    lon: i32,
    lat: i32,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: (lon * SCALE_FACTOR).round() as i32,
            lat: (lat * SCALE_FACTOR).round() as i32,
        }
    }

    pub fn lon(&self) -> f64 {
        self.lon as f64 / SCALE_FACTOR
    }

    pub fn lat(&self) -> f64 {
        self.lat as f64 / SCALE_FACTOR
    }
}

/// Ordered list of tags as found in the input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tags(Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Tags {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Tags(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub location: Location,
    pub tags: Tags,
    pub meta: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub refs: Vec<i64>,
    pub tags: Tags,
    pub meta: Option<Metadata>,
}

impl Way {
    pub fn first_ref(&self) -> Option<i64> {
        self.refs.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: ElementKind,
    pub id: i64,
    pub role: String,
}

impl Member {
    pub fn positive_id(&self) -> u64 {
        self.id.unsigned_abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
    pub meta: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            OsmElement::Node(_) => ElementKind::Node,
            OsmElement::Way(_) => ElementKind::Way,
            OsmElement::Relation(_) => ElementKind::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            OsmElement::Node(node) => node.id,
            OsmElement::Way(way) => way.id,
            OsmElement::Relation(relation) => relation.id,
        }
    }

    /// Absolute value of the id, the key used by all id sets.
    pub fn positive_id(&self) -> u64 {
        self.id().unsigned_abs()
    }

    pub fn tags(&self) -> &Tags {
        match self {
            OsmElement::Node(node) => &node.tags,
            OsmElement::Way(way) => &way.tags,
            OsmElement::Relation(relation) => &relation.tags,
        }
    }

    pub fn meta(&self) -> Option<&Metadata> {
        match self {
            OsmElement::Node(node) => node.meta.as_ref(),
            OsmElement::Way(way) => way.meta.as_ref(),
            OsmElement::Relation(relation) => relation.meta.as_ref(),
        }
    }
}
