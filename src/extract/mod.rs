//! Extract regions: where elements go and how membership is decided.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{ExtractConfig, ExtractsConfig};
use crate::filter::TagFilter;
use crate::osm::{ElementKind, Location, OsmElement, Tags};
use crate::sinks::{ElementSink, OutputFormat, SinkOptions, open_sink};

mod boundary;

pub use boundary::Boundary;

/// Separator between key and value in the tag rule lists of an extract.
const TAG_RULE_SEPARATOR: char = ':';

/// Capabilities a strategy needs from an extract region.
pub trait Region: Send {
    fn name(&self) -> &str;

    fn contains(&self, location: Location) -> bool;

    /// Tags that keep a way out even if its first node is inside.
    fn has_conflicting_tags(&self, tags: &Tags) -> bool;

    /// Tags that pull a way in wherever its nodes are.
    fn has_matching_tags(&self, tags: &Tags) -> bool;

    fn write(&mut self, element: &OsmElement) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

impl WriteCounts {
    fn record(&mut self, kind: ElementKind) {
        match kind {
            ElementKind::Node => self.nodes += 1,
            ElementKind::Way => self.ways += 1,
            ElementKind::Relation => self.relations += 1,
        }
    }
}

/// A region backed by a boundary geometry and an output file.
pub struct Extract {
    output: PathBuf,
    format: OutputFormat,
    description: String,
    boundary: Boundary,
    conflicting_tags: TagFilter,
    matching_tags: TagFilter,
    sink: Box<dyn ElementSink>,
    counts: WriteCounts,
}

impl Extract {
    pub fn new(
        output: PathBuf,
        format: OutputFormat,
        description: String,
        boundary: Boundary,
        sink: Box<dyn ElementSink>,
    ) -> Self {
        Self {
            output,
            format,
            description,
            boundary,
            conflicting_tags: TagFilter::new(),
            matching_tags: TagFilter::new(),
            sink,
            counts: WriteCounts::default(),
        }
    }

    pub fn with_tag_rules(mut self, conflicting: &str, matching: &str) -> Self {
        self.conflicting_tags = TagFilter::parse(conflicting, TAG_RULE_SEPARATOR);
        self.matching_tags = TagFilter::parse(matching, TAG_RULE_SEPARATOR);
        self
    }

    /// Builds an extract from its config entry and opens its output.
    pub fn open(
        config: &ExtractsConfig,
        extract: &ExtractConfig,
        directory: Option<&Path>,
        options: &SinkOptions,
    ) -> Result<Self> {
        let output = config.output_path(extract, directory);
        let format = extract
            .output_format
            .or_else(|| OutputFormat::from_path(&output))
            .with_context(|| {
                format!(
                    "Extract: Could not detect output format of {:?}; set 'output_format'",
                    output
                )
            })?;
        let spec = extract.boundary_spec()?;
        let boundary = Boundary::from_spec(&spec, |path| config.resolve_input(path))
            .with_context(|| format!("Extract: Failed to load boundary for {:?}", output))?;
        let sink = open_sink(format, &output, Some(boundary.envelope()), options)?;

        Ok(Self::new(
            output,
            format,
            extract.description.clone().unwrap_or_default(),
            boundary,
            sink,
        )
        .with_tag_rules(
            extract.conflicting_tags.as_deref().unwrap_or_default(),
            extract.matching_tags.as_deref().unwrap_or_default(),
        ))
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Extract {:?} ({}): {} {} {}; conflicting tags [{}], matching tags [{}]",
            self.output,
            self.format.label(),
            self.description,
            self.boundary.geometry_type(),
            self.boundary.envelope_as_text(),
            self.conflicting_tags,
            self.matching_tags
        );
    }
}

impl Region for Extract {
    fn name(&self) -> &str {
        self.output.to_str().unwrap_or("<extract>")
    }

    fn contains(&self, location: Location) -> bool {
        self.boundary.contains(location)
    }

    fn has_conflicting_tags(&self, tags: &Tags) -> bool {
        self.conflicting_tags.matches_any(tags)
    }

    fn has_matching_tags(&self, tags: &Tags) -> bool {
        self.matching_tags.matches_any(tags)
    }

    fn write(&mut self, element: &OsmElement) -> Result<()> {
        self.sink
            .write(element)
            .with_context(|| format!("Extract: Failed writing to {:?}", self.output))?;
        self.counts.record(element.kind());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink
            .finish()
            .with_context(|| format!("Extract: Failed to finish {:?}", self.output))?;
        tracing::info!(
            "Wrote {} nodes, {} ways, {} relations to {:?}",
            self.counts.nodes,
            self.counts.ways,
            self.counts.relations,
            self.output
        );
        Ok(())
    }
}
