use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use geo_types::Rect;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::metadata::{MetaAttribute, Metadata};
use crate::osm::OsmElement;

pub mod jsonl;
pub mod xml;

pub use self::jsonl::JsonlSink;
pub use self::xml::XmlSink;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[value(name = "xml", alias = "osm")]
    #[serde(alias = "osm")]
    Xml,
    #[value(name = "jsonl", alias = "ndjson")]
    #[serde(alias = "ndjson")]
    Jsonl,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "osm" | "xml" => Some(OutputFormat::Xml),
            "jsonl" | "json" | "ndjson" => Some(OutputFormat::Jsonl),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Xml => "xml",
            OutputFormat::Jsonl => "jsonl",
        }
    }
}

/// Settings shared by all sinks of a run.
#[derive(Debug, Clone, Default)]
pub struct SinkOptions {
    pub overwrite: bool,
    pub clean: Vec<MetaAttribute>,
}

/// Accepts the elements of one extract, in input order.
pub trait ElementSink: Send {
    fn write(&mut self, element: &OsmElement) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

pub type SinkWriter = BufWriter<Box<dyn Write + Send>>;

/// Creates the output for an extract. `-` writes to standard output.
pub fn open_writer(path: &Path, overwrite: bool) -> Result<SinkWriter> {
    if path == Path::new("-") {
        return Ok(BufWriter::new(Box::new(std::io::stdout())));
    }
    if !overwrite && path.exists() {
        bail!(
            "Sink: Output file {:?} already exists; use --overwrite to replace it",
            path
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Sink: Failed to create directory {:?}", parent))?;
    }
    let file =
        File::create(path).with_context(|| format!("Sink: Failed to create {:?}", path))?;
    Ok(BufWriter::new(Box::new(file)))
}

pub fn open_sink(
    format: OutputFormat,
    path: &Path,
    bounds: Option<Rect<f64>>,
    options: &SinkOptions,
) -> Result<Box<dyn ElementSink>> {
    let writer = open_writer(path, options.overwrite)?;
    tracing::debug!("Sink: {} -> {:?}", format.label(), path);
    match format {
        OutputFormat::Xml => Ok(Box::new(XmlSink::new(
            writer,
            bounds,
            options.clean.clone(),
        )?)),
        OutputFormat::Jsonl => Ok(Box::new(JsonlSink::new(writer, options.clean.clone()))),
    }
}

fn cleaned_meta(element: &OsmElement, clean: &[MetaAttribute]) -> Option<Metadata> {
    let meta = element.meta()?;
    Some(if clean.is_empty() {
        meta.clone()
    } else {
        meta.cleaned(clean)
    })
}

/// Formats a coordinate with at most seven decimal places.
pub fn format_coordinate(value: f64) -> String {
    let formatted = format!("{:.7}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}
