//! Sequential, re-readable element input.

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::bounded;
use osmpbf::{BlobDecode, BlobReader, Element, HeaderBlock, PrimitiveBlock, RelMemberType};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::metadata::{metadata_from_dense_info, metadata_from_info};
use crate::osm::{ElementKind, ElementKinds, Location, Member, Node, OsmElement, Relation, Way};
use crate::utils::ProgressBar;

#[cfg(test)]
pub(crate) mod memory;

/// Blocks decoded ahead of the consumer.
const READ_AHEAD: usize = 16;

pub type BatchHandler<'a> = dyn FnMut(&[OsmElement]) -> Result<()> + 'a;

/// Input that can be scanned from start to finish, possibly several times.
///
/// Batches are handed out in input order; within a batch elements keep the
/// order they have in the input.
pub trait ElementSource {
    fn name(&self) -> String;

    /// Whether `scan` can be called more than once.
    fn is_rereadable(&self) -> bool;

    /// Input size in bytes, 0 if unknown.
    fn size_bytes(&self) -> u64;

    fn scan(
        &self,
        kinds: ElementKinds,
        read_meta: bool,
        progress: &ProgressBar,
        handler: &mut BatchHandler<'_>,
    ) -> Result<()>;
}

enum Input {
    Path(PathBuf),
    Stdin,
}

pub struct PbfSource {
    input: Input,
    size: u64,
    consumed: AtomicBool,
}

impl PbfSource {
    /// Opens a PBF file; `-` reads standard input, which can only be scanned once.
    pub fn open(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() || path == Path::new("-") {
            return Ok(Self {
                input: Input::Stdin,
                size: 0,
                consumed: AtomicBool::new(false),
            });
        }
        let size = std::fs::metadata(path)
            .with_context(|| format!("Source: Failed to open input file {:?}", path))?
            .len();
        Ok(Self {
            input: Input::Path(path.to_path_buf()),
            size,
            consumed: AtomicBool::new(false),
        })
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        match &self.input {
            Input::Path(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Source: Failed to open input file {:?}", path))?;
                Ok(Box::new(BufReader::new(file)))
            }
            Input::Stdin => {
                if self.consumed.swap(true, Ordering::SeqCst) {
                    bail!("Source: Standard input can only be read once");
                }
                Ok(Box::new(std::io::stdin()))
            }
        }
    }
}

impl ElementSource for PbfSource {
    fn name(&self) -> String {
        match &self.input {
            Input::Path(path) => path.display().to_string(),
            Input::Stdin => "-".to_string(),
        }
    }

    fn is_rereadable(&self) -> bool {
        matches!(self.input, Input::Path(_))
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }

    fn scan(
        &self,
        kinds: ElementKinds,
        read_meta: bool,
        progress: &ProgressBar,
        handler: &mut BatchHandler<'_>,
    ) -> Result<()> {
        let bytes_read = Arc::new(AtomicU64::new(0));
        let reader = CountingReader {
            inner: self.reader()?,
            count: Arc::clone(&bytes_read),
        };
        let (tx, rx) = bounded::<Vec<OsmElement>>(READ_AHEAD);

        let decoder = std::thread::spawn(move || -> Result<()> {
            for blob_result in BlobReader::new(reader) {
                let blob = blob_result.context("Source: Failed to read blob")?;
                match blob.decode().context("Source: Failed to decode blob")? {
                    BlobDecode::OsmHeader(header) => log_sorted_header(&header),
                    BlobDecode::OsmData(block) => {
                        let batch = convert_block(&block, kinds, read_meta);
                        if batch.is_empty() {
                            continue;
                        }
                        // The consumer hung up, it has its own error to report
                        if tx.send(batch).is_err() {
                            return Ok(());
                        }
                    }
                    BlobDecode::Unknown(unknown) => {
                        tracing::info!("Unknown blob: {}", unknown);
                    }
                }
            }
            Ok(())
        });

        let mut handler_result = Ok(());
        for batch in &rx {
            progress.update(bytes_read.load(Ordering::SeqCst));
            if let Err(err) = handler(&batch) {
                handler_result = Err(err);
                break;
            }
        }
        drop(rx);

        let decode_result = match decoder.join() {
            Ok(result) => result,
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow!("Source: Decoder thread panicked: {}", panic_msg))
            }
        };

        handler_result?;
        decode_result?;
        progress.update(bytes_read.load(Ordering::SeqCst));
        Ok(())
    }
}

struct CountingReader {
    inner: Box<dyn Read + Send>,
    count: Arc<AtomicU64>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

fn log_sorted_header(header: &HeaderBlock) {
    let sorted = header
        .required_features()
        .iter()
        .chain(header.optional_features())
        .any(|feature| feature.trim().eq_ignore_ascii_case("Sort.Type_then_ID"));
    if sorted {
        tracing::info!("Input declares Sort.Type_then_ID");
    } else {
        tracing::debug!("Input does not declare a sort order; it is checked while reading");
    }
}

fn member_kind(member_type: &RelMemberType) -> ElementKind {
    match member_type {
        RelMemberType::Node => ElementKind::Node,
        RelMemberType::Way => ElementKind::Way,
        RelMemberType::Relation => ElementKind::Relation,
    }
}

fn convert_block(block: &PrimitiveBlock, kinds: ElementKinds, read_meta: bool) -> Vec<OsmElement> {
    let mut batch = Vec::new();
    for element in block.elements() {
        match element {
            Element::Node(node) if kinds.contains(ElementKind::Node) => {
                batch.push(OsmElement::Node(Node {
                    id: node.id(),
                    location: Location::new(node.lon(), node.lat()),
                    tags: node.tags().collect(),
                    meta: read_meta.then(|| metadata_from_info(&node.info())),
                }));
            }
            Element::DenseNode(node) if kinds.contains(ElementKind::Node) => {
                let meta = if read_meta {
                    node.info().map(metadata_from_dense_info)
                } else {
                    None
                };
                batch.push(OsmElement::Node(Node {
                    id: node.id(),
                    location: Location::new(node.lon(), node.lat()),
                    tags: node.tags().collect(),
                    meta,
                }));
            }
            Element::Way(way) if kinds.contains(ElementKind::Way) => {
                batch.push(OsmElement::Way(Way {
                    id: way.id(),
                    refs: way.refs().collect(),
                    tags: way.tags().collect(),
                    meta: read_meta.then(|| metadata_from_info(&way.info())),
                }));
            }
            Element::Relation(relation) if kinds.contains(ElementKind::Relation) => {
                let members = relation
                    .members()
                    .map(|member| Member {
                        kind: member_kind(&member.member_type),
                        id: member.member_id,
                        role: member.role().unwrap_or_default().to_string(),
                    })
                    .collect();
                batch.push(OsmElement::Relation(Relation {
                    id: relation.id(),
                    members,
                    tags: relation.tags().collect(),
                    meta: read_meta.then(|| metadata_from_info(&relation.info())),
                }));
            }
            _ => {}
        }
    }
    batch
}
