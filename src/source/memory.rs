use anyhow::{Result, bail};
use std::sync::Mutex;

use super::{BatchHandler, ElementSource};
use crate::osm::{ElementKinds, OsmElement};
use crate::utils::ProgressBar;

/// In-memory source for strategy tests. Records every scan it serves.
pub(crate) struct MemorySource {
    elements: Vec<OsmElement>,
    batch_size: usize,
    rereadable: bool,
    scans: Mutex<Vec<ElementKinds>>,
}

impl MemorySource {
    pub(crate) fn new(elements: Vec<OsmElement>) -> Self {
        Self {
            elements,
            batch_size: 2,
            rereadable: true,
            scans: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn single_use(elements: Vec<OsmElement>) -> Self {
        Self {
            rereadable: false,
            ..Self::new(elements)
        }
    }

    pub(crate) fn scans(&self) -> Vec<ElementKinds> {
        self.scans.lock().unwrap().clone()
    }
}

impl ElementSource for MemorySource {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn is_rereadable(&self) -> bool {
        self.rereadable
    }

    fn size_bytes(&self) -> u64 {
        self.elements.len() as u64
    }

    fn scan(
        &self,
        kinds: ElementKinds,
        _read_meta: bool,
        progress: &ProgressBar,
        handler: &mut BatchHandler<'_>,
    ) -> Result<()> {
        let mut scans = self.scans.lock().unwrap();
        if !self.rereadable && !scans.is_empty() {
            bail!("memory source can only be read once");
        }
        scans.push(kinds);
        drop(scans);

        let selected: Vec<OsmElement> = self
            .elements
            .iter()
            .filter(|element| kinds.contains(element.kind()))
            .cloned()
            .collect();
        for (index, batch) in selected.chunks(self.batch_size).enumerate() {
            progress.update(((index + 1) * self.batch_size) as u64);
            handler(batch)?;
        }
        Ok(())
    }
}
