//! Id sets used to track which elements belong to an extract.
//!
//! OSM ids are dense enough that a bitmap beats any hash based set, but
//! extracts usually only touch a few id ranges. The bitmap is therefore
//! split into fixed size chunks that are only allocated once an id inside
//! them is set.

use crate::osm::ElementKind;

const CHUNK_BITS: u32 = 22;

/// Largest id an [`IdSet`] holds. Current OSM ids are several orders of
/// magnitude below it; inputs with larger ids are rejected while reading.
pub const MAX_ID: u64 = 1 << 40;
const WORDS_PER_CHUNK: usize = (1usize << CHUNK_BITS) / 64;

#[derive(Debug, Default)]
pub struct IdSet {
    chunks: Vec<Option<Box<[u64]>>>,
    size: u64,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn locate(id: u64) -> (usize, usize, u64) {
        let chunk = (id >> CHUNK_BITS) as usize;
        let offset = id & ((1u64 << CHUNK_BITS) - 1);
        let word = (offset / 64) as usize;
        let mask = 1u64 << (offset % 64);
        (chunk, word, mask)
    }

    /// Adds an id. Returns `true` if it was not in the set before.
    ///
    /// `id` must not exceed [`MAX_ID`].
    pub fn set(&mut self, id: u64) -> bool {
        debug_assert!(id <= MAX_ID, "id {id} exceeds MAX_ID");
        let (chunk, word, mask) = Self::locate(id);
        if chunk >= self.chunks.len() {
            self.chunks.resize_with(chunk + 1, || None);
        }
        let words = self.chunks[chunk]
            .get_or_insert_with(|| vec![0u64; WORDS_PER_CHUNK].into_boxed_slice());
        if words[word] & mask != 0 {
            return false;
        }
        words[word] |= mask;
        self.size += 1;
        true
    }

    pub fn get(&self, id: u64) -> bool {
        let (chunk, word, mask) = Self::locate(id);
        match self.chunks.get(chunk) {
            Some(Some(words)) => words[word] & mask != 0,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    /// Iterates over all ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(chunk, words)| words.as_ref().map(|words| (chunk, words)))
            .flat_map(|(chunk, words)| {
                let base = (chunk as u64) << CHUNK_BITS;
                words.iter().enumerate().flat_map(move |(index, &word)| {
                    SetBits { word }.map(move |bit| base + (index as u64) * 64 + bit)
                })
            })
    }
}

struct SetBits {
    word: u64,
}

impl Iterator for SetBits {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.word == 0 {
            return None;
        }
        let bit = self.word.trailing_zeros();
        self.word &= self.word - 1;
        Some(u64::from(bit))
    }
}

/// One id set per element kind.
#[derive(Debug, Default)]
pub struct TypedIdSets {
    pub nodes: IdSet,
    pub ways: IdSet,
    pub relations: IdSet,
}

impl TypedIdSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(&self, kind: ElementKind) -> &IdSet {
        match kind {
            ElementKind::Node => &self.nodes,
            ElementKind::Way => &self.ways,
            ElementKind::Relation => &self.relations,
        }
    }

    pub fn of_mut(&mut self, kind: ElementKind) -> &mut IdSet {
        match kind {
            ElementKind::Node => &mut self.nodes,
            ElementKind::Way => &mut self.ways,
            ElementKind::Relation => &mut self.relations,
        }
    }

    pub fn set(&mut self, kind: ElementKind, id: u64) -> bool {
        self.of_mut(kind).set(id)
    }

    pub fn get(&self, kind: ElementKind, id: u64) -> bool {
        self.of(kind).get(id)
    }

    pub fn is_empty(&self, kind: ElementKind) -> bool {
        self.of(kind).is_empty()
    }
}
