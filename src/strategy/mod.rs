//! Multi-pass extraction strategies.
//!
//! A strategy reads the input several times. Each read is a [`Pass`]: global
//! hooks see every element once, per-extract hooks see it once for every
//! extract and update that extract's [`ExtractData`]. Extracts never share
//! state, so the per-extract hooks of a batch run on the rayon pool.

use anyhow::{Result, bail};
use rayon::prelude::*;
use std::collections::VecDeque;

use crate::config::StrategyOptions;
use crate::extract::Region;
use crate::ids::{MAX_ID, TypedIdSets};
use crate::osm::{ElementKind, ElementKinds, Node, OsmElement, Relation, Way};
use crate::relations::{RelationGraph, RelationsMap};
use crate::source::ElementSource;
use crate::utils::ProgressBar;

mod first_node;
mod smart_custom;

pub use first_node::{FirstNodeOptions, SmartByFirstNodeAndTags};
pub use smart_custom::{SmartCustom, SmartCustomOptions};

pub const DEFAULT_STRATEGY: &str = smart_custom::NAME;

/// What one extract has collected so far.
///
/// `primary` holds elements found directly (nodes inside the boundary and
/// what references them), `extra` holds elements pulled in to complete
/// ways and relations. Both only ever grow.
pub struct ExtractData {
    region: Box<dyn Region>,
    pub primary: TypedIdSets,
    pub extra: TypedIdSets,
}

impl ExtractData {
    pub fn new(region: Box<dyn Region>) -> Self {
        Self {
            region,
            primary: TypedIdSets::new(),
            extra: TypedIdSets::new(),
        }
    }

    pub fn region(&self) -> &dyn Region {
        self.region.as_ref()
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Whether the element is in the primary or the extra set.
    pub fn includes(&self, kind: ElementKind, id: u64) -> bool {
        self.primary.get(kind, id) || self.extra.get(kind, id)
    }

    /// Marks the nodes of a way that are not primary as extra.
    pub fn add_way_nodes(&mut self, way: &Way) {
        for &node_ref in &way.refs {
            let id = node_ref.unsigned_abs();
            if !self.primary.nodes.get(id) {
                self.extra.nodes.set(id);
            }
        }
    }

    /// Pulls the node and way members of `relation` into the extra sets.
    /// Relation members are left to [`ExtractData::add_relation_network`].
    pub fn add_relation_members(&mut self, relation: &Relation) {
        for member in &relation.members {
            let id = member.positive_id();
            match member.kind {
                ElementKind::Node | ElementKind::Way => {
                    if !self.primary.get(member.kind, id) {
                        self.extra.set(member.kind, id);
                    }
                }
                ElementKind::Relation => {}
            }
        }
    }

    /// Adds every relation connected to a primary relation, in either
    /// direction and over any number of hops, to the extra relations.
    pub fn add_relation_network(&mut self, graph: &RelationGraph) {
        let mut queue: VecDeque<u64> = self
            .primary
            .relations
            .iter()
            .flat_map(|id| graph.neighbors(id))
            .collect();

        while let Some(id) = queue.pop_front() {
            if self.primary.relations.get(id) {
                continue;
            }
            if self.extra.relations.set(id) {
                queue.extend(graph.neighbors(id));
            }
        }
    }

    /// Adds all ancestors of the primary relations to the primary relations.
    pub fn add_relation_parents(&mut self, member_to_parent: &RelationsMap) {
        let mut pending: Vec<u64> = self.primary.relations.iter().collect();
        while let Some(id) = pending.pop() {
            for parent in member_to_parent.get(id) {
                if self.extra.relations.get(parent) {
                    continue;
                }
                if self.primary.relations.set(parent) {
                    pending.push(parent);
                }
            }
        }
    }

    /// Writes the element if this extract includes it.
    pub fn write_if_included(&mut self, element: &OsmElement) -> Result<()> {
        if self.includes(element.kind(), element.positive_id()) {
            self.region.write(element)?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.region.finish()
    }

    fn has_any_extra(&self, kind: ElementKind) -> bool {
        !self.extra.is_empty(kind)
    }
}

/// Whether any extract has pulled in elements of `kind`.
pub fn any_extra(extracts: &[ExtractData], kind: ElementKind) -> bool {
    extracts.iter().any(|data| data.has_any_extra(kind))
}

/// One read of the input.
///
/// Global hooks run first for every element of a batch, then the
/// per-extract hooks run for each extract on the batch in input order.
pub trait Pass: Sync {
    fn kinds(&self) -> ElementKinds {
        ElementKinds::ALL
    }

    fn read_meta(&self) -> bool {
        false
    }

    fn node(&mut self, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn way(&mut self, _way: &Way) -> Result<()> {
        Ok(())
    }

    fn relation(&mut self, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn enode(&self, _data: &mut ExtractData, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn eway(&self, _data: &mut ExtractData, _way: &Way) -> Result<()> {
        Ok(())
    }

    fn erelation(&self, _data: &mut ExtractData, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn eelement(&self, data: &mut ExtractData, element: &OsmElement) -> Result<()> {
        match element {
            OsmElement::Node(node) => self.enode(data, node),
            OsmElement::Way(way) => self.eway(data, way),
            OsmElement::Relation(relation) => self.erelation(data, relation),
        }
    }
}

/// Last pass of every strategy: writes what each extract includes, with
/// metadata.
pub(crate) struct WritePass;

impl Pass for WritePass {
    fn read_meta(&self) -> bool {
        true
    }

    fn eelement(&self, data: &mut ExtractData, element: &OsmElement) -> Result<()> {
        data.write_if_included(element)
    }
}

pub fn run_pass<P: Pass>(
    pass: &mut P,
    extracts: &mut [ExtractData],
    source: &dyn ElementSource,
    progress: &ProgressBar,
) -> Result<()> {
    let kinds = pass.kinds();
    let read_meta = pass.read_meta();
    tracing::debug!("Reading {} from {}", kinds.label(), source.name());
    source.scan(kinds, read_meta, progress, &mut |batch: &[OsmElement]| {
        for element in batch {
            match element {
                OsmElement::Node(node) => pass.node(node)?,
                OsmElement::Way(way) => pass.way(way)?,
                OsmElement::Relation(relation) => pass.relation(relation)?,
            }
        }

        let pass: &P = &*pass;
        extracts.par_iter_mut().try_for_each(|data| -> Result<()> {
            for element in batch {
                pass.eelement(data, element)?;
            }
            Ok(())
        })
    })
}

/// Verifies the input is sorted by type, then by id, and that all ids,
/// including way node refs and relation members, fit into an id set.
///
/// Ids of a type must not decrease; negative ids sort before positive ones,
/// by absolute value.
#[derive(Debug, Default)]
pub struct CheckOrder {
    last: Option<(ElementKind, i64)>,
}

impl CheckOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, kind: ElementKind, id: i64) -> Result<()> {
        check_range(kind, id)?;
        if let Some((last_kind, last_id)) = self.last {
            if kind < last_kind {
                bail!(
                    "Input: {} {} follows {} {}; the input must be sorted by type, then id",
                    kind,
                    id,
                    last_kind,
                    last_id
                );
            }
            if kind == last_kind && order_key(id) < order_key(last_id) {
                bail!(
                    "Input: {} ids are not ordered ({} follows {}); the input must be sorted by type, then id",
                    kind,
                    id,
                    last_id
                );
            }
        }
        self.last = Some((kind, id));
        Ok(())
    }

    pub fn check_way(&mut self, way: &Way) -> Result<()> {
        self.check(ElementKind::Way, way.id)?;
        way.refs
            .iter()
            .try_for_each(|&id| check_range(ElementKind::Node, id))
    }

    pub fn check_relation(&mut self, relation: &Relation) -> Result<()> {
        self.check(ElementKind::Relation, relation.id)?;
        relation
            .members
            .iter()
            .try_for_each(|member| check_range(member.kind, member.id))
    }
}

fn check_range(kind: ElementKind, id: i64) -> Result<()> {
    if id.unsigned_abs() > MAX_ID {
        bail!(
            "Input: {} id {} is out of range (at most {} supported)",
            kind,
            id,
            MAX_ID
        );
    }
    Ok(())
}

fn order_key(id: i64) -> (bool, u64) {
    (id > 0, id.unsigned_abs())
}

pub trait Strategy {
    fn name(&self) -> &'static str;

    /// Logs the effective options.
    fn show_arguments(&self);

    /// Rejects inputs the strategy can not work with, before anything is
    /// read or written.
    fn check_source(&self, source: &dyn ElementSource) -> Result<()> {
        ensure_rereadable(self.name(), source)
    }

    /// Runs all passes and writes every extract. `show_progress` enables the
    /// progress bar on stderr.
    fn run(
        &self,
        extracts: &mut [ExtractData],
        source: &dyn ElementSource,
        show_progress: bool,
    ) -> Result<()>;
}

pub fn create_strategy(name: &str, options: &StrategyOptions) -> Result<Box<dyn Strategy>> {
    match name {
        smart_custom::NAME => Ok(Box::new(SmartCustom::new(SmartCustomOptions::from_options(
            options,
        )))),
        first_node::NAME => Ok(Box::new(SmartByFirstNodeAndTags::new(
            FirstNodeOptions::from_options(options),
        ))),
        other => bail!(
            "Strategy: Unknown strategy '{}' (available: {}, {})",
            other,
            smart_custom::NAME,
            first_node::NAME
        ),
    }
}

/// Every strategy reads its input more than once.
fn ensure_rereadable(strategy: &str, source: &dyn ElementSource) -> Result<()> {
    if !source.is_rereadable() {
        bail!("Can not read from STDIN when using '{}' strategy.", strategy);
    }
    Ok(())
}
