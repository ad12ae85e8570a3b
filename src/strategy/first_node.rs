//! `smart_by_first_node_and_tags`: ways by their first node or their tags,
//! relations of selected types completed, parents of relations kept.

use anyhow::Result;

use super::{CheckOrder, ExtractData, Pass, Strategy, WritePass, run_pass};
use crate::config::StrategyOptions;
use crate::filter::TagFilter;
use crate::osm::{ElementKind, ElementKinds, Node, Relation, Way};
use crate::relations::RelationGraphBuilder;
use crate::source::ElementSource;
use crate::utils::ProgressBar;

pub(super) const NAME: &str = "smart_by_first_node_and_tags";

const TAG_RULE_SEPARATOR: char = '=';

#[derive(Debug, Clone)]
pub struct FirstNodeOptions {
    /// Relation types that are completed. Empty means any type.
    pub types: Vec<String>,
    /// Share of members (in percent) that must be inside before a relation
    /// of another type is completed. 100 turns this off.
    pub complete_partial_relations: usize,
    pub tags: TagFilter,
}

impl Default for FirstNodeOptions {
    fn default() -> Self {
        Self {
            types: vec!["multipolygon".to_string()],
            complete_partial_relations: 100,
            tags: TagFilter::new(),
        }
    }
}

impl FirstNodeOptions {
    pub fn from_options(options: &StrategyOptions) -> Self {
        let mut parsed = Self::default();
        for (key, value) in options.iter() {
            match key {
                "types" => {
                    parsed.types = match value {
                        "" | "any" | "true" => Vec::new(),
                        list => list
                            .split(',')
                            .filter(|item| !item.is_empty())
                            .map(str::to_string)
                            .collect(),
                    };
                }
                "complete-partial-relations" if !value.is_empty() => {
                    parsed.complete_partial_relations = match value.parse::<i64>() {
                        Ok(percent @ 1..=100) => percent as usize,
                        _ => 100,
                    };
                }
                "complete-partial-relations" => {}
                "tags" => parsed.tags = TagFilter::parse(value, TAG_RULE_SEPARATOR),
                _ => tracing::warn!("Ignoring unknown option '{}' for '{}' strategy.", key, NAME),
            }
        }
        parsed
    }

    fn check_type(&self, relation: &Relation) -> bool {
        if self.types.is_empty() {
            return true;
        }
        relation
            .tags
            .get("type")
            .is_some_and(|kind| self.types.iter().any(|t| t == kind))
    }

    fn check_tags(&self, relation: &Relation) -> bool {
        self.tags.matches_any(&relation.tags)
    }

    fn check_members_count(&self, size: usize, wanted: usize) -> bool {
        wanted * 100 >= size * self.complete_partial_relations
    }
}

pub struct SmartByFirstNodeAndTags {
    options: FirstNodeOptions,
}

impl SmartByFirstNodeAndTags {
    pub fn new(options: FirstNodeOptions) -> Self {
        Self { options }
    }
}

struct FindPrimary<'a> {
    options: &'a FirstNodeOptions,
    check_order: CheckOrder,
    graph: RelationGraphBuilder,
}

impl Pass for FindPrimary<'_> {
    fn node(&mut self, node: &Node) -> Result<()> {
        self.check_order.check(ElementKind::Node, node.id)
    }

    fn way(&mut self, way: &Way) -> Result<()> {
        self.check_order.check_way(way)
    }

    fn relation(&mut self, relation: &Relation) -> Result<()> {
        self.check_order.check_relation(relation)?;
        self.graph.add_members(relation);
        Ok(())
    }

    fn enode(&self, data: &mut ExtractData, node: &Node) -> Result<()> {
        if data.region().contains(node.location) {
            data.primary.nodes.set(node.id.unsigned_abs());
        }
        Ok(())
    }

    fn eway(&self, data: &mut ExtractData, way: &Way) -> Result<()> {
        let first_inside = way
            .first_ref()
            .is_some_and(|id| data.primary.nodes.get(id.unsigned_abs()));
        let region = data.region();
        if (first_inside && !region.has_conflicting_tags(&way.tags))
            || region.has_matching_tags(&way.tags)
        {
            data.primary.ways.set(way.id.unsigned_abs());
        }
        Ok(())
    }

    fn erelation(&self, data: &mut ExtractData, relation: &Relation) -> Result<()> {
        let mut wanted = 0;
        for member in &relation.members {
            let inside = match member.kind {
                ElementKind::Node | ElementKind::Way => {
                    data.primary.get(member.kind, member.positive_id())
                }
                ElementKind::Relation => false,
            };
            if !inside {
                continue;
            }
            if wanted == 0 {
                data.primary.relations.set(relation.id.unsigned_abs());
                if self.options.check_type(relation) && self.options.check_tags(relation) {
                    data.add_relation_members(relation);
                    return Ok(());
                }
            }
            wanted += 1;
        }

        if self
            .options
            .check_members_count(relation.members.len(), wanted)
            && self.options.check_tags(relation)
        {
            data.add_relation_members(relation);
        }
        Ok(())
    }
}

/// Adds all nodes of included ways.
struct CompleteWays;

impl Pass for CompleteWays {
    fn kinds(&self) -> ElementKinds {
        ElementKinds::WAYS
    }

    fn eway(&self, data: &mut ExtractData, way: &Way) -> Result<()> {
        if data.includes(ElementKind::Way, way.id.unsigned_abs()) {
            data.add_way_nodes(way);
        }
        Ok(())
    }
}

impl Strategy for SmartByFirstNodeAndTags {
    fn name(&self) -> &'static str {
        NAME
    }

    fn show_arguments(&self) {
        tracing::info!("Additional strategy options:");
        if self.options.types.is_empty() {
            tracing::info!("  - [types] relation types: any");
        } else {
            tracing::info!(
                "  - [types] relation types: {}",
                self.options.types.join(", ")
            );
        }
        if self.options.complete_partial_relations == 100 {
            tracing::info!("  - [complete-partial-relations] do not complete partial relations");
        } else {
            tracing::info!(
                "  - [complete-partial-relations] complete partial relations when {}% or more members are in extract",
                self.options.complete_partial_relations
            );
        }
        if self.options.tags.is_empty() {
            tracing::info!("  - [tags] no tags defined");
        } else {
            tracing::info!("  - [tags] {}", self.options.tags);
        }
    }

    fn run(
        &self,
        extracts: &mut [ExtractData],
        source: &dyn ElementSource,
        show_progress: bool,
    ) -> Result<()> {
        self.check_source(source)?;

        tracing::info!("Running '{}' strategy in three passes...", NAME);
        let file_size = source.size_bytes();
        let progress = ProgressBar::new(file_size * 3, show_progress);

        tracing::info!("First pass (of three)...");
        let mut find_primary = FindPrimary {
            options: &self.options,
            check_order: CheckOrder::new(),
            graph: RelationGraphBuilder::new(),
        };
        run_pass(&mut find_primary, extracts, source, &progress)?;
        progress.file_done(file_size);
        tracing::debug!(
            "{} relation memberships between relations",
            find_primary.graph.edge_count()
        );

        let parents = find_primary.graph.build_member_to_parent_index();
        for data in extracts.iter_mut() {
            data.add_relation_parents(&parents);
        }

        progress.remove();
        tracing::info!("Second pass (of three)...");
        run_pass(&mut CompleteWays, extracts, source, &progress)?;
        progress.file_done(file_size);

        progress.remove();
        tracing::info!("Third pass (of three)...");
        run_pass(&mut WritePass, extracts, source, &progress)?;
        progress.done();
        Ok(())
    }
}
