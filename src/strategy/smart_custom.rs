//! `smart_custom`: complete ways, selected relations and whole relation
//! systems in at most four passes.

use anyhow::Result;

use super::{CheckOrder, ExtractData, Pass, Strategy, WritePass, any_extra, run_pass};
use crate::config::StrategyOptions;
use crate::filter::TagFilter;
use crate::osm::{ElementKind, ElementKinds, Node, Relation, Tags, Way};
use crate::relations::RelationGraphBuilder;
use crate::source::ElementSource;
use crate::utils::ProgressBar;

pub(super) const NAME: &str = "smart_custom";

const TAG_RULE_SEPARATOR: char = ':';

#[derive(Debug, Clone, Default)]
pub struct SmartCustomOptions {
    /// Relations whose members are completed.
    pub relations: TagFilter,
    /// Relations that form systems, completed as a whole.
    pub relation_system: TagFilter,
    /// Decide on ways by their first node instead of any node.
    pub by_first_node: bool,
}

impl SmartCustomOptions {
    pub fn from_options(options: &StrategyOptions) -> Self {
        let mut parsed = Self::default();
        for (key, value) in options.iter() {
            match key {
                "relations" => parsed.relations.add_rules(value, TAG_RULE_SEPARATOR),
                "relation-system" => parsed.relation_system.add_rules(value, TAG_RULE_SEPARATOR),
                "by-first-node" => {
                    parsed.by_first_node = matches!(value, "" | "true" | "yes");
                }
                _ => tracing::warn!("Ignoring unknown option '{}' for '{}' strategy.", key, NAME),
            }
        }
        parsed
    }

    fn is_relevant_relation(&self, tags: &Tags) -> bool {
        self.relations.matches_any(tags)
    }

    fn is_part_of_relation_system(&self, tags: &Tags) -> bool {
        self.relation_system.matches_any(tags)
    }
}

pub struct SmartCustom {
    options: SmartCustomOptions,
}

impl SmartCustom {
    pub fn new(options: SmartCustomOptions) -> Self {
        Self { options }
    }
}

/// Finds the primary elements and collects the relation system graph.
struct FindPrimary<'a> {
    options: &'a SmartCustomOptions,
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
        if self.options.is_part_of_relation_system(&relation.tags) {
            self.graph.add_members(relation);
        }
        Ok(())
    }

    fn enode(&self, data: &mut ExtractData, node: &Node) -> Result<()> {
        if data.region().contains(node.location) {
            data.primary.nodes.set(node.id.unsigned_abs());
        }
        Ok(())
    }

    fn eway(&self, data: &mut ExtractData, way: &Way) -> Result<()> {
        let include = if self.options.by_first_node {
            let first_inside = way
                .first_ref()
                .is_some_and(|id| data.primary.nodes.get(id.unsigned_abs()));
            let region = data.region();
            (first_inside && !region.has_conflicting_tags(&way.tags))
                || region.has_matching_tags(&way.tags)
        } else {
            way.refs
                .iter()
                .any(|id| data.primary.nodes.get(id.unsigned_abs()))
        };

        if include {
            data.primary.ways.set(way.id.unsigned_abs());
            data.add_way_nodes(way);
        }
        Ok(())
    }

    fn erelation(&self, data: &mut ExtractData, relation: &Relation) -> Result<()> {
        // Relevance only depends on the relation's tags, so the first
        // member found inside decides.
        let touches_primary = relation.members.iter().any(|member| match member.kind {
            ElementKind::Node | ElementKind::Way => {
                data.primary.get(member.kind, member.positive_id())
            }
            ElementKind::Relation => false,
        });
        if !touches_primary {
            return Ok(());
        }

        data.primary.relations.set(relation.id.unsigned_abs());
        if self.options.is_relevant_relation(&relation.tags)
            || self.options.is_part_of_relation_system(&relation.tags)
        {
            data.add_relation_members(relation);
        }
        Ok(())
    }
}

/// Completes the members of relations reached through the system graph.
struct CompleteSystemRelations<'a> {
    options: &'a SmartCustomOptions,
}

impl Pass for CompleteSystemRelations<'_> {
    fn kinds(&self) -> ElementKinds {
        ElementKinds::RELATIONS
    }

    fn erelation(&self, data: &mut ExtractData, relation: &Relation) -> Result<()> {
        if data.extra.relations.get(relation.id.unsigned_abs())
            && self.options.is_part_of_relation_system(&relation.tags)
        {
            data.add_relation_members(relation);
        }
        Ok(())
    }
}

/// Adds the nodes of ways that were pulled in through relations.
struct CompleteExtraWays;

impl Pass for CompleteExtraWays {
    fn kinds(&self) -> ElementKinds {
        ElementKinds::WAYS
    }

    fn eway(&self, data: &mut ExtractData, way: &Way) -> Result<()> {
        if data.extra.ways.get(way.id.unsigned_abs()) {
            data.add_way_nodes(way);
        }
        Ok(())
    }
}

impl Strategy for SmartCustom {
    fn name(&self) -> &'static str {
        NAME
    }

    fn show_arguments(&self) {
        tracing::info!("Additional strategy options:");
        if !self.options.relations.is_empty() {
            tracing::info!("  - [relations] {}", self.options.relations);
        }
        if !self.options.relation_system.is_empty() {
            tracing::info!("  - [relation-system] {}", self.options.relation_system);
        }
        if self.options.by_first_node {
            tracing::info!("  - [by-first-node]");
        }
    }

    fn run(
        &self,
        extracts: &mut [ExtractData],
        source: &dyn ElementSource,
        show_progress: bool,
    ) -> Result<()> {
        self.check_source(source)?;

        tracing::info!("Running '{}' strategy in (at most) four passes...", NAME);
        let file_size = source.size_bytes();
        let progress = ProgressBar::new(file_size * 4, show_progress);

        tracing::info!("Pass 1...");
        let mut find_primary = FindPrimary {
            options: &self.options,
            check_order: CheckOrder::new(),
            graph: RelationGraphBuilder::new(),
        };
        run_pass(&mut find_primary, extracts, source, &progress)?;
        progress.file_done(file_size);
        tracing::info!("Pass 1 done");

        let graph = find_primary.graph.build_index();
        tracing::debug!("Relation system graph: {} edges", graph.edge_count());
        for data in extracts.iter_mut() {
            data.add_relation_network(&graph);
            tracing::debug!(
                "{}: {} relations, {} in related systems",
                data.name(),
                data.primary.relations.len(),
                data.extra.relations.len()
            );
        }

        if any_extra(extracts, ElementKind::Relation) {
            progress.remove();
            tracing::info!("Pass 2...");
            let mut pass = CompleteSystemRelations {
                options: &self.options,
            };
            run_pass(&mut pass, extracts, source, &progress)?;
            progress.file_done(file_size);
            tracing::info!("Pass 2 done");
        }

        if any_extra(extracts, ElementKind::Way) {
            progress.remove();
            tracing::info!("Pass 3...");
            run_pass(&mut CompleteExtraWays, extracts, source, &progress)?;
            progress.file_done(file_size);
            tracing::info!("Pass 3 done");
        }

        progress.remove();
        tracing::info!("Pass 4...");
        run_pass(&mut WritePass, extracts, source, &progress)?;
        progress.done();
        tracing::info!("Pass 4 done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::OsmElement;
    use crate::source::memory::MemorySource;
    use crate::strategy::tests::{RecordingRegion, Written, node, relation, way};

    fn strategy(options: &[&str]) -> SmartCustom {
        SmartCustom::new(SmartCustomOptions::from_options(
            &options.iter().copied().collect::<StrategyOptions>(),
        ))
    }

    /// Runs with one extract covering `(0,0)-(1,1)`.
    fn run(options: &[&str], elements: Vec<OsmElement>) -> (ExtractData, Written, MemorySource) {
        run_with_region(options, elements, RecordingRegion::bbox(0.0, 0.0, 1.0, 1.0))
    }

    fn run_with_region(
        options: &[&str],
        elements: Vec<OsmElement>,
        region: RecordingRegion,
    ) -> (ExtractData, Written, MemorySource) {
        let written = region.written();
        let mut extracts = vec![ExtractData::new(Box::new(region))];
        let source = MemorySource::new(elements);
        strategy(options)
            .run(&mut extracts, &source, false)
            .unwrap();
        let data = extracts.pop().unwrap();
        (data, written, source)
    }

    fn ids(written: &Written, kind: ElementKind) -> Vec<i64> {
        written
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }

    #[test]
    fn parses_options() {
        let options = SmartCustomOptions::from_options(
            &["relations=type:multipolygon,boundary", "by-first-node", "whatever=1"]
                .into_iter()
                .collect::<StrategyOptions>(),
        );
        assert!(options.by_first_node);
        assert_eq!(options.relations.rules().len(), 2);
        assert!(options.relation_system.is_empty());

        for (value, expected) in [("", true), ("yes", true), ("true", true), ("no", false)] {
            let mut raw = StrategyOptions::new();
            raw.set("by-first-node", value);
            assert_eq!(
                SmartCustomOptions::from_options(&raw).by_first_node,
                expected,
                "by-first-node={value}"
            );
        }
    }

    #[test]
    fn nodes_are_primary_iff_inside() {
        let (data, written, _) = run(
            &[],
            vec![node(1, 0.5, 0.5), node(2, 1.5, 0.5), node(3, 1.0, 1.0)],
        );
        assert!(data.primary.nodes.get(1));
        assert!(!data.primary.nodes.get(2));
        assert!(data.primary.nodes.get(3));
        assert_eq!(ids(&written, ElementKind::Node), vec![1, 3]);
    }

    #[test]
    fn way_heuristic_depends_on_first_node_mode() {
        // first node outside, second inside
        let elements = || {
            vec![
                node(1, 5.0, 5.0),
                node(2, 0.5, 0.5),
                way(10, &[1, 2], &[]),
            ]
        };

        let (data, written, _) = run(&[], elements());
        assert!(data.primary.ways.get(10));
        assert!(data.extra.nodes.get(1));
        assert_eq!(ids(&written, ElementKind::Node), vec![1, 2]);

        let (data, written, _) = run(&["by-first-node"], elements());
        assert!(!data.primary.ways.get(10));
        assert!(data.extra.nodes.is_empty());
        assert_eq!(ids(&written, ElementKind::Node), vec![2]);
    }

    #[test]
    fn first_node_mode_honours_tag_predicates() {
        let region = RecordingRegion::bbox(0.0, 0.0, 1.0, 1.0)
            .with_tag_rules("boundary:administrative", "route:ferry");
        let (data, written, _) = run_with_region(
            &["by-first-node=yes"],
            vec![
                node(1, 0.5, 0.5),
                node(2, 5.0, 5.0),
                way(10, &[1, 2], &[("highway", "primary")]),
                way(11, &[1, 2], &[("boundary", "administrative")]),
                way(12, &[2, 2], &[("route", "ferry")]),
            ],
            region,
        );
        assert!(data.primary.ways.get(10));
        assert!(!data.primary.ways.get(11));
        assert!(data.primary.ways.get(12));
        assert_eq!(ids(&written, ElementKind::Way), vec![10, 12]);
        assert_eq!(ids(&written, ElementKind::Node), vec![1, 2]);
    }

    #[test]
    fn relation_system_is_written_completely() {
        let (data, written, source) = run(
            &["relation-system=type:route"],
            vec![
                node(1, 0.5, 0.5),
                node(2, 0.6, 0.6),
                node(3, 5.0, 5.0),
                way(10, &[1, 3], &[]),
                relation(100, &[(ElementKind::Way, 10)], &[("type", "route")]),
                relation(200, &[(ElementKind::Relation, 100)], &[("type", "route")]),
            ],
        );

        assert!(data.primary.relations.get(100));
        assert!(data.extra.relations.get(200));
        assert_eq!(ids(&written, ElementKind::Node), vec![1, 2, 3]);
        assert_eq!(ids(&written, ElementKind::Way), vec![10]);
        assert_eq!(ids(&written, ElementKind::Relation), vec![100, 200]);
        assert_eq!(
            source.scans(),
            vec![ElementKinds::ALL, ElementKinds::RELATIONS, ElementKinds::ALL]
        );
    }

    #[test]
    fn non_system_parent_is_not_pulled_in() {
        let (_, written, source) = run(
            &["relation-system=type:route"],
            vec![
                node(1, 0.5, 0.5),
                relation(100, &[(ElementKind::Node, 1)], &[("type", "route")]),
                relation(200, &[(ElementKind::Relation, 100)], &[("type", "collection")]),
            ],
        );
        assert_eq!(ids(&written, ElementKind::Relation), vec![100]);
        assert_eq!(source.scans(), vec![ElementKinds::ALL, ElementKinds::ALL]);
    }

    #[test]
    fn non_system_member_relation_is_kept_without_members() {
        let (data, written, source) = run(
            &["relation-system=type:route"],
            vec![
                node(1, 0.5, 0.5),
                node(3, 5.0, 5.0),
                node(4, 6.0, 6.0),
                way(20, &[3, 4], &[]),
                relation(
                    100,
                    &[(ElementKind::Node, 1), (ElementKind::Relation, 200)],
                    &[("type", "route")],
                ),
                relation(200, &[(ElementKind::Way, 20)], &[("type", "collection")]),
            ],
        );
        assert!(data.primary.relations.get(100));
        assert!(data.extra.relations.get(200));
        assert!(data.extra.ways.is_empty());
        assert_eq!(ids(&written, ElementKind::Relation), vec![100, 200]);
        assert!(ids(&written, ElementKind::Way).is_empty());
        assert_eq!(ids(&written, ElementKind::Node), vec![1]);
        assert_eq!(
            source.scans(),
            vec![ElementKinds::ALL, ElementKinds::RELATIONS, ElementKinds::ALL]
        );
    }

    #[test]
    fn extra_ways_get_their_nodes_in_third_pass() {
        let (data, written, source) = run(
            &["relations=type:multipolygon"],
            vec![
                node(1, 0.5, 0.5),
                node(3, 5.0, 5.0),
                node(4, 6.0, 6.0),
                way(20, &[3, 4], &[]),
                relation(
                    100,
                    &[(ElementKind::Node, 1), (ElementKind::Way, 20)],
                    &[("type", "multipolygon")],
                ),
            ],
        );
        assert!(data.extra.ways.get(20));
        assert_eq!(ids(&written, ElementKind::Node), vec![1, 3, 4]);
        assert_eq!(ids(&written, ElementKind::Way), vec![20]);
        assert_eq!(
            source.scans(),
            vec![ElementKinds::ALL, ElementKinds::WAYS, ElementKinds::ALL]
        );
    }

    #[test]
    fn irrelevant_relation_is_kept_without_members() {
        let (data, written, source) = run(
            &["relations=type:multipolygon"],
            vec![
                node(1, 0.5, 0.5),
                way(20, &[3, 4], &[]),
                relation(
                    100,
                    &[(ElementKind::Node, 1), (ElementKind::Way, 20)],
                    &[("type", "route")],
                ),
            ],
        );
        assert!(data.primary.relations.get(100));
        assert!(data.extra.ways.is_empty());
        assert_eq!(ids(&written, ElementKind::Relation), vec![100]);
        assert!(ids(&written, ElementKind::Way).is_empty());
        assert_eq!(source.scans(), vec![ElementKinds::ALL, ElementKinds::ALL]);
    }

    #[test]
    fn relations_outside_are_ignored() {
        let (data, written, _) = run(
            &["relations=type"],
            vec![
                node(1, 0.5, 0.5),
                node(2, 5.0, 5.0),
                relation(100, &[(ElementKind::Node, 2)], &[("type", "route")]),
            ],
        );
        assert!(data.primary.relations.is_empty());
        assert!(ids(&written, ElementKind::Relation).is_empty());
    }

    #[test]
    fn unsorted_input_is_fatal() {
        let mut extracts = vec![ExtractData::new(Box::new(RecordingRegion::bbox(
            0.0, 0.0, 1.0, 1.0,
        )))];
        let source = MemorySource::new(vec![node(2, 0.5, 0.5), node(1, 0.5, 0.5)]);
        let err = strategy(&[])
            .run(&mut extracts, &source, false)
            .unwrap_err();
        assert!(err.to_string().contains("not ordered"));
        assert_eq!(source.scans().len(), 1);
    }

    #[test]
    fn out_of_range_way_ref_is_fatal() {
        let written;
        let mut extracts = {
            let region = RecordingRegion::bbox(0.0, 0.0, 1.0, 1.0);
            written = region.written();
            vec![ExtractData::new(Box::new(region))]
        };
        let source = MemorySource::new(vec![node(1, 0.5, 0.5), way(10, &[1, i64::MIN], &[])]);
        let err = strategy(&[])
            .run(&mut extracts, &source, false)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(!extracts[0].primary.ways.get(10));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn single_use_input_is_rejected_before_reading() {
        let mut extracts = vec![ExtractData::new(Box::new(RecordingRegion::bbox(
            0.0, 0.0, 1.0, 1.0,
        )))];
        let source = MemorySource::single_use(vec![node(1, 0.5, 0.5)]);
        let err = strategy(&[])
            .run(&mut extracts, &source, false)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can not read from STDIN when using 'smart_custom' strategy."
        );
        assert!(source.scans().is_empty());
    }

    #[test]
    fn extracts_are_independent() {
        let left = RecordingRegion::bbox(0.0, 0.0, 1.0, 1.0);
        let right = RecordingRegion::bbox(2.0, 0.0, 3.0, 1.0);
        let (left_written, right_written) = (left.written(), right.written());
        let mut extracts = vec![
            ExtractData::new(Box::new(left)),
            ExtractData::new(Box::new(right)),
        ];
        let source = MemorySource::new(vec![
            node(1, 0.5, 0.5),
            node(2, 2.5, 0.5),
            way(10, &[1, 2], &[]),
        ]);
        strategy(&[]).run(&mut extracts, &source, false).unwrap();

        assert_eq!(ids(&left_written, ElementKind::Node), vec![1, 2]);
        assert_eq!(ids(&right_written, ElementKind::Node), vec![1, 2]);
        assert!(extracts[0].primary.nodes.get(1));
        assert!(extracts[0].extra.nodes.get(2));
        assert!(extracts[1].primary.nodes.get(2));
        assert!(extracts[1].extra.nodes.get(1));
    }
}
