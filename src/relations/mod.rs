//! Relation-to-relation membership graph.
//!
//! Edges are collected while scanning relations and frozen afterwards into
//! sorted flat vectors, so lookups are binary searches and the graph holds no
//! references between relations.

use crate::osm::{ElementKind, Relation};

/// Collects `(parent, member)` edges during the first pass.
#[derive(Debug, Default)]
pub struct RelationGraphBuilder {
    edges: Vec<(u64, u64)>,
}

impl RelationGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edge for every member of `relation` that is itself a relation.
    pub fn add_members(&mut self, relation: &Relation) {
        let parent = relation.id.unsigned_abs();
        for member in &relation.members {
            if member.kind == ElementKind::Relation {
                self.edges.push((parent, member.positive_id()));
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Freezes the collected edges into a graph that can be walked both ways.
    pub fn build_index(self) -> RelationGraph {
        let parent_to_member = RelationsMap::from_pairs(self.edges.clone());
        let member_to_parent = RelationsMap::from_pairs(
            self.edges
                .into_iter()
                .map(|(parent, member)| (member, parent))
                .collect(),
        );
        RelationGraph {
            parent_to_member,
            member_to_parent,
        }
    }

    /// Freezes only the member to parent direction.
    pub fn build_member_to_parent_index(self) -> RelationsMap {
        RelationsMap::from_pairs(
            self.edges
                .into_iter()
                .map(|(parent, member)| (member, parent))
                .collect(),
        )
    }
}

/// Sorted multimap from a relation id to related relation ids.
#[derive(Debug, Default)]
pub struct RelationsMap {
    pairs: Vec<(u64, u64)>,
}

impl RelationsMap {
    fn from_pairs(mut pairs: Vec<(u64, u64)>) -> Self {
        pairs.sort_unstable();
        pairs.dedup();
        Self { pairs }
    }

    pub fn get(&self, key: u64) -> impl Iterator<Item = u64> + '_ {
        let start = self.pairs.partition_point(|&(k, _)| k < key);
        self.pairs[start..]
            .iter()
            .take_while(move |&&(k, _)| k == key)
            .map(|&(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Immutable, bidirectional relation membership index.
#[derive(Debug, Default)]
pub struct RelationGraph {
    parent_to_member: RelationsMap,
    member_to_parent: RelationsMap,
}

impl RelationGraph {
    /// Relations that are members of `id`.
    pub fn members_of(&self, id: u64) -> impl Iterator<Item = u64> + '_ {
        self.parent_to_member.get(id)
    }

    /// Relations that have `id` as a member.
    pub fn parents_of(&self, id: u64) -> impl Iterator<Item = u64> + '_ {
        self.member_to_parent.get(id)
    }

    /// Relations connected to `id` in either direction.
    pub fn neighbors(&self, id: u64) -> impl Iterator<Item = u64> + '_ {
        self.parents_of(id).chain(self.members_of(id))
    }

    pub fn edge_count(&self) -> usize {
        self.parent_to_member.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::osm::{Member, Tags};

    pub(crate) fn relation(id: i64, members: &[(ElementKind, i64)]) -> Relation {
        Relation {
            id,
            members: members
                .iter()
                .map(|&(kind, id)| Member {
                    kind,
                    id,
                    role: String::new(),
                })
                .collect(),
            tags: Tags::new(),
            meta: None,
        }
    }

    #[test]
    fn only_relation_members_become_edges() {
        let mut builder = RelationGraphBuilder::new();
        builder.add_members(&relation(
            1,
            &[
                (ElementKind::Node, 2),
                (ElementKind::Way, 2),
                (ElementKind::Relation, 2),
            ],
        ));
        assert_eq!(builder.edge_count(), 1);

        let graph = builder.build_index();
        assert_eq!(graph.members_of(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(graph.parents_of(2).collect::<Vec<_>>(), vec![1]);
        assert_eq!(graph.members_of(2).count(), 0);
    }

    #[test]
    fn neighbors_cover_both_directions() {
        let mut builder = RelationGraphBuilder::new();
        builder.add_members(&relation(10, &[(ElementKind::Relation, 20)]));
        builder.add_members(&relation(20, &[(ElementKind::Relation, 30)]));
        builder.add_members(&relation(40, &[(ElementKind::Relation, 20)]));
        let graph = builder.build_index();

        let mut neighbors: Vec<u64> = graph.neighbors(20).collect();
        neighbors.sort_unstable();
        assert_eq!(neighbors, vec![10, 30, 40]);
    }

    #[test]
    fn duplicate_members_collapse_to_one_edge() {
        let mut builder = RelationGraphBuilder::new();
        builder.add_members(&relation(
            5,
            &[(ElementKind::Relation, 6), (ElementKind::Relation, 6)],
        ));
        let graph = builder.build_index();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn member_to_parent_index_lists_all_parents() {
        let mut builder = RelationGraphBuilder::new();
        builder.add_members(&relation(3, &[(ElementKind::Relation, 1)]));
        builder.add_members(&relation(2, &[(ElementKind::Relation, 1)]));
        let map = builder.build_member_to_parent_index();
        assert_eq!(map.get(1).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(map.get(3).count(), 0);
    }
}
