use std::collections::{HashMap, HashSet, VecDeque};

use super::{Revision, RevisionMetadata};

/// A partial view of a repository's history: the revisions visited by a
/// walk, each with the metadata resolved for it.
///
/// Parents that were never visited (because the walk stopped there) are not
/// part of the graph even though they appear in some node's metadata.
#[derive(Debug, Clone, Default)]
pub struct RevisionGraph {
    roots: Vec<Revision>,
    nodes: HashMap<Revision, RevisionMetadata>,
    visit_order: Vec<Revision>,
}

impl RevisionGraph {
    pub fn builder(roots: Vec<Revision>) -> RevisionGraphBuilder {
        RevisionGraphBuilder {
            graph: RevisionGraph {
                roots,
                ..Default::default()
            },
        }
    }

    pub fn roots(&self) -> &[Revision] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, revision: &Revision) -> bool {
        self.nodes.contains_key(revision)
    }

    pub fn metadata(&self, revision: &Revision) -> Option<&RevisionMetadata> {
        self.nodes.get(revision)
    }

    /// Revisions in the order the walk added them.
    pub fn revisions(&self) -> &[Revision] {
        &self.visit_order
    }

    /// Breadth-first from the roots, child before parent, each node once.
    pub fn breadth_first_history(&self) -> Vec<Revision> {
        let mut history = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut work: VecDeque<&Revision> = self.roots.iter().collect();
        while let Some(current) = work.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(md) = self.nodes.get(current) {
                history.push(current.clone());
                work.extend(md.parents.iter());
            }
        }
        history
    }

    /// Depth-first pre-order from the roots, first parent explored first.
    pub fn depth_first_history(&self) -> Vec<Revision> {
        let mut history = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<&Revision> = self.roots.iter().rev().collect();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(md) = self.nodes.get(current) {
                history.push(current.clone());
                stack.extend(md.parents.iter().rev());
            }
        }
        history
    }
}

pub struct RevisionGraphBuilder {
    graph: RevisionGraph,
}

impl RevisionGraphBuilder {
    /// Adds a visited revision. Returns false (and keeps the first metadata)
    /// if it was already present.
    pub fn add_revision(&mut self, revision: Revision, metadata: RevisionMetadata) -> bool {
        if self.graph.nodes.contains_key(&revision) {
            return false;
        }
        self.graph.visit_order.push(revision.clone());
        self.graph.nodes.insert(revision, metadata);
        true
    }

    pub fn build(self) -> RevisionGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(id: &str) -> Revision {
        Revision::new(id, "repo")
    }

    fn md(id: &str, parents: &[&str]) -> RevisionMetadata {
        RevisionMetadata::new(id, parents.iter().map(|p| rev(p)).collect())
    }

    // 4 -> {3a, 3b}; 3a -> 2; 3b -> 2; 2 -> 1
    fn diamond() -> RevisionGraph {
        let mut b = RevisionGraph::builder(vec![rev("4")]);
        b.add_revision(rev("4"), md("4", &["3a", "3b"]));
        b.add_revision(rev("3a"), md("3a", &["2"]));
        b.add_revision(rev("3b"), md("3b", &["2"]));
        b.add_revision(rev("2"), md("2", &["1"]));
        b.add_revision(rev("1"), md("1", &[]));
        b.build()
    }

    fn ids(revs: Vec<Revision>) -> Vec<String> {
        revs.into_iter().map(|r| r.rev_id).collect()
    }

    #[test]
    fn breadth_first_visits_diamond_once() {
        assert_eq!(
            ids(diamond().breadth_first_history()),
            vec!["4", "3a", "3b", "2", "1"]
        );
    }

    #[test]
    fn depth_first_follows_first_parent() {
        assert_eq!(
            ids(diamond().depth_first_history()),
            vec!["4", "3a", "2", "1", "3b"]
        );
    }

    #[test]
    fn unvisited_parents_are_excluded() {
        let mut b = RevisionGraph::builder(vec![rev("2")]);
        b.add_revision(rev("2"), md("2", &["1"]));
        let g = b.build();
        assert_eq!(ids(g.breadth_first_history()), vec!["2"]);
        assert!(!g.contains(&rev("1")));
    }

    #[test]
    fn duplicate_add_keeps_first() {
        let mut b = RevisionGraph::builder(vec![rev("1")]);
        assert!(b.add_revision(rev("1"), md("1", &[])));
        assert!(!b.add_revision(rev("1"), md("other", &[])));
        let g = b.build();
        assert_eq!(g.len(), 1);
        assert_eq!(g.metadata(&rev("1")).unwrap().id, "1");
    }
}
