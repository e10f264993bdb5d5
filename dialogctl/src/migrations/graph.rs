//! Validation and ordering of the revision graph.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{MigrationError, Result, Revision};

/// A validated revision graph.
///
/// Construction guarantees that ids are unique, every down revision exists, there is exactly one
/// base revision and the graph has no cycles. The topological order is computed once and reused:
/// any subset of revisions listed in that order is itself correctly ordered.
#[derive(Debug, Clone)]
pub struct RevisionGraph {
    revisions: Vec<Revision>,
    index: HashMap<&'static str, usize>,
    children: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl RevisionGraph {
    pub fn new(revisions: Vec<Revision>) -> Result<Self> {
        if revisions.is_empty() {
            return Err(MigrationError::Empty);
        }

        let mut index = HashMap::with_capacity(revisions.len());
        for (i, revision) in revisions.iter().enumerate() {
            if index.insert(revision.id, i).is_some() {
                return Err(MigrationError::DuplicateRevision(revision.id.to_string()));
            }
        }

        let mut children = vec![Vec::new(); revisions.len()];
        for (i, revision) in revisions.iter().enumerate() {
            for parent in revision.down_revisions {
                let parent_idx = *index.get(parent).ok_or_else(|| MigrationError::UnknownDownRevision {
                    revision: revision.id.to_string(),
                    missing: parent.to_string(),
                })?;
                children[parent_idx].push(i);
            }
        }

        let bases: Vec<String> = revisions
            .iter()
            .filter(|r| r.down_revisions.is_empty())
            .map(|r| r.id.to_string())
            .collect();
        if bases.len() != 1 {
            return Err(MigrationError::BaseRevision(bases));
        }

        // Kahn's algorithm; the ready set is ordered by declaration index so the result is stable
        let mut remaining: Vec<usize> = revisions.iter().map(|r| r.down_revisions.len()).collect();
        let mut ready: BTreeSet<usize> = remaining.iter().enumerate().filter(|(_, n)| **n == 0).map(|(i, _)| i).collect();
        let mut order = Vec::with_capacity(revisions.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &child in &children[next] {
                remaining[child] -= 1;
                if remaining[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() != revisions.len() {
            let stuck = remaining
                .iter()
                .position(|n| *n > 0)
                .map(|i| revisions[i].id.to_string())
                .unwrap_or_default();
            return Err(MigrationError::Cycle(stuck));
        }

        Ok(Self {
            revisions,
            index,
            children,
            order,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.index.get(id).map(|&i| &self.revisions[i])
    }

    fn require(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| MigrationError::UnknownRevision(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// The single revision without down revisions.
    pub fn base(&self) -> &Revision {
        &self.revisions[self.order[0]]
    }

    /// Revisions nothing else builds on, in declaration order.
    pub fn heads(&self) -> Vec<&'static str> {
        self.revisions
            .iter()
            .enumerate()
            .filter(|(i, _)| self.children[*i].is_empty())
            .map(|(_, r)| r.id)
            .collect()
    }

    pub fn is_merge(&self, id: &str) -> Result<bool> {
        Ok(self.revisions[self.require(id)?].is_merge())
    }

    /// All revisions in dependency order.
    pub fn topological_order(&self) -> Vec<&Revision> {
        self.order.iter().map(|&i| &self.revisions[i]).collect()
    }

    /// The revision and everything it transitively depends on.
    pub fn ancestors(&self, id: &str) -> Result<HashSet<&'static str>> {
        self.closure([id])
    }

    /// Union of the ancestor sets (inclusive) of every given revision.
    pub fn closure<'a, I>(&self, ids: I) -> Result<HashSet<&'static str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let mut stack = Vec::new();
        for id in ids {
            stack.push(self.require(id)?);
        }

        while let Some(i) = stack.pop() {
            let revision = &self.revisions[i];
            if seen.insert(revision.id) {
                for parent in revision.down_revisions {
                    stack.push(self.index[parent]);
                }
            }
        }

        Ok(seen)
    }

    /// Members of `set` in dependency order.
    pub fn ordered<'s>(&self, set: &HashSet<&'s str>) -> Vec<&Revision> {
        self.order
            .iter()
            .map(|&i| &self.revisions[i])
            .filter(|r| set.contains(r.id))
            .collect()
    }

    /// The heads of an applied set: members with no child that is also a member.
    ///
    /// The set is expected to be ancestor-closed, as produced by [`RevisionGraph::closure`].
    pub fn heads_of(&self, set: &HashSet<&str>) -> Vec<&'static str> {
        self.order
            .iter()
            .filter(|&&i| set.contains(self.revisions[i].id))
            .filter(|&&i| !self.children[i].iter().any(|&c| set.contains(self.revisions[c].id)))
            .map(|&i| self.revisions[i].id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(id: &'static str, down: &'static [&'static str]) -> Revision {
        Revision {
            id,
            description: "",
            down_revisions: down,
            upgrade: "SELECT 1",
            downgrade: "SELECT 1",
        }
    }

    fn diamond() -> RevisionGraph {
        RevisionGraph::new(vec![
            rev("a", &[]),
            rev("b", &["a"]),
            rev("c", &["a"]),
            rev("d", &["b", "c"]),
            rev("e", &["d"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_topological_order_respects_merges() {
        let graph = diamond();
        let order: Vec<_> = graph.topological_order().iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let graph = RevisionGraph::new(vec![rev("a", &[]), rev("z", &["a"]), rev("m", &["a"])]).unwrap();
        let order: Vec<_> = graph.topological_order().iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["a", "z", "m"]);
    }

    #[test]
    fn test_out_of_order_declaration_still_sorted() {
        let graph = RevisionGraph::new(vec![rev("b", &["a"]), rev("a", &[])]).unwrap();
        let order: Vec<_> = graph.topological_order().iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_heads_and_base() {
        let graph = diamond();
        assert_eq!(graph.base().id, "a");
        assert_eq!(graph.heads(), vec!["e"]);

        let branched = RevisionGraph::new(vec![rev("a", &[]), rev("b", &["a"]), rev("c", &["a"])]).unwrap();
        assert_eq!(branched.heads(), vec!["b", "c"]);
    }

    #[test]
    fn test_ancestors_inclusive() {
        let graph = diamond();
        let ancestors = graph.ancestors("d").unwrap();
        assert_eq!(ancestors, HashSet::from(["a", "b", "c", "d"]));

        let only_base = graph.ancestors("a").unwrap();
        assert_eq!(only_base, HashSet::from(["a"]));
    }

    #[test]
    fn test_heads_of_partial_set() {
        let graph = diamond();
        let applied = graph.closure(["b", "c"]).unwrap();
        assert_eq!(graph.heads_of(&applied), vec!["b", "c"]);

        let applied = graph.closure(["d"]).unwrap();
        assert_eq!(graph.heads_of(&applied), vec!["d"]);

        assert!(graph.heads_of(&HashSet::new()).is_empty());
    }

    #[test]
    fn test_is_merge() {
        let graph = diamond();
        assert!(graph.is_merge("d").unwrap());
        assert!(!graph.is_merge("b").unwrap());
        assert!(matches!(graph.is_merge("nope"), Err(MigrationError::UnknownRevision(_))));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = RevisionGraph::new(vec![rev("a", &[]), rev("a", &[])]).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateRevision(id) if id == "a"));
    }

    #[test]
    fn test_rejects_unknown_parent() {
        let err = RevisionGraph::new(vec![rev("a", &[]), rev("b", &["x"])]).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownDownRevision { missing, .. } if missing == "x"));
    }

    #[test]
    fn test_rejects_multiple_bases() {
        let err = RevisionGraph::new(vec![rev("a", &[]), rev("b", &[])]).unwrap_err();
        assert!(matches!(err, MigrationError::BaseRevision(bases) if bases.len() == 2));
    }

    #[test]
    fn test_rejects_cycles() {
        let err = RevisionGraph::new(vec![rev("a", &[]), rev("b", &["a", "c"]), rev("c", &["b"])]).unwrap_err();
        assert!(matches!(err, MigrationError::Cycle(_)));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(RevisionGraph::new(vec![]), Err(MigrationError::Empty)));
    }
}
