//! Closed-world citation graph over the papers of one corpus.

pub mod builder;
pub mod store;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

pub use builder::{build_or_extend, BuildSummary};
pub use store::ReferenceStore;

/// Directed graph of paper → referenced paper.
///
/// Only edges between two known papers are kept; self-loops and duplicates
/// are never recorded. The cited-by index is maintained exclusively by
/// [`CitationGraph::merge_references`], so it is always the exact inverse of
/// the forward index.
#[derive(Debug, Clone, Default)]
pub struct CitationGraph {
    forward: HashMap<String, BTreeSet<String>>,
    reverse: HashMap<String, BTreeSet<String>>,
    external_refs: HashMap<String, usize>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub duplicate: usize,
    pub external: usize,
    pub self_loops: usize,
}

impl CitationGraph {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            forward: known.into_iter().map(|id| (id.into(), BTreeSet::new())).collect(),
            ..Self::default()
        }
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.forward.contains_key(id)
    }

    pub fn paper_count(&self) -> usize {
        self.forward.len()
    }

    pub fn paper_ids(&self) -> impl Iterator<Item = &str> {
        self.forward.keys().map(String::as_str)
    }

    /// Merge the reference list of `source`. References to unknown papers are
    /// counted but not stored.
    pub fn merge_references<S: AsRef<str>>(&mut self, source: &str, targets: &[S]) -> MergeStats {
        let mut stats = MergeStats::default();
        if !self.is_known(source) {
            stats.external = targets.len();
            return stats;
        }
        let mut new_edges = Vec::new();
        for target in targets {
            let target = target.as_ref();
            if target == source {
                stats.self_loops += 1;
            } else if !self.forward.contains_key(target) {
                stats.external += 1;
            } else if self.forward[source].contains(target) || new_edges.iter().any(|t| t == target) {
                stats.duplicate += 1;
            } else {
                new_edges.push(target.to_string());
            }
        }

        *self.external_refs.entry(source.to_string()).or_default() += stats.external;
        stats.added = new_edges.len();
        if let Some(refs) = self.forward.get_mut(source) {
            for target in new_edges {
                self.reverse
                    .entry(target.clone())
                    .or_default()
                    .insert(source.to_string());
                refs.insert(target);
            }
        }
        if stats.added > 0 {
            self.generation += 1;
        }
        stats
    }

    pub fn references(&self, id: &str) -> impl Iterator<Item = &str> {
        self.forward.get(id).into_iter().flatten().map(String::as_str)
    }

    pub fn cited_by(&self, id: &str) -> impl Iterator<Item = &str> {
        self.reverse.get(id).into_iter().flatten().map(String::as_str)
    }

    #[cfg(test)]
    pub fn cites(&self, citing: &str, cited: &str) -> bool {
        self.forward.get(citing).is_some_and(|r| r.contains(cited))
    }

    pub fn citation_count(&self, id: &str) -> usize {
        self.reverse.get(id).map_or(0, BTreeSet::len)
    }

    pub fn reference_count(&self, id: &str) -> usize {
        self.forward.get(id).map_or(0, BTreeSet::len)
    }

    /// References of `id` that pointed outside the corpus.
    pub fn external_reference_count(&self, id: &str) -> usize {
        self.external_refs.get(id).copied().unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .flat_map(|(s, ts)| ts.iter().map(move |t| (s.as_str(), t.as_str())))
    }

    /// Bumped on every merge that adds an edge; lets derived caches detect
    /// that they are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The `k` most cited papers, ties broken by id.
    pub fn top_cited(&self, k: usize) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = self
            .reverse
            .iter()
            .map(|(id, by)| (id.as_str(), by.len()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        counts.truncate(k);
        counts
    }

    /// Recompute the cited-by index from the forward index alone.
    #[cfg(test)]
    pub fn derive_reverse(&self) -> HashMap<String, BTreeSet<String>> {
        let mut reverse: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (source, target) in self.edges() {
            reverse
                .entry(target.to_string())
                .or_default()
                .insert(source.to_string());
        }
        reverse
    }

    /// A copy restricted to `keep`, as used for year-threshold views.
    pub fn restricted_to(&self, keep: &HashSet<&str>) -> CitationGraph {
        let mut view = CitationGraph::new(self.paper_ids().filter(|id| keep.contains(id)));
        let ids: Vec<String> = view.forward.keys().cloned().collect();
        for id in ids {
            let targets: Vec<&str> = self.references(&id).collect();
            view.merge_references(&id, targets.as_slice());
        }
        view
    }
}
