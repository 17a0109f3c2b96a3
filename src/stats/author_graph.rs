use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Threshold an author-to-author citation flow must reach to dominate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Dominance {
    /// At least this many citations.
    Count(u32),
    /// At least this share of the citing author's outbound citations
    /// within the country pair.
    Fraction(f64),
}

/// Directed author → author citation counts.
#[derive(Debug, Clone, Default)]
pub struct AuthorCitations {
    counts: HashMap<(String, String), u32>,
    outbound: HashMap<String, u32>,
}

impl AuthorCitations {
    pub fn record(&mut self, citing: &str, cited: &str) {
        if citing == cited {
            return;
        }
        *self
            .counts
            .entry((citing.to_string(), cited.to_string()))
            .or_default() += 1;
        *self.outbound.entry(citing.to_string()).or_default() += 1;
    }

    pub fn count(&self, citing: &str, cited: &str) -> u32 {
        self.counts
            .get(&(citing.to_string(), cited.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn dominates(&self, citing: &str, cited: &str, threshold: Dominance) -> bool {
        let count = self.count(citing, cited);
        if count == 0 {
            return false;
        }
        match threshold {
            Dominance::Count(min) => count >= min,
            Dominance::Fraction(share) => {
                let total = self.outbound.get(citing).copied().unwrap_or(0);
                total > 0 && f64::from(count) / f64::from(total) >= share
            }
        }
    }

    /// Undirected graph keeping a pair only when each author dominates the
    /// other's direction.
    pub fn dominant_graph(&self, country_a: &str, country_b: &str, threshold: Dominance) -> AuthorPairGraph {
        let mut edges = BTreeSet::new();
        for (x, y) in self.counts.keys() {
            if x < y && self.dominates(x, y, threshold) && self.dominates(y, x, threshold) {
                edges.insert((x.clone(), y.clone()));
            }
        }
        let nodes: BTreeSet<String> = edges.iter().flat_map(|(x, y)| [x.clone(), y.clone()]).collect();
        let edges: Vec<(String, String)> = edges.into_iter().collect();
        let triangles = count_triangles(&edges);
        tracing::info!(
            "Author graph {}#{}: {} nodes, {} edges, {} triangles",
            country_a,
            country_b,
            nodes.len(),
            edges.len(),
            triangles
        );
        AuthorPairGraph {
            country_a: country_a.to_string(),
            country_b: country_b.to_string(),
            threshold,
            nodes,
            edges,
            triangles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorPairGraph {
    pub country_a: String,
    pub country_b: String,
    pub threshold: Dominance,
    pub nodes: BTreeSet<String>,
    pub edges: Vec<(String, String)>,
    /// Number of 3-cliques.
    pub triangles: usize,
}

/// Count 3-cliques in an undirected edge list.
pub fn count_triangles(edges: &[(String, String)]) -> usize {
    let mut adjacent: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (x, y) in edges {
        if x == y {
            continue;
        }
        adjacent.entry(x.as_str()).or_default().insert(y.as_str());
        adjacent.entry(y.as_str()).or_default().insert(x.as_str());
    }
    let mut triangles = 0;
    for (&u, neighbours) in &adjacent {
        for &v in neighbours.iter().filter(|&&v| v > u) {
            triangles += adjacent[v]
                .iter()
                .filter(|&&w| w > v && neighbours.contains(w))
                .count();
        }
    }
    triangles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flows(pairs: &[(&str, &str, u32)]) -> AuthorCitations {
        let mut f = AuthorCitations::default();
        for (x, y, n) in pairs {
            for _ in 0..*n {
                f.record(x, y);
            }
        }
        f
    }

    #[test]
    fn test_edges_need_both_directions() {
        let f = flows(&[("a", "b", 3), ("b", "a", 2), ("a", "c", 5), ("c", "a", 0)]);
        let g = f.dominant_graph("usa", "china", Dominance::Count(2));
        assert_eq!(g.edges, vec![("a".to_string(), "b".to_string())]);
        assert!(!g.nodes.contains("c"));

        let g = f.dominant_graph("usa", "china", Dominance::Count(3));
        assert!(g.edges.is_empty());
    }

    #[test]
    fn test_fraction_uses_pair_scoped_outbound() {
        // a: 3 of 8 citations go to b; b: all of its citations go to a
        let f = flows(&[("a", "b", 3), ("a", "c", 5), ("b", "a", 1)]);
        assert!(f.dominates("b", "a", Dominance::Fraction(0.5)));
        assert!(!f.dominates("a", "b", Dominance::Fraction(0.5)));
        assert!(f.dominates("a", "b", Dominance::Fraction(0.375)));
        assert_eq!(f.dominant_graph("x", "y", Dominance::Fraction(0.3)).edges.len(), 1);
    }

    #[test]
    fn test_self_citation_ignored() {
        let f = flows(&[("a", "a", 4)]);
        assert_eq!(f.count("a", "a"), 0);
    }

    #[test]
    fn test_triangles() {
        let e = |x: &str, y: &str| (x.to_string(), y.to_string());
        let edges = vec![e("a", "b"), e("b", "c"), e("a", "c"), e("c", "d"), e("b", "d")];
        assert_eq!(count_triangles(&edges), 2);
        assert_eq!(count_triangles(&edges[..2]), 0);

        let f = flows(&[("a", "b", 1), ("b", "a", 1), ("b", "c", 1), ("c", "b", 1), ("a", "c", 1), ("c", "a", 1)]);
        assert_eq!(f.dominant_graph("x", "y", Dominance::Count(1)).triangles, 1);
    }
}
