//! Cross-country statistics over a year-sliced view of the corpus.

pub mod author_graph;
pub mod gini;
pub mod report;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::features::corpus::normalize_country;
use crate::features::{Corpus, PaperRecord};
use crate::graph::CitationGraph;
pub use author_graph::{AuthorPairGraph, Dominance};
pub use gini::gini;

/// Memoized set of (citing, cited) pairs, keyed on the graph generation it
/// was built from. Rebuilt on first use after the edge set changes.
#[derive(Debug, Default)]
pub struct CitesCache {
    inner: Mutex<Option<(u64, Arc<HashSet<(usize, usize)>>)>>,
    builds: std::sync::atomic::AtomicUsize,
}

impl CitesCache {
    pub fn get_or_build(
        &self,
        generation: u64,
        build: impl FnOnce() -> HashSet<(usize, usize)>,
    ) -> Arc<HashSet<(usize, usize)>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((built_at, pairs)) = inner.as_ref() {
            if *built_at == generation {
                return Arc::clone(pairs);
            }
        }
        let pairs = Arc::new(build());
        self.builds.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::debug!("Built cites cache with {} pairs at generation {}", pairs.len(), generation);
        *inner = Some((generation, Arc::clone(&pairs)));
        pairs
    }

    #[cfg(test)]
    pub fn invalidate(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// How many times the pair set was (re)built.
    #[cfg(test)]
    pub fn builds(&self) -> usize {
        self.builds.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Received-citation multiset summary for one country.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountSummary {
    pub support: usize,
    pub total: usize,
    pub mean: f64,
    pub median: f64,
}

impl CountSummary {
    pub fn from_counts(counts: &[usize]) -> Self {
        if counts.is_empty() {
            return Self::default();
        }
        let mut sorted = counts.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let total: usize = sorted.iter().sum();
        let median = if n % 2 == 1 {
            sorted[n / 2] as f64
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
        };
        Self {
            support: n,
            total,
            mean: total as f64 / n as f64,
            median,
        }
    }
}

/// Per-paper sequences for "papers of A citing papers of B", one slot per
/// citing paper. Ratios are taken over the sums, never averaged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairCounts {
    pub outbound: Vec<usize>,
    pub to_target: Vec<usize>,
    /// Citations to B papers published no later than the citing paper.
    pub to_target_dated: Vec<usize>,
    /// B papers the citing paper could have cited.
    pub candidates: Vec<usize>,
    /// B papers published no later than the citing paper.
    pub dated_candidates: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairStats {
    pub citing_papers: usize,
    pub outbound: usize,
    pub to_target: usize,
    pub fraction: f64,
    pub density_with_year: f64,
    pub density_without_year: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl PairCounts {
    pub fn stats(&self) -> PairStats {
        let sum = |v: &[usize]| v.iter().sum::<usize>();
        let outbound = sum(&self.outbound);
        let to_target = sum(&self.to_target);
        PairStats {
            citing_papers: self.outbound.len(),
            outbound,
            to_target,
            fraction: ratio(to_target, outbound),
            density_with_year: ratio(sum(&self.to_target_dated), sum(&self.dated_candidates)),
            density_without_year: ratio(to_target, sum(&self.candidates)),
        }
    }
}

/// Key of a country pair in reports: `citing#cited`.
pub fn pair_key(citing: &str, cited: &str) -> String {
    format!("{}#{}", citing, cited)
}

/// Statistics engine over one frozen snapshot: the corpus papers published
/// no later than `year_threshold` (all papers when unset) and the citations
/// among them.
pub struct StatsEngine<'a> {
    corpus: &'a Corpus,
    graph: CitationGraph,
    year_threshold: Option<i32>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    years: Vec<Option<i32>>,
    by_country: BTreeMap<String, Vec<usize>>,
    cites: CitesCache,
}

impl<'a> StatsEngine<'a> {
    pub fn new(corpus: &'a Corpus, graph: &CitationGraph, year_threshold: Option<i32>) -> Self {
        let keep: HashSet<&str> = corpus
            .iter()
            .filter(|p| graph.is_known(&p.paper_id))
            .filter(|p| match year_threshold {
                Some(t) => p.year.is_some_and(|y| y <= t),
                None => true,
            })
            .map(|p| p.paper_id.as_str())
            .collect();
        let view = graph.restricted_to(&keep);

        let mut ids: Vec<String> = view.paper_ids().map(String::from).collect();
        ids.sort_unstable();
        let index: HashMap<String, usize> = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        let years: Vec<Option<i32>> = ids.iter().map(|id| corpus.year(id)).collect();
        let mut by_country: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            for country in corpus.get(id).into_iter().flat_map(|p| p.countries.iter()) {
                by_country.entry(country.clone()).or_default().push(i);
            }
        }

        tracing::info!(
            "Statistics view (year threshold {:?}): {} papers, {} edges, {} countries",
            year_threshold,
            ids.len(),
            view.edge_count(),
            by_country.len()
        );
        Self {
            corpus,
            graph: view,
            year_threshold,
            ids,
            index,
            years,
            by_country,
            cites: CitesCache::default(),
        }
    }

    pub fn year_threshold(&self) -> Option<i32> {
        self.year_threshold
    }

    pub fn paper_count(&self) -> usize {
        self.ids.len()
    }

    fn record(&self, idx: usize) -> Option<&'a PaperRecord> {
        self.corpus.get(&self.ids[idx])
    }

    fn country_papers(&self, country: &str) -> &[usize] {
        self.by_country
            .get(&normalize_country(country))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn cite_pairs(&self) -> Arc<HashSet<(usize, usize)>> {
        self.cites.get_or_build(self.graph.generation(), || {
            self.graph
                .edges()
                .filter_map(|(s, t)| Some((*self.index.get(s)?, *self.index.get(t)?)))
                .collect()
        })
    }

    /// Country → its papers; a multi-country paper is listed under each.
    pub fn country_publications(&self) -> BTreeMap<String, Vec<String>> {
        self.by_country
            .iter()
            .map(|(c, papers)| (c.clone(), papers.iter().map(|&i| self.ids[i].clone()).collect()))
            .collect()
    }

    pub fn publication_counts(&self) -> BTreeMap<String, usize> {
        self.by_country.iter().map(|(c, p)| (c.clone(), p.len())).collect()
    }

    /// Received citations per paper, attributed in full to every country of
    /// the paper. With `within_years`, only citations from papers published
    /// at most that many years after the cited one count.
    pub fn country_cited_counts(&self, within_years: Option<i32>) -> BTreeMap<String, Vec<usize>> {
        self.by_country
            .iter()
            .map(|(country, papers)| {
                let counts = papers
                    .iter()
                    .map(|&i| {
                        self.graph
                            .cited_by(&self.ids[i])
                            .filter(|citing| match within_years {
                                None => true,
                                Some(w) => match (self.years[i], self.corpus.year(citing)) {
                                    (Some(cited_year), Some(citing_year)) => citing_year - cited_year <= w,
                                    _ => false,
                                },
                            })
                            .count()
                    })
                    .collect();
                (country.clone(), counts)
            })
            .collect()
    }

    pub fn country_cited_summary(&self, within_years: Option<i32>) -> BTreeMap<String, CountSummary> {
        self.country_cited_counts(within_years)
            .into_iter()
            .map(|(c, counts)| (c, CountSummary::from_counts(&counts)))
            .collect()
    }

    /// The `k` countries with most publications, skipping `excluded`. Ties
    /// break on name.
    pub fn top_countries(&self, k: usize, excluded: &[String]) -> Vec<String> {
        let excluded: HashSet<String> = excluded.iter().map(|c| normalize_country(c)).collect();
        let mut ranked: Vec<(&String, usize)> = self
            .by_country
            .iter()
            .filter(|(c, _)| !excluded.contains(*c))
            .map(|(c, p)| (c, p.len()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(k).map(|(c, _)| c.clone()).collect()
    }

    fn pair_counts_over(&self, citing: impl Iterator<Item = usize>, cited: &str) -> PairCounts {
        let targets = self.country_papers(cited);
        let pairs = self.cite_pairs();
        let mut counts = PairCounts::default();
        for p in citing {
            let p_year = self.years[p];
            let (mut to_target, mut to_target_dated, mut candidates, mut dated) = (0, 0, 0, 0);
            for &q in targets {
                if q == p {
                    continue;
                }
                candidates += 1;
                let is_dated = matches!((p_year, self.years[q]), (Some(py), Some(qy)) if qy <= py);
                if is_dated {
                    dated += 1;
                }
                if pairs.contains(&(p, q)) {
                    to_target += 1;
                    if is_dated {
                        to_target_dated += 1;
                    }
                }
            }
            counts.outbound.push(self.graph.reference_count(&self.ids[p]));
            counts.to_target.push(to_target);
            counts.to_target_dated.push(to_target_dated);
            counts.candidates.push(candidates);
            counts.dated_candidates.push(dated);
        }
        counts
    }

    /// Per-paper counts for papers of `citing` towards papers of `cited`.
    pub fn pair_counts(&self, citing: &str, cited: &str) -> PairCounts {
        self.pair_counts_over(self.country_papers(citing).iter().copied(), cited)
    }

    /// Pair statistics for every ordered pair of `countries` (diagonal
    /// included), keyed `citing#cited`.
    pub fn pair_stats(&self, countries: &[String]) -> BTreeMap<String, PairStats> {
        let mut out = BTreeMap::new();
        for a in countries {
            for b in countries {
                out.insert(pair_key(a, b), self.pair_counts(a, b).stats());
            }
        }
        out
    }

    fn fractions(&self, citing: &[usize], countries: &[String]) -> Option<Vec<f64>> {
        let mut fractions = Vec::with_capacity(countries.len());
        for cited in countries {
            let stats = self.pair_counts_over(citing.iter().copied(), cited).stats();
            if stats.outbound == 0 {
                return None;
            }
            fractions.push(stats.fraction);
        }
        Some(fractions)
    }

    /// Gini of the citation fractions `citing` sends to each of `countries`.
    pub fn citation_gini(&self, citing: &str, countries: &[String]) -> f64 {
        self.fractions(self.country_papers(citing), countries)
            .map_or(0.0, |f| gini(&f))
    }

    /// [`Self::citation_gini`] restricted to citing papers of each year.
    /// Years in which the country sent no citations are left out.
    pub fn gini_series(&self, citing: &str, countries: &[String]) -> BTreeMap<i32, f64> {
        let mut by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for &p in self.country_papers(citing) {
            if let Some(y) = self.years[p] {
                by_year.entry(y).or_default().push(p);
            }
        }
        by_year
            .into_iter()
            .filter_map(|(year, papers)| Some((year, gini(&self.fractions(&papers, countries)?))))
            .collect()
    }

    /// Undirected author graph for a country pair with edges only where the
    /// citation flow dominates in both directions.
    pub fn author_pair_graph(&self, a: &str, b: &str, threshold: Dominance) -> AuthorPairGraph {
        let in_a: HashSet<usize> = self.country_papers(a).iter().copied().collect();
        let in_b: HashSet<usize> = self.country_papers(b).iter().copied().collect();
        let mut flows = author_graph::AuthorCitations::default();

        for &p in in_a.union(&in_b) {
            let Some(citing) = self.record(p) else { continue };
            for target in self.graph.references(&self.ids[p]) {
                let Some(&q) = self.index.get(target) else { continue };
                let crosses = (in_a.contains(&p) && in_b.contains(&q)) || (in_b.contains(&p) && in_a.contains(&q));
                if !crosses {
                    continue;
                }
                let Some(cited) = self.record(q) else { continue };
                for x in citing.canonical_author_ids() {
                    for y in cited.canonical_author_ids() {
                        flows.record(x, y);
                    }
                }
            }
        }
        flows.dominant_graph(&normalize_country(a), &normalize_country(b), threshold)
    }
}

#[cfg(test)]
impl StatsEngine<'_> {
    pub fn cites_cache(&self) -> &CitesCache {
        &self.cites
    }

    /// Extend the view with more references of an in-scope paper.
    pub fn merge_references<S: AsRef<str>>(
        &mut self,
        source: &str,
        targets: &[S],
    ) -> crate::graph::MergeStats {
        self.graph.merge_references(source, targets)
    }

    /// Whether `citing` cites `cited`, answered from the memoized pair set.
    pub fn cites(&self, citing: &str, cited: &str) -> bool {
        match (self.index.get(citing), self.index.get(cited)) {
            (Some(&a), Some(&b)) => self.cite_pairs().contains(&(a, b)),
            _ => false,
        }
    }
}
