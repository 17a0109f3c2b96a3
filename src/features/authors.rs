use std::collections::{BTreeSet, HashMap};

use super::corpus::Corpus;
use crate::graph::CitationGraph;

#[derive(Debug, Clone, PartialEq)]
struct AuthorStats {
    /// Year of the author's earliest dated paper in the corpus.
    pub first_year: Option<i32>,
    /// Running citation total, one slot per corpus year.
    cumulative: Vec<u32>,
}

/// Per-author cumulative citation counts over the corpus year range.
///
/// A citation from paper P to paper Q is an event in P's publication year,
/// credited once to every canonical author of Q. Authors without a canonical
/// id are not tracked.
#[derive(Debug, Clone, Default)]
pub struct AuthorTable {
    start_year: i32,
    end_year: i32,
    authors: HashMap<String, AuthorStats>,
}

impl AuthorTable {
    pub fn compute(corpus: &Corpus, graph: &CitationGraph) -> Self {
        let Some((start_year, end_year)) = corpus.year_range() else {
            return Self::default();
        };
        let span = (end_year - start_year + 1) as usize;

        let mut authors: HashMap<String, AuthorStats> = HashMap::new();
        for paper in corpus.iter() {
            for author in &paper.authors {
                let Some(id) = &author.author_id else { continue };
                let stats = authors.entry(id.clone()).or_insert_with(|| AuthorStats {
                    first_year: None,
                    cumulative: vec![0; span],
                });
                if let Some(year) = paper.year {
                    stats.first_year = Some(stats.first_year.map_or(year, |y| y.min(year)));
                }
            }
        }

        for (citing, cited) in graph.edges() {
            let Some(year) = corpus.year(citing) else { continue };
            let Some(cited) = corpus.get(cited) else { continue };
            let slot = (year - start_year) as usize;
            let ids: BTreeSet<&str> = cited.canonical_author_ids().into_iter().collect();
            for id in ids {
                if let Some(stats) = authors.get_mut(id) {
                    stats.cumulative[slot] += 1;
                }
            }
        }

        for stats in authors.values_mut() {
            let mut running = 0;
            for slot in stats.cumulative.iter_mut() {
                running += *slot;
                *slot = running;
            }
        }

        tracing::info!(
            "Author table: {} authors over {}..={}",
            authors.len(),
            start_year,
            end_year
        );
        Self { start_year, end_year, authors }
    }

    pub fn year_range(&self) -> (i32, i32) {
        (self.start_year, self.end_year)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    /// Citations received up to and including `year`. Years past the range
    /// report the final total.
    pub fn cumulative_citations(&self, author_id: &str, year: i32) -> Option<u32> {
        let stats = self.authors.get(author_id)?;
        if year < self.start_year {
            return Some(0);
        }
        let slot = ((year - self.start_year) as usize).min(stats.cumulative.len().saturating_sub(1));
        Some(stats.cumulative.get(slot).copied().unwrap_or(0))
    }

    /// Years since the author's first paper, as of `year`.
    pub fn academic_age(&self, author_id: &str, year: i32) -> Option<i32> {
        let first = self.authors.get(author_id)?.first_year?;
        Some(year - first)
    }

    /// Age as of the last corpus year.
    pub fn present_academic_age(&self, author_id: &str) -> Option<i32> {
        self.academic_age(author_id, self.end_year)
    }

    /// Citation total as of the last corpus year.
    #[cfg(test)]
    pub fn total_citations(&self, author_id: &str) -> Option<u32> {
        self.cumulative_citations(author_id, self.end_year)
    }
}
