//! Per-paper feature records for downstream regression.

pub mod authors;
pub mod corpus;
pub mod gender;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::graph::CitationGraph;
use crate::resolve::review::ConfidenceTier;
pub use authors::AuthorTable;
pub use corpus::{Annotations, Corpus, PaperRecord};
pub use gender::{Gender, GenderResolver};

/// Feature record of one paper. The author sequences are parallel to
/// `author_ids`, which only lists authors with a canonical id and may be
/// shorter than `genders` (bibliography order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperFeatures {
    pub paper_id: String,
    pub paper_key: String,
    pub title: String,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub month: Option<String>,
    pub countries: Vec<String>,
    pub rank: Option<String>,
    pub tier: ConfidenceTier,
    pub genders: Vec<Gender>,
    pub author_ids: Vec<String>,
    pub author_citations: Vec<u32>,
    pub author_ages: Vec<i32>,
    /// Academic age as of the last corpus year.
    pub author_present_ages: Vec<i32>,
    pub citations: usize,
    pub references: usize,
    pub external_references: usize,
}

impl PaperFeatures {
    /// Author statistics are taken as of the paper's publication year, or
    /// the last corpus year when the paper is undated.
    pub fn compute(
        paper: &PaperRecord,
        graph: &CitationGraph,
        table: &AuthorTable,
        genders: &GenderResolver,
    ) -> Self {
        let as_of = paper.year.unwrap_or(table.year_range().1);
        let mut author_ids = Vec::new();
        let mut author_citations = Vec::new();
        let mut author_ages = Vec::new();
        let mut author_present_ages = Vec::new();
        for id in paper.canonical_author_ids() {
            let (Some(citations), Some(age)) =
                (table.cumulative_citations(id, as_of), table.academic_age(id, as_of))
            else {
                continue;
            };
            author_ids.push(id.to_string());
            author_citations.push(citations);
            author_ages.push(age);
            author_present_ages.push(table.present_academic_age(id).unwrap_or(age));
        }

        Self {
            paper_id: paper.paper_id.clone(),
            paper_key: paper.paper_key.clone(),
            title: paper.bib_title.clone(),
            venue: paper.venue.clone(),
            year: paper.year,
            month: paper.month.clone(),
            countries: paper.countries.iter().cloned().collect(),
            rank: paper.rank.clone(),
            tier: paper.tier,
            genders: paper
                .bib_authors
                .iter()
                .map(|a| genders.resolve(&a.first, &a.last))
                .collect(),
            author_ids,
            author_citations,
            author_ages,
            author_present_ages,
            citations: graph.citation_count(&paper.paper_id),
            references: graph.reference_count(&paper.paper_id),
            external_references: graph.external_reference_count(&paper.paper_id),
        }
    }
}

pub fn extract_features(
    corpus: &Corpus,
    graph: &CitationGraph,
    genders: &GenderResolver,
) -> (AuthorTable, Vec<PaperFeatures>) {
    let table = AuthorTable::compute(corpus, graph);
    let features = corpus
        .iter()
        .map(|paper| PaperFeatures::compute(paper, graph, &table, genders))
        .collect();
    (table, features)
}

pub const FEATURE_HEADER: &str = "paper_id|paper_key|title|venue|year|month|countries|rank|tier|genders|author_ids|author_citations|author_ages|author_present_ages|citations|references|external_references";

fn cell(value: &str) -> String {
    value.replace(['|', '\n', '\r'], " ")
}

fn joined<T: ToString>(values: &[T]) -> String {
    values.iter().map(|v| cell(&v.to_string())).collect::<Vec<_>>().join(";")
}

pub fn feature_row(f: &PaperFeatures) -> String {
    let genders: Vec<&str> = f.genders.iter().map(|g| g.as_str()).collect();
    [
        cell(&f.paper_id),
        cell(&f.paper_key),
        cell(&f.title),
        cell(f.venue.as_deref().unwrap_or("")),
        f.year.map(|y| y.to_string()).unwrap_or_default(),
        cell(f.month.as_deref().unwrap_or("")),
        joined(&f.countries),
        cell(f.rank.as_deref().unwrap_or("unknown")),
        f.tier.as_str().to_string(),
        joined(&genders),
        joined(&f.author_ids),
        joined(&f.author_citations),
        joined(&f.author_ages),
        joined(&f.author_present_ages),
        f.citations.to_string(),
        f.references.to_string(),
        f.external_references.to_string(),
    ]
    .join("|")
}

/// Write the pipe-delimited feature table, replacing `path` atomically.
pub fn write_feature_table(path: &Path, features: &[PaperFeatures]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    writeln!(tmp, "{}", FEATURE_HEADER)?;
    for f in features {
        writeln!(tmp, "{}", feature_row(f))?;
    }
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote {} feature rows to {}", features.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bib::BibAuthor;
    use crate::features::corpus::tests::record;
    use crate::features::gender::FirstNameTable;
    use tempfile::TempDir;

    fn fixture() -> (Corpus, CitationGraph, GenderResolver) {
        let mut p2 = record("P2", 2012, &["a1", "", "a2"], &["usa", "china"]);
        p2.bib_authors = vec![
            BibAuthor { first: "Mary".into(), last: "Smith".into() },
            BibAuthor { first: "Ola".into(), last: "Nordmann".into() },
            BibAuthor { first: "John".into(), last: "Doe".into() },
        ];
        let corpus = Corpus::from_records([
            record("P1", 2010, &["a1"], &["usa"]),
            p2,
            record("P3", 2013, &["a3"], &[]),
        ])
        .unwrap();
        let mut graph = CitationGraph::new(corpus.paper_ids());
        graph.merge_references("P2", &["P1", "EXT"]);
        graph.merge_references("P3", &["P1", "P2"]);
        let genders = GenderResolver::new(
            Vec::new(),
            FirstNameTable::from_lists(["john"], ["mary"]),
            FirstNameTable::default(),
        );
        (corpus, graph, genders)
    }

    #[test]
    fn test_features_align_author_sequences() {
        let (corpus, graph, genders) = fixture();
        let (_, features) = extract_features(&corpus, &graph, &genders);
        let p2 = features.iter().find(|f| f.paper_id == "P2").unwrap();

        assert_eq!(p2.genders, vec![Gender::Female, Gender::Unknown, Gender::Male]);
        assert_eq!(p2.author_ids, vec!["a1", "a2"]);
        // as of 2012: a1 was cited once (by P2 itself), a2 not at all
        assert_eq!(p2.author_citations, vec![1, 0]);
        assert_eq!(p2.author_ages, vec![2, 0]);
        assert_eq!(p2.author_present_ages, vec![3, 1]);
        assert_eq!(p2.countries, vec!["china", "usa"]);
        assert_eq!(p2.citations, 1);
        assert_eq!(p2.references, 1);
        assert_eq!(p2.external_references, 1);
    }

    #[test]
    fn test_feature_table_is_pipe_delimited() {
        let tmp = TempDir::new().unwrap();
        let (corpus, graph, genders) = fixture();
        let (_, features) = extract_features(&corpus, &graph, &genders);
        let path = tmp.path().join("reports").join("features.psv");
        write_feature_table(&path, &features).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], FEATURE_HEADER);
        assert_eq!(lines.len(), 4);
        let columns = FEATURE_HEADER.split('|').count();
        assert!(lines.iter().all(|l| l.split('|').count() == columns));
        assert!(lines[2].contains("|china;usa|"));
        assert!(lines[2].contains("|female;unknown;male|a1;a2|1;0|2;0|3;1|"));
    }
}
