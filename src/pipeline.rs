//! Stage orchestration over the persisted state in the data directory.
//!
//! Every stage reopens its inputs from disk, so any stage can be re-run on
//! its own and an interrupted run resumes where the files left off.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::apis::MetadataLookup;
use crate::bib::{self, BibEntry};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::features::corpus::{assign_paper_ids, AssignmentSummary, CorpusSummary};
use crate::features::{self, Annotations, Corpus, GenderResolver};
use crate::graph::{self, BuildSummary, CitationGraph, ReferenceStore};
use crate::persist;
use crate::resolve::review::{self, Reviewer};
use crate::resolve::store::{self as resolution_store, ResolutionStore};
use crate::resolve::{self, ResolveSummary};
use crate::stats::report::{CountryReport, ReportOptions};
use crate::stats::{AuthorPairGraph, Dominance, StatsEngine};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub data_dir: PathBuf,
    pub resolutions: usize,
    pub confident_resolutions: usize,
    pub filtered: usize,
    pub papers_with_references: usize,
    pub cache_entries: usize,
}

pub fn status(config: &Config) -> Result<PipelineStatus> {
    let store = ResolutionStore::open(&config.resolutions_path())
        .context("Failed to open resolution table")?;
    let (confident, total) = store.confidence_counts();
    let filtered = resolution_store::load_filtered(&config.filtered_path())?.len();
    let references = ReferenceStore::open(&config.references_path())
        .context("Failed to open reference table")?;
    let cache = ResponseCache::open(&config.cache_dir()).context("Failed to open response cache")?;
    Ok(PipelineStatus {
        data_dir: config.data_dir.clone(),
        resolutions: total,
        confident_resolutions: confident,
        filtered,
        papers_with_references: references.len(),
        cache_entries: cache.len(),
    })
}

fn load_bibliography(config: &Config) -> Result<Vec<BibEntry>> {
    bib::load_bibliography(&config.bib_path)
}

pub async fn resolve_papers(config: &Config, lookup: &dyn MetadataLookup) -> Result<ResolveSummary> {
    let entries = load_bibliography(config)?;
    let mut store = ResolutionStore::open(&config.resolutions_path())
        .context("Failed to open resolution table")?;
    let summary = resolve::resolve_all(lookup, &mut store, &entries).await?;
    Ok(summary)
}

/// Re-run resolution for one bibliography title; the stored row only ever
/// moves to a more confident outcome.
pub async fn reresolve_title(config: &Config, lookup: &dyn MetadataLookup, title: &str) -> Result<bool> {
    let entries = load_bibliography(config)?;
    let entry = entries
        .iter()
        .find(|e| e.title == title)
        .with_context(|| format!("No bibliography entry titled {:?}", title))?;
    let mut store = ResolutionStore::open(&config.resolutions_path())
        .context("Failed to open resolution table")?;
    let improved = resolve::reresolve(lookup, &mut store, &entry.title, entry.url.as_deref()).await?;
    Ok(improved)
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub kept: usize,
    pub excluded: usize,
    pub reviewed: usize,
    pub path: PathBuf,
}

pub fn filter_resolutions(config: &Config, reviewer: &mut dyn Reviewer) -> Result<FilterSummary> {
    let store = ResolutionStore::open(&config.resolutions_path())
        .context("Failed to open resolution table")?;
    let outcome = review::filter_resolutions(store.iter().cloned(), config.fuzzy_threshold, reviewer);
    let path = config.filtered_path();
    resolution_store::write_filtered(&path, &outcome.kept)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(FilterSummary {
        kept: outcome.kept.len(),
        excluded: outcome.excluded,
        reviewed: outcome.reviewed,
        path,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusReport {
    pub assignment: AssignmentSummary,
    pub corpus: CorpusSummary,
}

/// Join the bibliography, the filtered resolutions and the annotation
/// tables into paper records.
pub async fn load_corpus(config: &Config, lookup: &dyn MetadataLookup) -> Result<(Corpus, CorpusReport)> {
    let entries = load_bibliography(config)?;
    let accepted = resolution_store::load_filtered(&config.filtered_path())
        .context("Failed to read filtered resolutions")?;
    if accepted.is_empty() {
        tracing::warn!("No filtered resolutions in {}", config.filtered_path().display());
    }
    let (countries, venues, ranks) = config.annotation_paths();
    let annotations = Annotations::load(countries, venues, ranks)?;

    let (assignments, assignment) = assign_paper_ids(lookup, &entries, &accepted).await;
    let (corpus, corpus_summary) = Corpus::build(&entries, &assignments, &annotations);
    Ok((corpus, CorpusReport { assignment, corpus: corpus_summary }))
}

/// Build the citation graph over the corpus, fetching references for any
/// paper not yet in the reference table.
pub async fn build_graph(
    config: &Config,
    lookup: &dyn MetadataLookup,
) -> Result<(Corpus, CitationGraph, BuildSummary)> {
    let (corpus, _) = load_corpus(config, lookup).await?;
    let mut store = ReferenceStore::open(&config.references_path())
        .context("Failed to open reference table")?;
    let (graph, summary) =
        graph::build_or_extend(lookup, corpus.paper_ids().as_slice(), &mut store, config.workers).await?;
    Ok((corpus, graph, summary))
}

#[derive(Debug, Clone, Serialize)]
pub struct CitedPaper {
    pub paper_id: String,
    pub title: String,
    pub citations: usize,
}

pub async fn top_cited(config: &Config, lookup: &dyn MetadataLookup, k: usize) -> Result<Vec<CitedPaper>> {
    let (corpus, graph, _) = build_graph(config, lookup).await?;
    let top = graph
        .top_cited(k)
        .into_iter()
        .map(|(id, citations)| CitedPaper {
            paper_id: id.to_string(),
            title: corpus.get(id).map(|p| p.canonical_title.clone()).unwrap_or_default(),
            citations,
        })
        .collect();
    Ok(top)
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureExport {
    pub papers: usize,
    pub authors: usize,
    pub path: PathBuf,
}

pub async fn export_features(config: &Config, lookup: &dyn MetadataLookup) -> Result<FeatureExport> {
    let (corpus, graph, _) = build_graph(config, lookup).await?;
    let genders = GenderResolver::load(&config.gender_dir)?;
    let (table, rows) = features::extract_features(&corpus, &graph, &genders);
    let path = config.reports_dir().join("paper_features.psv");
    features::write_feature_table(&path, &rows)?;
    Ok(FeatureExport {
        papers: rows.len(),
        authors: table.len(),
        path,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryReportSummary {
    pub countries: Vec<String>,
    pub papers: usize,
    pub files: Vec<PathBuf>,
}

pub async fn country_report(
    config: &Config,
    lookup: &dyn MetadataLookup,
    year_threshold: Option<i32>,
    citation_window: Option<i32>,
) -> Result<CountryReportSummary> {
    let (corpus, graph, _) = build_graph(config, lookup).await?;
    let engine = StatsEngine::new(&corpus, &graph, year_threshold);
    let options = ReportOptions {
        top_k: config.top_k_countries,
        excluded_countries: config.excluded_countries.clone(),
        citation_window,
    };
    let report = CountryReport::build(&engine, &options);
    let stem = match year_threshold {
        Some(y) => format!("country_report_{}", y),
        None => "country_report_all".to_string(),
    };
    let files = report.write(&config.reports_dir(), &stem)?;
    Ok(CountryReportSummary {
        countries: report.countries,
        papers: report.papers,
        files,
    })
}

pub async fn author_pair_graph(
    config: &Config,
    lookup: &dyn MetadataLookup,
    country_a: &str,
    country_b: &str,
    year_threshold: Option<i32>,
    threshold: Dominance,
) -> Result<AuthorPairGraph> {
    let (corpus, graph, _) = build_graph(config, lookup).await?;
    let engine = StatsEngine::new(&corpus, &graph, year_threshold);
    let author_graph = engine.author_pair_graph(country_a, country_b, threshold);

    let dir = config.reports_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!(
        "author_graph_{}#{}.json",
        author_graph.country_a.replace(' ', "_"),
        author_graph.country_b.replace(' ', "_")
    ));
    persist::write_atomic(&path, &serde_json::to_string_pretty(&author_graph)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(author_graph)
}
