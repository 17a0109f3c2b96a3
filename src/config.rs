use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::apis::pacer::RequestPacer;
use crate::apis::semantic_scholar::SemanticScholarClient;
use crate::cache::ResponseCache;
use crate::resolve::review::DEFAULT_FUZZY_THRESHOLD;

const DEFAULT_EXCLUDED_COUNTRIES: &str = "google,microsoft,ibm,amazon,facebook";

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bib_path: PathBuf,
    pub countries_path: Option<PathBuf>,
    pub venues_path: Option<PathBuf>,
    pub ranks_path: Option<PathBuf>,
    pub gender_dir: PathBuf,
    pub semantic_scholar_api_key: Option<String>,
    pub workers: usize,
    pub rate_window: u32,
    pub rate_pause: Duration,
    pub fuzzy_threshold: u8,
    pub excluded_countries: Vec<String>,
    pub top_k_countries: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CITENET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs_or_default().join(".citenet"));
        Self::with_data_dir(data_dir, |name| std::env::var(name).ok())
    }

    /// Defaults rooted at `data_dir`, overridden by whatever `var` returns.
    pub fn with_data_dir(data_dir: PathBuf, var: impl Fn(&str) -> Option<String>) -> Self {
        let path = |name: &str| var(name).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        let parsed = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());

        let excluded_countries = var("CITENET_EXCLUDED_COUNTRIES")
            .unwrap_or_else(|| DEFAULT_EXCLUDED_COUNTRIES.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            bib_path: path("CITENET_BIB_PATH").unwrap_or_else(|| data_dir.join("bib_entries.json")),
            countries_path: path("CITENET_COUNTRIES_PATH"),
            venues_path: path("CITENET_VENUES_PATH"),
            ranks_path: path("CITENET_RANKS_PATH"),
            gender_dir: path("CITENET_GENDER_DIR").unwrap_or_else(|| data_dir.join("gender")),
            semantic_scholar_api_key: var("SEMANTIC_SCHOLAR_API_KEY"),
            workers: parsed("CITENET_WORKERS").map_or(16, |w| w.max(1) as usize),
            rate_window: parsed("CITENET_RATE_WINDOW").map_or(99, |w| w.max(1) as u32),
            rate_pause: Duration::from_millis(parsed("CITENET_RATE_PAUSE_MS").unwrap_or(1000)),
            fuzzy_threshold: parsed("CITENET_FUZZY_THRESHOLD")
                .map_or(DEFAULT_FUZZY_THRESHOLD, |t| t.min(100) as u8),
            excluded_countries,
            top_k_countries: parsed("CITENET_TOP_K_COUNTRIES").map_or(10, |k| k as usize),
            data_dir,
        }
    }

    pub fn resolutions_path(&self) -> PathBuf {
        self.data_dir.join("title_to_paper_details.tsv")
    }

    pub fn filtered_path(&self) -> PathBuf {
        self.data_dir.join("title_to_paper_filtered_details.tsv")
    }

    pub fn references_path(&self) -> PathBuf {
        self.data_dir.join("ref_paper_ids.csv")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Build the Semantic Scholar client over the on-disk response cache.
    pub fn build_lookup(&self) -> anyhow::Result<SemanticScholarClient> {
        let cache = ResponseCache::open(&self.cache_dir())
            .with_context(|| format!("Failed to open cache in {}", self.cache_dir().display()))?;
        tracing::info!("Response cache holds {} entries", cache.len());
        let pacer = RequestPacer::new(self.rate_window, self.rate_pause);
        let client = SemanticScholarClient::new(
            self.semantic_scholar_api_key.clone(),
            Arc::new(cache),
            Arc::new(pacer),
        )
        .context("Failed to build HTTP client")?;
        Ok(client)
    }

    pub fn annotation_paths(&self) -> (Option<&Path>, Option<&Path>, Option<&Path>) {
        (
            self.countries_path.as_deref(),
            self.venues_path.as_deref(),
            self.ranks_path.as_deref(),
        )
    }
}

fn dirs_or_default() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
