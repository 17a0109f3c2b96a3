//! Record resolution: bibliography title + URL → canonical paper identity.

pub mod review;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::apis::{AuthorRef, MetadataLookup, PaperMetadata, SourceError};
use crate::bib::BibEntry;
use store::{ResolutionStore, StoreError};

/// Identifier recorded for titles that could not be resolved.
pub const UNRESOLVED_PAPER_ID: &str = "None";

/// How a resolution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Direct identifier lookup (DOI or ACL id).
    Direct,
    /// Top hit of a free-text title search.
    Search,
    Failed,
}

impl RequestType {
    pub fn code(self) -> i8 {
        match self {
            RequestType::Direct => 1,
            RequestType::Search => 2,
            RequestType::Failed => -1,
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(RequestType::Direct),
            "2" => Some(RequestType::Search),
            "-1" => Some(RequestType::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub paper_id: String,
    pub bib_title: String,
    pub canonical_title: String,
    pub authors: Vec<AuthorRef>,
    pub fuzzy_score: u8,
    pub request_type: RequestType,
}

impl Resolution {
    pub fn failed(bib_title: &str) -> Self {
        Self {
            paper_id: UNRESOLVED_PAPER_ID.to_string(),
            bib_title: bib_title.to_string(),
            canonical_title: UNRESOLVED_PAPER_ID.to_string(),
            authors: Vec::new(),
            fuzzy_score: 0,
            request_type: RequestType::Failed,
        }
    }

    fn from_metadata(bib_title: &str, meta: PaperMetadata, request_type: RequestType) -> Self {
        let fuzzy_score = fuzzy_score(&normalize_title(&meta.title), &normalize_title(bib_title));
        Self {
            paper_id: meta.id,
            bib_title: bib_title.to_string(),
            canonical_title: meta.title,
            authors: meta.authors,
            fuzzy_score,
            request_type,
        }
    }

    /// Direct lookups, and search hits whose title matches exactly.
    pub fn is_confident(&self) -> bool {
        match self.request_type {
            RequestType::Direct => true,
            RequestType::Search => self.fuzzy_score == 100,
            RequestType::Failed => false,
        }
    }

    /// Total order on confidence used when two resolutions for one title meet.
    pub fn confidence_key(&self) -> (u8, u8) {
        match self.request_type {
            RequestType::Direct => (2, 100),
            RequestType::Search => (1, self.fuzzy_score),
            RequestType::Failed => (0, 0),
        }
    }
}

/// Where a bibliography URL lets us look the paper up directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupRoute<'a> {
    Doi(&'a str),
    Acl(&'a str),
    SearchOnly,
}

pub fn route_for(url: Option<&str>) -> LookupRoute<'_> {
    let Some(url) = url else { return LookupRoute::SearchOnly };
    if let Some(pos) = url.find("doi.org/") {
        let doi = url[pos + "doi.org/".len()..].trim_end_matches('/');
        if !doi.is_empty() {
            return LookupRoute::Doi(doi);
        }
    }
    if let Some(pos) = url.find("aclanthology.org/") {
        let id = url[pos + "aclanthology.org/".len()..].trim_end_matches('/');
        if !id.is_empty() {
            return LookupRoute::Acl(id);
        }
    }
    LookupRoute::SearchOnly
}

/// Remove brace-delimited emphasis markup from a bibliography title.
pub fn strip_markup(title: &str) -> String {
    title.chars().filter(|&c| c != '{' && c != '}').collect()
}

/// Comparison key: ASCII alphanumerics only, tokens joined by single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.chars().filter(char::is_ascii_alphanumeric).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Free-text query sent to the search endpoint.
pub fn search_query(title: &str) -> String {
    strip_markup(title).split_whitespace().collect::<Vec<_>>().join("-")
}

/// Levenshtein ratio on a 0–100 scale, `2·lcs / (len_a + len_b)`: a
/// substitution costs one deletion plus one insertion, so a title that only
/// gains a suffix keeps a high score.
pub fn fuzzy_score(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb { prev[j] + 1 } else { prev[j + 1].max(row[j]) };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    let lcs = prev[b.len()];
    (200.0 * lcs as f64 / total as f64).round() as u8
}

/// Resolve one title. Never fails: any lookup error becomes a
/// [`RequestType::Failed`] resolution.
pub async fn resolve_title(lookup: &dyn MetadataLookup, bib_title: &str, url: Option<&str>) -> Resolution {
    match try_resolve(lookup, bib_title, url).await {
        Ok(Some((meta, request_type))) => Resolution::from_metadata(bib_title, meta, request_type),
        Ok(None) => {
            tracing::warn!("Paper details not found for: {} | {}", bib_title, url.unwrap_or("-"));
            Resolution::failed(bib_title)
        }
        Err(e) => {
            tracing::warn!("Resolution of {:?} failed via {}: {}", bib_title, lookup.name(), e);
            Resolution::failed(bib_title)
        }
    }
}

async fn try_resolve(
    lookup: &dyn MetadataLookup,
    bib_title: &str,
    url: Option<&str>,
) -> Result<Option<(PaperMetadata, RequestType)>, SourceError> {
    let direct = match route_for(url) {
        LookupRoute::Doi(doi) => lookup.lookup_by_doi(doi).await?,
        LookupRoute::Acl(id) => lookup.lookup_by_acl_id(id).await?,
        LookupRoute::SearchOnly => None,
    };
    if let Some(meta) = direct {
        return Ok(Some((meta, RequestType::Direct)));
    }
    Ok(lookup
        .search_by_title(&search_query(bib_title))
        .await?
        .map(|meta| (meta, RequestType::Search)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolveSummary {
    pub titles: usize,
    pub newly_resolved: usize,
    pub confident: usize,
    pub failed: usize,
}

impl ResolveSummary {
    pub fn confident_fraction(&self) -> f64 {
        if self.titles == 0 {
            0.0
        } else {
            self.confident as f64 / self.titles as f64
        }
    }
}

/// Resolve every bibliography title not already in `store`, sequentially,
/// persisting each outcome before moving on.
pub async fn resolve_all(
    lookup: &dyn MetadataLookup,
    store: &mut ResolutionStore,
    entries: &[BibEntry],
) -> Result<ResolveSummary, StoreError> {
    let mut summary = ResolveSummary::default();
    for entry in entries {
        if store.contains(&entry.title) {
            continue;
        }
        let resolution = resolve_title(lookup, &entry.title, entry.url.as_deref()).await;
        store.insert(resolution)?;
        summary.newly_resolved += 1;

        let (confident, total) = store.confidence_counts();
        tracing::info!(
            "Resolved {:?}; confident fraction so far {:.2}%",
            entry.title,
            100.0 * confident as f64 / total.max(1) as f64
        );
    }

    for res in store.iter() {
        summary.titles += 1;
        if res.is_confident() {
            summary.confident += 1;
        }
        if res.request_type == RequestType::Failed {
            summary.failed += 1;
        }
    }
    tracing::info!(
        "Resolution done: {} titles, {} new, {:.2}% confident, {} failed",
        summary.titles,
        summary.newly_resolved,
        100.0 * summary.confident_fraction(),
        summary.failed
    );
    Ok(summary)
}

/// Explicitly re-resolve a title. The stored record changes only if the new
/// outcome is more confident than the existing one.
pub async fn reresolve(
    lookup: &dyn MetadataLookup,
    store: &mut ResolutionStore,
    bib_title: &str,
    url: Option<&str>,
) -> Result<bool, StoreError> {
    let resolution = resolve_title(lookup, bib_title, url).await;
    store.offer(resolution)
}
