//! Paper records: bibliography entries joined with their accepted
//! resolutions and external annotations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::apis::{AuthorRef, MetadataLookup};
use crate::bib::{BibAuthor, BibEntry};
use crate::persist::sanitize_field;
use crate::resolve::review::{ConfidenceTier, FilteredResolution};
use crate::resolve::{route_for, LookupRoute};

#[derive(Debug, Error, PartialEq)]
pub enum CorpusError {
    #[error("author {author_id} is named both {known:?} and {found:?} (paper {paper_id})")]
    ConflictingAuthorName {
        author_id: String,
        known: String,
        found: String,
        paper_id: String,
    },
    #[error("paper {paper_id} lists authors {known:?} and {found:?} under different bibliography keys")]
    ConflictingAuthorList {
        paper_id: String,
        known: Vec<String>,
        found: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub paper_id: String,
    pub paper_key: String,
    pub bib_title: String,
    pub canonical_title: String,
    /// Canonical authors as reported by the metadata service.
    pub authors: Vec<AuthorRef>,
    /// Authors in bibliography order.
    pub bib_authors: Vec<BibAuthor>,
    pub tier: ConfidenceTier,
    pub fuzzy_score: u8,
    pub year: Option<i32>,
    pub month: Option<String>,
    pub venue: Option<String>,
    pub countries: BTreeSet<String>,
    pub rank: Option<String>,
}

impl PaperRecord {
    /// Distinct canonical author ids, in listing order.
    pub fn canonical_author_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.authors
            .iter()
            .filter_map(|a| a.author_id.as_deref())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Fold a second bibliography entry for the same paper into this one.
    fn absorb(&mut self, other: PaperRecord) -> Result<(), CorpusError> {
        let ids = |r: &PaperRecord| -> Vec<String> {
            r.canonical_author_ids().into_iter().map(String::from).collect()
        };
        let (known, found) = (ids(&*self), ids(&other));
        if !known.is_empty() && !found.is_empty() && known != found {
            return Err(CorpusError::ConflictingAuthorList {
                paper_id: self.paper_id.clone(),
                known,
                found,
            });
        }
        if self.authors.is_empty() {
            self.authors = other.authors;
        }
        if self.bib_authors.is_empty() {
            self.bib_authors = other.bib_authors;
        }
        self.year = self.year.or(other.year);
        self.month = self.month.take().or(other.month);
        self.venue = self.venue.take().or(other.venue);
        self.rank = self.rank.take().or(other.rank);
        self.tier = self.tier.max(other.tier);
        self.countries.extend(other.countries);
        Ok(())
    }
}

/// Keyed annotation tables from external collaborators. A missing key is a
/// normal state.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    countries: HashMap<String, BTreeSet<String>>,
    venues: HashMap<String, String>,
    ranks: HashMap<String, String>,
}

impl Annotations {
    pub fn new(
        countries: HashMap<String, Vec<String>>,
        venues: HashMap<String, String>,
        ranks: HashMap<String, String>,
    ) -> Self {
        let countries = countries
            .into_iter()
            .map(|(key, list)| {
                let set = list
                    .iter()
                    .map(|c| normalize_country(c))
                    .filter(|c| !c.is_empty())
                    .collect();
                (key, set)
            })
            .collect();
        Self { countries, venues, ranks }
    }

    /// Load each table from a JSON object file; absent paths give empty tables.
    pub fn load(countries: Option<&Path>, venues: Option<&Path>, ranks: Option<&Path>) -> Result<Self> {
        Ok(Self::new(
            read_json_map(countries)?,
            read_json_map(venues)?,
            read_json_map(ranks)?,
        ))
    }

    pub fn countries(&self, paper_key: &str) -> BTreeSet<String> {
        self.countries.get(paper_key).cloned().unwrap_or_default()
    }

    pub fn venue(&self, paper_key: &str) -> Option<&str> {
        self.venues.get(paper_key).map(String::as_str)
    }

    pub fn rank(&self, paper_key: &str) -> Option<&str> {
        self.ranks.get(paper_key).map(String::as_str)
    }
}

fn read_json_map<V: serde::de::DeserializeOwned>(path: Option<&Path>) -> Result<HashMap<String, V>> {
    let Some(path) = path else { return Ok(HashMap::new()) };
    if !path.exists() {
        tracing::warn!("Annotation file {} not found, continuing without it", path.display());
        return Ok(HashMap::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Country strings are free text; only whitespace and case are normalized.
pub fn normalize_country(country: &str) -> String {
    country.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// One bibliography key bound to a canonical paper.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperAssignment {
    pub paper_key: String,
    pub paper_id: String,
    pub canonical_title: String,
    pub authors: Vec<AuthorRef>,
    pub tier: ConfidenceTier,
    pub fuzzy_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentSummary {
    pub assigned: usize,
    pub shared_title_keys: usize,
    pub shared_title_missed: usize,
}

/// Bind bibliography keys to accepted resolutions.
///
/// Resolutions are keyed by title, so when several keys share a title each
/// key is looked up again by its own identifier; keys whose direct lookup
/// misses are dropped.
pub async fn assign_paper_ids(
    lookup: &dyn MetadataLookup,
    entries: &[BibEntry],
    accepted: &[FilteredResolution],
) -> (Vec<PaperAssignment>, AssignmentSummary) {
    let mut by_title: BTreeMap<String, Vec<&BibEntry>> = BTreeMap::new();
    for entry in entries {
        by_title.entry(sanitize_field(&entry.title)).or_default().push(entry);
    }

    let mut assignments = Vec::new();
    let mut summary = AssignmentSummary::default();
    for accepted in accepted {
        let res = &accepted.resolution;
        let Some(group) = by_title.get(&res.bib_title) else { continue };
        if let [entry] = group.as_slice() {
            assignments.push(PaperAssignment {
                paper_key: entry.key.clone(),
                paper_id: res.paper_id.clone(),
                canonical_title: res.canonical_title.clone(),
                authors: res.authors.clone(),
                tier: accepted.tier,
                fuzzy_score: res.fuzzy_score,
            });
            continue;
        }

        for entry in group {
            summary.shared_title_keys += 1;
            let found = match route_for(entry.url.as_deref()) {
                LookupRoute::Doi(doi) => lookup.lookup_by_doi(doi).await,
                LookupRoute::Acl(id) => lookup.lookup_by_acl_id(id).await,
                LookupRoute::SearchOnly => Ok(None),
            };
            match found {
                Ok(Some(meta)) => assignments.push(PaperAssignment {
                    paper_key: entry.key.clone(),
                    paper_id: meta.id,
                    canonical_title: meta.title,
                    authors: meta.authors,
                    tier: ConfidenceTier::Exact,
                    fuzzy_score: 100,
                }),
                Ok(None) => summary.shared_title_missed += 1,
                Err(e) => {
                    tracing::warn!("Direct lookup for shared-title key {} failed: {}", entry.key, e);
                    summary.shared_title_missed += 1;
                }
            }
        }
    }
    summary.assigned = assignments.len();
    tracing::info!(
        "{} missed entries with multiple publications for the same title, among {} assigned papers",
        summary.shared_title_missed,
        summary.assigned
    );
    (assignments, summary)
}

/// The frozen set of paper records an analysis runs over.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    papers: BTreeMap<String, PaperRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusSummary {
    pub papers: usize,
    pub merged_keys: usize,
    pub rejected: usize,
}

impl Corpus {
    /// Assemble records. A record that contradicts what is already known
    /// (an author id under a second name, a paper with two author lists) is
    /// rejected and logged; the rest of the batch continues.
    pub fn build(
        entries: &[BibEntry],
        assignments: &[PaperAssignment],
        annotations: &Annotations,
    ) -> (Self, CorpusSummary) {
        let entries: HashMap<&str, &BibEntry> = entries.iter().map(|e| (e.key.as_str(), e)).collect();
        let mut sorted: Vec<&PaperAssignment> = assignments.iter().collect();
        sorted.sort_by(|a, b| a.paper_key.cmp(&b.paper_key));

        let mut corpus = Corpus::default();
        let mut summary = CorpusSummary::default();
        let mut author_names: HashMap<String, String> = HashMap::new();

        for assignment in sorted {
            let Some(entry) = entries.get(assignment.paper_key.as_str()) else {
                tracing::warn!("Assignment for unknown bibliography key {}", assignment.paper_key);
                summary.rejected += 1;
                continue;
            };
            let record = PaperRecord {
                paper_id: assignment.paper_id.clone(),
                paper_key: entry.key.clone(),
                bib_title: entry.title.clone(),
                canonical_title: assignment.canonical_title.clone(),
                authors: assignment.authors.clone(),
                bib_authors: entry.authors.clone(),
                tier: assignment.tier,
                fuzzy_score: assignment.fuzzy_score,
                year: entry.year,
                month: entry.month.clone(),
                venue: annotations
                    .venue(&entry.key)
                    .map(String::from)
                    .or_else(|| entry.venue.clone()),
                countries: annotations.countries(&entry.key),
                rank: annotations.rank(&entry.key).map(String::from),
            };
            match corpus.insert(record, &mut author_names) {
                Ok(true) => summary.merged_keys += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Rejecting record {}: {}", entry.key, e);
                    summary.rejected += 1;
                }
            }
        }
        summary.papers = corpus.len();
        tracing::info!(
            "Corpus: {} papers ({} keys merged into existing papers, {} rejected)",
            summary.papers,
            summary.merged_keys,
            summary.rejected
        );
        (corpus, summary)
    }

    /// Insert or merge; returns whether the record merged into an existing one.
    fn insert(
        &mut self,
        record: PaperRecord,
        author_names: &mut HashMap<String, String>,
    ) -> Result<bool, CorpusError> {
        for author in &record.authors {
            let Some(id) = &author.author_id else { continue };
            if let Some(known) = author_names.get(id) {
                if known != &author.name {
                    return Err(CorpusError::ConflictingAuthorName {
                        author_id: id.clone(),
                        known: known.clone(),
                        found: author.name.clone(),
                        paper_id: record.paper_id.clone(),
                    });
                }
            }
        }
        let names: Vec<(String, String)> = record
            .authors
            .iter()
            .filter_map(|a| Some((a.author_id.clone()?, a.name.clone())))
            .collect();
        let merged = match self.papers.get_mut(&record.paper_id) {
            Some(existing) => {
                let mut candidate = existing.clone();
                candidate.absorb(record)?;
                *existing = candidate;
                true
            }
            None => {
                self.papers.insert(record.paper_id.clone(), record);
                false
            }
        };
        author_names.extend(names);
        Ok(merged)
    }

    #[cfg(test)]
    pub fn from_records(records: impl IntoIterator<Item = PaperRecord>) -> Result<Self, CorpusError> {
        let mut corpus = Corpus::default();
        let mut names = HashMap::new();
        for record in records {
            corpus.insert(record, &mut names)?;
        }
        Ok(corpus)
    }

    pub fn get(&self, paper_id: &str) -> Option<&PaperRecord> {
        self.papers.get(paper_id)
    }

    pub fn year(&self, paper_id: &str) -> Option<i32> {
        self.papers.get(paper_id).and_then(|p| p.year)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PaperRecord> {
        self.papers.values()
    }

    pub fn paper_ids(&self) -> Vec<&str> {
        self.papers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    /// Minimum and maximum publication year over papers that have one.
    pub fn year_range(&self) -> Option<(i32, i32)> {
        let mut years = self.papers.values().filter_map(|p| p.year);
        let first = years.next()?;
        Some(years.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y))))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::apis::mock::{paper, MockLookup};
    use crate::resolve::{RequestType, Resolution};

    pub fn record(id: &str, year: i32, authors: &[&str], countries: &[&str]) -> PaperRecord {
        PaperRecord {
            paper_id: id.into(),
            paper_key: format!("key-{}", id),
            bib_title: format!("Title {}", id),
            canonical_title: format!("Title {}", id),
            authors: authors
                .iter()
                .map(|a| AuthorRef {
                    author_id: if a.is_empty() { None } else { Some(a.to_string()) },
                    name: format!("Name {}", a),
                })
                .collect(),
            bib_authors: vec![],
            tier: ConfidenceTier::Exact,
            fuzzy_score: 100,
            year: Some(year),
            month: None,
            venue: None,
            countries: countries.iter().map(|c| c.to_string()).collect(),
            rank: None,
        }
    }

    fn entry(key: &str, title: &str, url: &str) -> BibEntry {
        BibEntry {
            key: key.into(),
            entry_type: "inproceedings".into(),
            title: title.into(),
            venue: Some("ACL".into()),
            month: None,
            year: Some(2020),
            url: Some(url.into()),
            authors: vec![BibAuthor { first: "Ada".into(), last: "Lovelace".into() }],
        }
    }

    fn accepted(title: &str, id: &str) -> FilteredResolution {
        FilteredResolution {
            resolution: Resolution {
                paper_id: id.into(),
                bib_title: title.into(),
                canonical_title: title.into(),
                authors: vec![AuthorRef { author_id: Some("1".into()), name: "Ada Lovelace".into() }],
                fuzzy_score: 100,
                request_type: RequestType::Direct,
            },
            tier: ConfidenceTier::Exact,
        }
    }

    #[tokio::test]
    async fn test_shared_titles_are_split_by_direct_lookup() {
        let entries = vec![
            entry("a", "Findings", "https://aclanthology.org/A1"),
            entry("b", "Findings", "https://aclanthology.org/B1"),
            entry("c", "Findings", "https://aclanthology.org/C1"),
            entry("d", "Unique", "https://aclanthology.org/D1"),
        ];
        let mut lookup = MockLookup::default();
        lookup.by_acl.insert("A1".into(), paper("pa", "Findings", &[("1", "Ada Lovelace")]));
        lookup.by_acl.insert("B1".into(), paper("pb", "Findings", &[("2", "Alan Turing")]));

        let (assigned, summary) = assign_paper_ids(
            &lookup,
            &entries,
            &[accepted("Findings", "px"), accepted("Unique", "pd")],
        )
        .await;
        let ids: Vec<&str> = assigned.iter().map(|a| a.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["pa", "pb", "pd"]);
        assert_eq!(summary.shared_title_keys, 3);
        assert_eq!(summary.shared_title_missed, 1);
    }

    #[test]
    fn test_build_applies_annotations_and_rejects_conflicts() {
        let entries = vec![
            entry("a", "One", "https://aclanthology.org/A1"),
            entry("b", "Two", "https://aclanthology.org/B1"),
        ];
        let assignments = vec![
            PaperAssignment {
                paper_key: "a".into(),
                paper_id: "p1".into(),
                canonical_title: "One".into(),
                authors: vec![AuthorRef { author_id: Some("1".into()), name: "Ada Lovelace".into() }],
                tier: ConfidenceTier::Exact,
                fuzzy_score: 100,
            },
            PaperAssignment {
                paper_key: "b".into(),
                paper_id: "p2".into(),
                canonical_title: "Two".into(),
                authors: vec![AuthorRef { author_id: Some("1".into()), name: "A. Lovelace".into() }],
                tier: ConfidenceTier::Exact,
                fuzzy_score: 100,
            },
        ];
        let mut countries = HashMap::new();
        countries.insert("a".to_string(), vec![" USA ".to_string(), "usa".to_string(), "China".to_string()]);
        let annotations = Annotations::new(countries, HashMap::new(), HashMap::new());

        let (corpus, summary) = Corpus::build(&entries, &assignments, &annotations);
        assert_eq!(summary.papers, 1);
        assert_eq!(summary.rejected, 1);
        let p1 = corpus.get("p1").unwrap();
        assert_eq!(p1.countries.iter().collect::<Vec<_>>(), vec!["china", "usa"]);
        assert_eq!(p1.venue.as_deref(), Some("ACL"));
        assert!(corpus.get("p2").is_none());
    }

    #[test]
    fn test_same_paper_under_two_keys_merges_countries() {
        let mut first = record("p1", 2019, &["1"], &["usa"]);
        let mut second = record("p1", 2019, &["1"], &["india"]);
        second.paper_key = "other".into();
        first.year = None;
        let corpus = Corpus::from_records([first, second]).unwrap();
        let p = corpus.get("p1").unwrap();
        assert_eq!(p.countries.len(), 2);
        assert_eq!(p.year, Some(2019));
        assert_eq!(corpus.year_range(), Some((2019, 2019)));
    }
}
