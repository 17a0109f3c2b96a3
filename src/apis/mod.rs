pub mod pacer;
pub mod semantic_scholar;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An author as listed by the metadata service. `author_id` is `None` when
/// the service has no canonical identity for the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub author_id: Option<String>,
    pub name: String,
}

/// Canonical metadata for one paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: String,
    pub title: String,
    pub authors: Vec<AuthorRef>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

/// Paper lookup capability consumed by the resolver and the graph builder.
///
/// Every method returns `Ok(None)` when the service answers "not found" and
/// `Err` for transport or decoding failures.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    fn name(&self) -> &str;
    async fn lookup_by_doi(&self, doi: &str) -> Result<Option<PaperMetadata>, SourceError>;
    async fn lookup_by_acl_id(&self, acl_id: &str) -> Result<Option<PaperMetadata>, SourceError>;
    async fn search_by_title(&self, query: &str) -> Result<Option<PaperMetadata>, SourceError>;
    /// Outbound references of a paper. Entries are `None` where the service
    /// lists a reference it could not identify.
    async fn get_references(&self, paper_id: &str)
        -> Result<Option<Vec<Option<String>>>, SourceError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory lookup that records how often each capability was hit.
    #[derive(Default)]
    pub struct MockLookup {
        pub by_doi: HashMap<String, PaperMetadata>,
        pub by_acl: HashMap<String, PaperMetadata>,
        pub by_query: HashMap<String, PaperMetadata>,
        pub references: HashMap<String, Vec<Option<String>>>,
        pub failing: HashSet<String>,
        pub calls: AtomicUsize,
        pub reference_calls: Mutex<Vec<String>>,
    }

    impl MockLookup {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn reference_calls_for(&self, id: &str) -> usize {
            self.reference_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.as_str() == id)
                .count()
        }

        fn hit(&self, key: &str) -> Result<(), SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(key) {
                return Err(SourceError::Api(format!("simulated failure for {}", key)));
            }
            Ok(())
        }
    }

    pub fn paper(id: &str, title: &str, authors: &[(&str, &str)]) -> PaperMetadata {
        PaperMetadata {
            id: id.to_string(),
            title: title.to_string(),
            authors: authors
                .iter()
                .map(|(aid, name)| AuthorRef {
                    author_id: if aid.is_empty() { None } else { Some(aid.to_string()) },
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[async_trait]
    impl MetadataLookup for MockLookup {
        fn name(&self) -> &str {
            "mock"
        }

        async fn lookup_by_doi(&self, doi: &str) -> Result<Option<PaperMetadata>, SourceError> {
            self.hit(doi)?;
            Ok(self.by_doi.get(doi).cloned())
        }

        async fn lookup_by_acl_id(&self, acl_id: &str) -> Result<Option<PaperMetadata>, SourceError> {
            self.hit(acl_id)?;
            Ok(self.by_acl.get(acl_id).cloned())
        }

        async fn search_by_title(&self, query: &str) -> Result<Option<PaperMetadata>, SourceError> {
            self.hit(query)?;
            Ok(self.by_query.get(query).cloned())
        }

        async fn get_references(
            &self,
            paper_id: &str,
        ) -> Result<Option<Vec<Option<String>>>, SourceError> {
            self.reference_calls.lock().unwrap().push(paper_id.to_string());
            self.hit(paper_id)?;
            Ok(self.references.get(paper_id).cloned())
        }
    }
}
