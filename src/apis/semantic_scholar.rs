use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::pacer::RequestPacer;
use super::{AuthorRef, MetadataLookup, PaperMetadata, SourceError};
use crate::cache::{CachedResponse, ResponseCache};

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const FIELDS: &str = "title,authors";
const REFERENCE_PAGE: &str = "1000";

/// Semantic Scholar Graph API client. Every request is answered from the
/// response cache when possible; only live requests count against the pacer.
pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_key: Option<String>,
    cache: Arc<ResponseCache>,
    pacer: Arc<RequestPacer>,
}

impl SemanticScholarClient {
    pub fn new(
        api_key: Option<String>,
        cache: Arc<ResponseCache>,
        pacer: Arc<RequestPacer>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("citenet/0.1")
                .build()?,
            api_key,
            cache,
            pacer,
        })
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }

    /// GET `path` with `params`. Returns the body for 200, `None` for 404.
    /// Responses are cached under the fully-qualified URL as `policy` allows.
    async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        policy: NotFound,
    ) -> Result<Option<String>, SourceError> {
        let url = Url::parse_with_params(&format!("{}/{}", BASE_URL, path), params)
            .map_err(|e| SourceError::Parse(format!("Bad request URL: {}", e)))?;
        let key = url.as_str().to_string();

        if let Some(cached) = self.cache.get(&key).filter(|c| policy.caches(c.status)) {
            return Ok(body_for(cached));
        }

        self.pacer.tick().await;
        let resp = self.add_auth(self.client.get(url)).send().await?;
        let status = resp.status().as_u16();
        if status != 200 && status != 404 {
            return Err(SourceError::Api(format!("{} returned status {}", key, status)));
        }
        let body = resp.text().await?;
        let response = CachedResponse { status, body };
        if policy.caches(status) {
            if let Err(e) = self.cache.put(&key, &response) {
                tracing::warn!("Failed to cache response for {}: {}", key, e);
            }
        }
        Ok(body_for(response))
    }

    async fn lookup(&self, path: &str) -> Result<Option<PaperMetadata>, SourceError> {
        match self.get(path, &[("fields", FIELDS)], NotFound::Cache).await? {
            Some(body) => {
                let paper: S2Paper = serde_json::from_str(&body)?;
                Ok(Some(s2_to_metadata(paper)?))
            }
            None => Ok(None),
        }
    }
}

/// What to do with a 404. Missing reference lists are asked for again on
/// every run, so they never enter the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotFound {
    Cache,
    Retry,
}

impl NotFound {
    fn caches(self, status: u16) -> bool {
        match status {
            200 => true,
            404 => self == NotFound::Cache,
            _ => false,
        }
    }
}

fn body_for(resp: CachedResponse) -> Option<String> {
    (resp.status == 200).then_some(resp.body)
}

#[derive(Deserialize)]
struct S2SearchResponse {
    data: Option<Vec<S2Paper>>,
}

#[derive(Deserialize)]
struct S2ReferenceResponse {
    data: Option<Vec<S2ReferenceEdge>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2ReferenceEdge {
    cited_paper: Option<S2PaperId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2PaperId {
    paper_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    authors: Option<Vec<S2Author>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Author {
    author_id: Option<String>,
    name: Option<String>,
}

fn s2_to_metadata(p: S2Paper) -> Result<PaperMetadata, SourceError> {
    let id = p
        .paper_id
        .ok_or_else(|| SourceError::Parse("paper without paperId".into()))?;
    let title = p
        .title
        .ok_or_else(|| SourceError::Parse(format!("paper {} without title", id)))?;
    let authors = p
        .authors
        .unwrap_or_default()
        .into_iter()
        .map(|a| AuthorRef {
            author_id: a.author_id,
            name: a.name.unwrap_or_default(),
        })
        .collect();
    Ok(PaperMetadata { id, title, authors })
}

#[async_trait]
impl MetadataLookup for SemanticScholarClient {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn lookup_by_doi(&self, doi: &str) -> Result<Option<PaperMetadata>, SourceError> {
        self.lookup(&format!("paper/DOI:{}", doi)).await
    }

    async fn lookup_by_acl_id(&self, acl_id: &str) -> Result<Option<PaperMetadata>, SourceError> {
        self.lookup(&format!("paper/ACL:{}", acl_id)).await
    }

    async fn search_by_title(&self, query: &str) -> Result<Option<PaperMetadata>, SourceError> {
        let body = self
            .get(
                "paper/search",
                &[("query", query), ("fields", FIELDS), ("limit", "1")],
                NotFound::Cache,
            )
            .await?;
        let Some(body) = body else { return Ok(None) };
        let resp: S2SearchResponse = serde_json::from_str(&body)?;
        match resp.data.unwrap_or_default().into_iter().next() {
            Some(top) => Ok(Some(s2_to_metadata(top)?)),
            None => Ok(None),
        }
    }

    async fn get_references(
        &self,
        paper_id: &str,
    ) -> Result<Option<Vec<Option<String>>>, SourceError> {
        let body = self
            .get(
                &format!("paper/{}/references", paper_id),
                &[("fields", "paperId"), ("limit", REFERENCE_PAGE)],
                NotFound::Retry,
            )
            .await?;
        let Some(body) = body else { return Ok(None) };
        let resp: S2ReferenceResponse = serde_json::from_str(&body)?;
        Ok(Some(
            resp.data
                .unwrap_or_default()
                .into_iter()
                .map(|edge| edge.cited_paper.and_then(|p| p.paper_id))
                .collect(),
        ))
    }
}
