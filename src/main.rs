use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod apis;
mod bib;
mod cache;
mod config;
mod features;
mod graph;
mod persist;
mod pipeline;
mod resolve;
mod stats;

use apis::MetadataLookup;
use config::Config;
use resolve::review::{FixedReviewer, ReviewDecision, TerminalReviewer};
use stats::Dominance;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct ReresolveParams {
    #[schemars(description = "Bibliography title to resolve again")]
    title: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FilterParams {
    #[schemars(description = "Decision for low-scoring search hits: 'exclude' (default) or 'accept'")]
    policy: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TopCitedParams {
    #[schemars(description = "Number of papers to return (default 10, max 1000)")]
    k: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CountryReportParams {
    #[schemars(description = "Exclude papers published after this year")]
    year_threshold: Option<i32>,
    #[schemars(description = "Also count only citations made within this many years of publication")]
    citation_window: Option<i32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AuthorPairParams {
    #[schemars(description = "First country of the pair")]
    country_a: String,
    #[schemars(description = "Second country of the pair")]
    country_b: String,
    #[schemars(description = "Exclude papers published after this year")]
    year_threshold: Option<i32>,
    #[schemars(description = "Threshold type: 'count' (default) or 'fraction'")]
    threshold_type: Option<String>,
    #[schemars(description = "Minimum citations (count) or share of outbound citations (fraction); default 1")]
    threshold: Option<f64>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CitenetServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    lookup: Arc<dyn MetadataLookup>,
    // persisted tables have a single writer at a time
    state: Arc<Mutex<()>>,
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn stage_error(stage: &str, e: anyhow::Error) -> McpError {
    tracing::warn!("{} failed: {:#}", stage, e);
    McpError::internal_error(format!("{} failed: {:#}", stage, e), None)
}

#[tool_router]
impl CitenetServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        std::fs::create_dir_all(&config.data_dir)?;
        let lookup = config.build_lookup()?;

        tracing::info!(
            "Initialized citation pipeline, data_dir={}, workers={}",
            config.data_dir.display(),
            config.workers
        );

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            lookup: Arc::new(lookup),
            state: Arc::new(Mutex::new(())),
        })
    }

    #[tool(description = "Show counts of persisted resolutions, filtered rows, fetched reference lists and cache entries")]
    async fn pipeline_status(&self) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let status = pipeline::status(&self.config).map_err(|e| stage_error("Status", e))?;
        json_result(&status)
    }

    #[tool(description = "Resolve every bibliography title to a Semantic Scholar paper. Resumable: titles already resolved are skipped.")]
    async fn resolve_papers(&self) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let summary = pipeline::resolve_papers(&self.config, self.lookup.as_ref())
            .await
            .map_err(|e| stage_error("Resolution", e))?;
        json_result(&summary)
    }

    #[tool(description = "Resolve one bibliography title again; the stored row changes only if the new result is more confident")]
    async fn reresolve_title(
        &self,
        Parameters(params): Parameters<ReresolveParams>,
    ) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let improved = pipeline::reresolve_title(&self.config, self.lookup.as_ref(), &params.title)
            .await
            .map_err(|e| stage_error("Re-resolution", e))?;
        Ok(CallToolResult::success(vec![Content::text(if improved {
            format!("Updated resolution for: {}", params.title)
        } else {
            format!("Kept existing resolution for: {}", params.title)
        })]))
    }

    #[tool(description = "Filter resolutions into the trusted table. Low-scoring search hits follow the given policy; use `citenet review` for interactive review.")]
    async fn filter_resolutions(
        &self,
        Parameters(params): Parameters<FilterParams>,
    ) -> Result<CallToolResult, McpError> {
        let decision = match params.policy.as_deref().unwrap_or("exclude") {
            "exclude" => ReviewDecision::Exclude,
            "accept" => ReviewDecision::Keep,
            other => {
                return Err(McpError::invalid_params(
                    format!("Unknown policy '{}', expected 'exclude' or 'accept'", other),
                    None,
                ))
            }
        };
        let _guard = self.state.lock().await;
        let summary = pipeline::filter_resolutions(&self.config, &mut FixedReviewer(decision))
            .map_err(|e| stage_error("Filtering", e))?;
        json_result(&summary)
    }

    #[tool(description = "Build or extend the citation graph over the filtered papers, fetching missing reference lists")]
    async fn build_citation_graph(&self) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let (_, _, summary) = pipeline::build_graph(&self.config, self.lookup.as_ref())
            .await
            .map_err(|e| stage_error("Graph build", e))?;
        json_result(&summary)
    }

    #[tool(description = "List the most cited papers in the corpus citation graph")]
    async fn top_cited(
        &self,
        Parameters(params): Parameters<TopCitedParams>,
    ) -> Result<CallToolResult, McpError> {
        let k = params.k.unwrap_or(10).min(1000) as usize;
        let _guard = self.state.lock().await;
        let top = pipeline::top_cited(&self.config, self.lookup.as_ref(), k)
            .await
            .map_err(|e| stage_error("Top cited", e))?;
        json_result(&top)
    }

    #[tool(description = "Write the per-paper feature table (countries, genders, author citations and academic ages)")]
    async fn export_features(&self) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let export = pipeline::export_features(&self.config, self.lookup.as_ref())
            .await
            .map_err(|e| stage_error("Feature export", e))?;
        json_result(&export)
    }

    #[tool(description = "Compute country citation statistics, pair fractions, densities and Gini coefficients; writes JSON and tables to the reports directory")]
    async fn country_report(
        &self,
        Parameters(params): Parameters<CountryReportParams>,
    ) -> Result<CallToolResult, McpError> {
        let _guard = self.state.lock().await;
        let summary = pipeline::country_report(
            &self.config,
            self.lookup.as_ref(),
            params.year_threshold,
            params.citation_window,
        )
        .await
        .map_err(|e| stage_error("Country report", e))?;
        json_result(&summary)
    }

    #[tool(description = "Build the author graph for a country pair, keeping only author pairs whose citations dominate in both directions")]
    async fn author_pair_graph(
        &self,
        Parameters(params): Parameters<AuthorPairParams>,
    ) -> Result<CallToolResult, McpError> {
        let threshold = match params.threshold_type.as_deref().unwrap_or("count") {
            "count" => Dominance::Count(params.threshold.unwrap_or(1.0).max(0.0) as u32),
            "fraction" => Dominance::Fraction(params.threshold.unwrap_or(1.0)),
            other => {
                return Err(McpError::invalid_params(
                    format!("Unknown threshold type '{}', expected 'count' or 'fraction'", other),
                    None,
                ))
            }
        };
        let _guard = self.state.lock().await;
        let graph = pipeline::author_pair_graph(
            &self.config,
            self.lookup.as_ref(),
            &params.country_a,
            &params.country_b,
            params.year_threshold,
            threshold,
        )
        .await
        .map_err(|e| stage_error("Author graph", e))?;
        json_result(&graph)
    }
}

#[tool_handler]
impl ServerHandler for CitenetServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Citation network pipeline for the ACL Anthology. Resolve bibliography \
                 titles to Semantic Scholar papers, filter them, build the closed-world \
                 citation graph, and compute author features and cross-country \
                 citation statistics."
                    .into(),
            ),
        }
    }
}

/// `citenet review`: filter with a human answering on the terminal.
fn run_review(config: &Config) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut reviewer = TerminalReviewer::new(stdin.lock(), std::io::stdout());
    let summary = pipeline::filter_resolutions(config, &mut reviewer)?;
    println!(
        "Kept {} resolutions, excluded {} ({} reviewed). Wrote {}",
        summary.kept,
        summary.excluded,
        summary.reviewed,
        summary.path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    if std::env::args().nth(1).as_deref() == Some("review") {
        return run_review(&Config::from_env());
    }

    tracing::info!("Starting citenet MCP server");

    let server = CitenetServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
