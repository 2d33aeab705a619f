pub mod candidates;
pub mod filter;
pub mod graph;
pub mod parser;
pub mod pipeline;
pub mod policy;
pub mod query;
pub mod result;
pub mod scoring;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::AppError, utils::embedding::EmbeddingProvider};
use tracing::{info, instrument};

pub use graph::ConnectionGraph;
pub use parser::{build_query, QueryContext, QueryParser};
pub use pipeline::{PipelineDiagnostics, PipelineStageTimings, RetrievalConfig, RetrievalTuning};
pub use query::{Query, QueryIntent, RankingWeights};
pub use result::{QueryResult, SearchResponse};
pub use store::CandidateStore;

use pipeline::{run_with_driver, PipelineContext, SearchDriver};

/// Turns query text into a dense vector for semantic retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        Ok(EmbeddingProvider::embed(self, text).await?)
    }
}

/// Collaborators a search runs against.
#[derive(Clone, Copy)]
pub struct SearchServices<'a> {
    pub store: &'a dyn CandidateStore,
    pub graph: &'a dyn ConnectionGraph,
    pub embedder: Option<&'a dyn Embedder>,
}

impl<'a> SearchServices<'a> {
    pub fn new(store: &'a dyn CandidateStore, graph: &'a dyn ConnectionGraph) -> Self {
        Self {
            store,
            graph,
            embedder: None,
        }
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }
}

/// Runs a prepared query through the full pipeline, ranking against the current time.
pub async fn search(
    services: SearchServices<'_>,
    query: Query,
    config: RetrievalConfig,
) -> Result<QueryResult, AppError> {
    search_at(services, query, config, Utc::now()).await
}

/// Same as [`search`] with an explicit ranking clock.
#[instrument(skip_all, fields(intent = %query.intent()))]
pub async fn search_at(
    services: SearchServices<'_>,
    query: Query,
    config: RetrievalConfig,
    now: DateTime<Utc>,
) -> Result<QueryResult, AppError> {
    let input_chars = query.raw_text().chars().count();
    let input_preview: String = query.raw_text().chars().take(120).collect();
    let input_preview_clean = input_preview.replace('\n', " ");
    let preview_len = input_preview_clean.chars().count();
    info!(
        input_chars,
        preview_truncated = input_chars > preview_len,
        preview = %input_preview_clean,
        filters = query.filters().len(),
        graph_constraint = query.graph_constraint().is_some(),
        "Starting search pipeline"
    );

    let ctx = PipelineContext::new(
        services.store,
        services.graph,
        services.embedder,
        query,
        config,
        now,
    );
    let run = run_with_driver(SearchDriver::new(), ctx).await?;
    let result = run
        .results
        .with_run_details(&run.stage_timings, run.diagnostics);

    info!(
        total_count = result.total_count(),
        returned = result.candidates().len(),
        "Search pipeline finished"
    );
    Ok(result)
}

/// Parses `text`, builds the query and runs it.
pub async fn search_text(
    parser: &dyn QueryParser,
    text: &str,
    query_ctx: &QueryContext,
    services: SearchServices<'_>,
    config: RetrievalConfig,
) -> Result<QueryResult, AppError> {
    let parsed = parser.parse(text, query_ctx).await?;
    let query = build_query(text, parsed, query_ctx)?;
    search(services, query, config).await
}
