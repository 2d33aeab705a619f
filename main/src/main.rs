use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use clap::Parser;
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, get_section},
        embedding::EmbeddingProvider,
    },
};
use ranking_pipeline::{
    parser::{FallbackQueryParser, KeywordQueryParser, OpenAiQueryParser},
    query::DEFAULT_MAX_RESULTS,
    search_text, QueryContext, QueryParser, RetrievalConfig, RetrievalTuning, SearchServices,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Search people with natural language", long_about = None)]
struct Args {
    /// Natural-language query, e.g. "product managers in NYC"
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// Person id the search is run on behalf of; enables network queries
    #[arg(long = "me", value_name = "PERSON_ID")]
    source_entity_id: Option<String>,

    /// Maximum number of results to print
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    limit: usize,

    /// Include score breakdowns and the query explanation
    #[arg(long)]
    explain: bool,

    /// Log per-stage diagnostics to stderr
    #[arg(long)]
    diagnostics: bool,
}

impl Args {
    fn query_text(&self) -> String {
        self.query.join(" ")
    }

    fn query_context(&self) -> QueryContext {
        QueryContext {
            source_entity_id: self.source_entity_id.clone(),
            max_results: self.limit,
            include_explanation: self.explain,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();
    let config = get_config()?;
    let tuning: RetrievalTuning = get_section("retrieval")?;

    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;
    db.ensure_initialized().await?;

    let openai_client = config.openai_api_key.as_deref().map(|api_key| {
        Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&config.openai_base_url),
        ))
    });

    let embedder = match EmbeddingProvider::from_config(&config, openai_client.clone()) {
        Ok(provider) => {
            info!(
                embedding_backend = provider.backend_label(),
                embedding_dimension = provider.dimension(),
                "Embedding provider initialized"
            );
            Some(provider)
        }
        Err(err) => {
            warn!(error = %err, "Embedding provider unavailable; semantic retrieval disabled");
            None
        }
    };

    let parser: Box<dyn QueryParser> = match openai_client {
        Some(client) => Box::new(FallbackQueryParser::new(Box::new(OpenAiQueryParser::new(
            client,
            config.query_parser_model.clone(),
        )))),
        None => Box::new(KeywordQueryParser::new()),
    };

    let mut services = SearchServices::new(&db, &db);
    if let Some(provider) = embedder.as_ref() {
        services = services.with_embedder(provider);
    }

    let retrieval = RetrievalConfig::new(tuning).with_diagnostics(args.diagnostics);
    let result = search_text(
        parser.as_ref(),
        &args.query_text(),
        &args.query_context(),
        services,
        retrieval,
    )
    .await?;

    if let Some(diagnostics) = result.debug_info().diagnostics.as_ref() {
        let diagnostics = serde_json::to_string(diagnostics)?;
        info!(%diagnostics, "Search diagnostics");
    }
    println!("{}", serde_json::to_string_pretty(&result.to_response())?);
    Ok(())
}
