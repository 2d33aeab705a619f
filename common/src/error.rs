use async_openai::error::OpenAIError;
use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Graph unavailable: {0}")]
    GraphUnavailable(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Errors a search pipeline absorbs locally instead of failing the request.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}
