use config::{Config, ConfigError, Environment, File};
use serde::{de::DeserializeOwned, Deserialize};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAI,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_query_parser_model")]
    pub query_parser_model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_query_parser_model() -> String {
    "gpt-4o-mini".to_string()
}

fn config_source() -> Result<Config, ConfigError> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    config_source()?.try_deserialize()
}

/// Reads an optional nested table (e.g. `[retrieval]` or `RETRIEVAL__SIMILARITY_TOP_K`),
/// falling back to the type's defaults when the section is absent.
pub fn get_section<T>(name: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    match config_source()?.get::<T>(name) {
        Ok(section) => Ok(section),
        Err(ConfigError::NotFound(_)) => Ok(T::default()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_backend_deserializes_lowercase() {
        let backend: EmbeddingBackend =
            serde_json::from_str("\"hashed\"").expect("hashed backend should parse");
        assert_eq!(backend, EmbeddingBackend::Hashed);
        assert_eq!(EmbeddingBackend::default(), EmbeddingBackend::OpenAI);
    }

    #[test]
    fn app_config_fills_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "surrealdb_address": "mem://",
            "surrealdb_username": "root",
            "surrealdb_password": "root",
            "surrealdb_namespace": "people",
            "surrealdb_database": "search",
        }))
        .expect("minimal config should deserialize");

        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.embedding_dimensions, 1536);
        assert_eq!(config.query_parser_model, "gpt-4o-mini");
    }
}
