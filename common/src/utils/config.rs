use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Centralized application configuration.
///
/// Sourced from an optional `config` file plus environment variables. The
/// re-ranking weights are independently configurable and are expected, but
/// not required, to sum to 1.0; they are never renormalized.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_openai_timeout_seconds")]
    pub openai_timeout_seconds: u64,

    // Retrieval
    #[serde(default = "default_max_retrieval_chunks_chat")]
    pub max_retrieval_chunks_chat: usize,
    #[serde(default = "default_max_retrieval_chunks_summary")]
    pub max_retrieval_chunks_summary: usize,
    #[serde(default = "default_min_similarity_score")]
    pub min_similarity_score: f32,
    #[serde(default = "default_min_similarity_score_chat")]
    pub min_similarity_score_chat: f32,
    #[serde(default = "default_vector_probe_budget")]
    pub vector_probe_budget: usize,

    // Re-ranking (top-n candidate pool, top-k final set)
    #[serde(default = "default_rerank_enabled")]
    pub rerank_enabled: bool,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default = "default_rerank_similarity_weight")]
    pub rerank_similarity_weight: f32,
    #[serde(default = "default_rerank_keyword_weight")]
    pub rerank_keyword_weight: f32,
    #[serde(default = "default_rerank_recency_weight")]
    pub rerank_recency_weight: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

const fn default_openai_timeout_seconds() -> u64 {
    60
}

const fn default_max_retrieval_chunks_chat() -> usize {
    15
}

const fn default_max_retrieval_chunks_summary() -> usize {
    8
}

const fn default_min_similarity_score() -> f32 {
    0.3
}

const fn default_min_similarity_score_chat() -> f32 {
    0.25
}

const fn default_vector_probe_budget() -> usize {
    10
}

const fn default_rerank_enabled() -> bool {
    true
}

const fn default_rerank_top_n() -> usize {
    50
}

const fn default_rerank_top_k() -> usize {
    15
}

const fn default_rerank_similarity_weight() -> f32 {
    0.6
}

const fn default_rerank_keyword_weight() -> f32 {
    0.25
}

const fn default_rerank_recency_weight() -> f32 {
    0.15
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
