use std::sync::Arc;
use std::time::Duration;

use common::{
    storage::db::SurrealDbClient,
    utils::config::{get_config, AppConfig},
};
use retrieval_pipeline::{
    completion::OpenAiModel,
    logging::{QueryLogger, SurrealLogSink},
    store::SurrealChunkStore,
    RagService,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api_state;
mod error;
mod routes;

use api_state::ApiState;

/// Output dimensions of the configured embedding model; the HNSW index is
/// defined against this.
fn embedding_dimensions(config: &AppConfig) -> usize {
    match config.embedding_model.as_str() {
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        _ => 3072,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = Arc::new(get_config()?);

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    db.ensure_indexes(embedding_dimensions(&config)).await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );
    let model = Arc::new(OpenAiModel::new(
        openai_client,
        config.chat_model.clone(),
        config.embedding_model.clone(),
        Duration::from_secs(config.openai_timeout_seconds),
    ));

    let service = Arc::new(RagService::new(
        Arc::new(SurrealChunkStore::new(Arc::clone(&db))),
        model,
        QueryLogger::new(Arc::new(SurrealLogSink::new(db))),
        Arc::clone(&config),
    ));

    let app = routes::api_routes(ApiState::new(service));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(
        port = config.http_port,
        chat_model = %config.chat_model,
        embedding_model = %config.embedding_model,
        "Server listening"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
