//! Best-effort persistence of answered questions for audit.
//!
//! A failed log write must never fail the request that produced it; every
//! error path ends in a `tracing::error!` and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::rag_log::RagLogEntry},
};
use tracing::{debug, error, warn};

/// Append-only destination for [`RagLogEntry`] records.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, entry: RagLogEntry) -> Result<(), AppError>;
}

pub struct SurrealLogSink {
    db: Arc<SurrealDbClient>,
}

impl SurrealLogSink {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LogSink for SurrealLogSink {
    async fn append(&self, entry: RagLogEntry) -> Result<(), AppError> {
        self.db.store_item(entry).await?;
        Ok(())
    }
}

/// Wraps an optional sink and absorbs its failures.
#[derive(Clone)]
pub struct QueryLogger {
    sink: Option<Arc<dyn LogSink>>,
}

impl QueryLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A logger that drops everything; useful when no sink is configured.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub async fn record(&self, entry: RagLogEntry) {
        let Some(sink) = &self.sink else {
            warn!("query log sink not configured - skipping log entry");
            return;
        };

        let session_id = entry.session_id.clone();
        match sink.append(entry).await {
            Ok(()) => debug!(%session_id, "recorded rag query log entry"),
            Err(err) => error!(%session_id, error = %err, "failed to record rag query log entry"),
        }
    }
}
