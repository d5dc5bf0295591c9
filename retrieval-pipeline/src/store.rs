//! Chunk retrieval against SurrealDB: vector search over the HNSW index
//! with a brute-force fallback, keyword and document lookups, and the
//! recency ordering used when semantic retrieval comes back empty.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::patient_chunk::PatientChunk},
};
use tracing::{debug, warn};

/// Read operations the retrieval pipeline needs from chunk storage.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Most recently ingested chunks for a patient.
    async fn fetch_recent(&self, patient_id: &str, limit: usize)
        -> Result<Vec<PatientChunk>, AppError>;

    /// Chunks whose text contains `term`, case-insensitively.
    async fn search_keyword(
        &self,
        patient_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<PatientChunk>, AppError>;

    /// All chunks belonging to the given documents, capped per document and
    /// returned in document order.
    async fn fetch_by_documents(
        &self,
        patient_id: &str,
        document_ids: &[String],
        per_document: usize,
    ) -> Result<Vec<PatientChunk>, AppError>;

    /// Nearest-neighbour search against the chunk embeddings. Results carry
    /// a populated `similarity` and are filtered to `min_similarity`.
    async fn search_similar(
        &self,
        patient_id: &str,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
        probe_budget: usize,
    ) -> Result<Vec<PatientChunk>, AppError>;
}

/// Orders two optional values ascending, absent values after present ones.
fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Newest ingestion first, then page and chunk index within a document.
pub fn recency_order(a: &PatientChunk, b: &PatientChunk) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| nulls_last(a.page_number, b.page_number))
        .then_with(|| nulls_last(a.chunk_index, b.chunk_index))
}

/// Reading order within and across documents.
pub fn document_order(a: &PatientChunk, b: &PatientChunk) -> Ordering {
    a.document_id
        .cmp(&b.document_id)
        .then_with(|| nulls_last(a.page_number, b.page_number))
        .then_with(|| nulls_last(a.chunk_index, b.chunk_index))
}

/// SurrealDB-backed [`ChunkStore`].
pub struct SurrealChunkStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealChunkStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Full scan with an explicit distance computation. Only used when the
    /// knn query fails, typically because the HNSW index is missing.
    async fn search_similar_fallback(
        &self,
        patient_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<PatientChunk>, AppError> {
        let query = format!(
            "SELECT *, (1 - vector::distance::euclidean(embedding, {embedding:?})) AS similarity \
             FROM patient_chunk \
             WHERE patient_id = $patient_id AND embedding != NONE \
             ORDER BY similarity DESC \
             LIMIT {limit}"
        );

        let mut response = self
            .db
            .query(query)
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        let chunks: Vec<PatientChunk> = response.take(0)?;
        Ok(chunks)
    }
}

#[async_trait]
impl ChunkStore for SurrealChunkStore {
    async fn fetch_recent(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<PatientChunk>, AppError> {
        let query = format!(
            "SELECT * OMIT embedding FROM patient_chunk \
             WHERE patient_id = $patient_id \
             ORDER BY created_at DESC \
             LIMIT {limit}"
        );

        let mut response = self
            .db
            .query(query)
            .bind(("patient_id", patient_id.to_owned()))
            .await?;
        let mut chunks: Vec<PatientChunk> = response.take(0)?;

        // The query orders by ingestion time only; page and chunk index
        // tie-breaking happens here.
        chunks.sort_by(recency_order);
        debug!(patient_id, count = chunks.len(), "fetched recent chunks");
        Ok(chunks)
    }

    async fn search_keyword(
        &self,
        patient_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<PatientChunk>, AppError> {
        let query = format!(
            "SELECT * OMIT embedding FROM patient_chunk \
             WHERE patient_id = $patient_id \
               AND text != NONE \
               AND string::contains(string::lowercase(text), string::lowercase($term)) \
             ORDER BY created_at DESC \
             LIMIT {limit}"
        );

        let mut response = self
            .db
            .query(query)
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("term", term.to_owned()))
            .await?;
        let mut chunks: Vec<PatientChunk> = response.take(0)?;

        chunks.sort_by(recency_order);
        debug!(patient_id, term, count = chunks.len(), "keyword search");
        Ok(chunks)
    }

    async fn fetch_by_documents(
        &self,
        patient_id: &str,
        document_ids: &[String],
        per_document: usize,
    ) -> Result<Vec<PatientChunk>, AppError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let total_limit = document_ids.len() * per_document;
        // Ordered before the limit so the subset the backend keeps is
        // deterministic when more rows match than the coarse total.
        let query = format!(
            "SELECT * OMIT embedding FROM patient_chunk \
             WHERE patient_id = $patient_id AND document_id IN $document_ids \
             ORDER BY document_id, page_number, chunk_index \
             LIMIT {total_limit}"
        );

        let mut response = self
            .db
            .query(query)
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("document_ids", document_ids.to_vec()))
            .await?;
        let mut chunks: Vec<PatientChunk> = response.take(0)?;

        chunks.sort_by(document_order);

        // The query limit is a coarse total; the per-document cap is
        // enforced here on the sorted rows.
        let mut per_document_counts: HashMap<&str, usize> = HashMap::new();
        let mut capped = Vec::with_capacity(chunks.len().min(total_limit));
        for chunk in &chunks {
            let count = per_document_counts
                .entry(chunk.document_id.as_str())
                .or_insert(0);
            if *count < per_document {
                *count += 1;
                capped.push(chunk.clone());
            }
        }
        Ok(capped)
    }

    async fn search_similar(
        &self,
        patient_id: &str,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
        probe_budget: usize,
    ) -> Result<Vec<PatientChunk>, AppError> {
        let query = format!(
            "SELECT * OMIT embedding, (1 - vector::distance::knn()) AS similarity \
             FROM patient_chunk \
             WHERE patient_id = $patient_id AND embedding <|{limit},{probe_budget}|> {embedding:?} \
             ORDER BY similarity DESC"
        );

        let result = self
            .db
            .query(query)
            .bind(("patient_id", patient_id.to_owned()))
            .await;

        let mut chunks: Vec<PatientChunk> = match result {
            Ok(mut response) => response.take(0)?,
            Err(error) => {
                warn!(
                    patient_id,
                    error = %error,
                    "knn query failed, falling back to brute-force scan"
                );
                self.search_similar_fallback(patient_id, embedding, limit)
                    .await?
            }
        };

        chunks.retain(|chunk| {
            chunk.has_text() && chunk.similarity.is_some_and(|score| score >= min_similarity)
        });
        chunks.truncate(limit);
        debug!(patient_id, count = chunks.len(), "vector search");
        Ok(chunks)
    }
}
