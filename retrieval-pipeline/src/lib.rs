//! Retrieval and answering pipeline for single-patient medical records.
//!
//! The [`RagService`] orchestrates one question end to end: embed the
//! question, run vector search (widened with keyword and document expansion
//! for exhaustive-recall questions), re-rank the candidate pool, assemble a
//! bounded context, call the completion model, and log the exchange for
//! audit. Storage, model, and log destinations are trait objects so the
//! pipeline itself stays testable without a database or network.

pub mod assembly;
pub mod completion;
pub mod hybrid;
pub mod logging;
pub mod prompts;
pub mod scoring;
pub mod store;
pub mod summary;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_stream::stream;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::{patient_chunk::PatientChunk, rag_log::RagLogEntry},
    utils::config::AppConfig,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::assembly::{dedup_by_id, extend_unique, format_audit_log, format_context};
use crate::completion::{CompletionKind, CompletionModel, FragmentStream};
use crate::logging::QueryLogger;
use crate::prompts::{
    build_messages, structured_summary_request, with_temporal_context, CHAT_TASK_PROMPT,
    SUMMARY_PROMPT,
};
use crate::scoring::{rerank_chunks, RerankWeights};
use crate::store::ChunkStore;
use crate::summary::{parse_structured_summary, PatientSummary};

/// Document-expansion width when a keyword hit pulls in its siblings.
const RELATED_CHUNKS_PER_DOCUMENT: usize = 5;

const SUMMARY_LOG_QUERY: &str = "patient summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn of the conversation, replayed verbatim into the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Rag,
    Summary,
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rag => write!(f, "rag"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// Client-provided request framing: what mode the client is in and which
/// instant "now" means for temporal language in the question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContext {
    pub context_mode: ContextMode,
    pub patient_scope: String,
    pub reference_time: DateTime<Utc>,
}

impl SystemContext {
    /// Framing synthesized server-side when the client sends none.
    pub fn synthesized(patient_id: &str) -> Self {
        Self {
            context_mode: ContextMode::Rag,
            patient_scope: patient_id.to_owned(),
            reference_time: Utc::now(),
        }
    }
}

/// One question against one patient's record.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub patient_id: String,
    pub question: String,
    pub history: Vec<ChatTurn>,
    pub system_context: SystemContext,
    pub session_id: Option<String>,
}

/// Completed blocking answer, with the session id the exchange was logged
/// under.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub session_id: String,
}

fn resolve_session_id(session_id: Option<String>) -> String {
    session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| {
            let generated = Uuid::new_v4().simple().to_string();
            format!("auto-{}", &generated[..12])
        })
}

/// Carries everything needed to write the audit entry once the answer text
/// is known.
struct PendingLog {
    session_id: String,
    patient_id: String,
    user_query: String,
    chunks_extracted: String,
    started: Instant,
}

impl PendingLog {
    fn into_entry(self, response: String) -> RagLogEntry {
        RagLogEntry::new(
            self.session_id,
            self.patient_id,
            self.user_query,
            response,
            self.chunks_extracted,
            Some(self.started.elapsed().as_secs_f64()),
        )
    }
}

/// Commits the pending log entry when the stream is dropped, whether the
/// client read it to completion or disconnected mid-answer. Whatever answer
/// text accumulated by that point is what gets logged.
struct LogOnDrop {
    logger: QueryLogger,
    pending: Option<PendingLog>,
    answer: Arc<Mutex<String>>,
}

impl Drop for LogOnDrop {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let answer = self
            .answer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default();
        let logger = self.logger.clone();
        let entry = pending.into_entry(answer);
        tokio::spawn(async move {
            logger.record(entry).await;
        });
    }
}

/// The retrieval pipeline, wired once at startup and shared across requests.
pub struct RagService {
    store: Arc<dyn ChunkStore>,
    model: Arc<dyn CompletionModel>,
    logger: QueryLogger,
    config: Arc<AppConfig>,
}

impl RagService {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        model: Arc<dyn CompletionModel>,
        logger: QueryLogger,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            model,
            logger,
            config,
        }
    }

    /// Greeting shown when a session opens; involves no retrieval or model
    /// call.
    pub fn intro_message() -> &'static str {
        prompts::INTRO_MESSAGE
    }

    fn rerank_weights(&self) -> RerankWeights {
        RerankWeights {
            similarity: self.config.rerank_similarity_weight,
            keyword: self.config.rerank_keyword_weight,
            recency: self.config.rerank_recency_weight,
        }
    }

    /// Builds the final chunk set for one question.
    ///
    /// Vector search over the question embedding first, widened to the
    /// re-ranking pool size when re-ranking is on. Exhaustive-recall
    /// questions additionally pull keyword matches and their document
    /// siblings into the pool. An empty pool falls back to the most recently
    /// ingested chunks, so a patient with records never yields an empty
    /// context over a weak question.
    async fn retrieve_chunks(
        &self,
        patient_id: &str,
        question: &str,
        chunk_limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<PatientChunk>, AppError> {
        let retrieval_limit = if self.config.rerank_enabled {
            self.config.rerank_top_n
        } else {
            chunk_limit
        };

        let embedding = self.model.embed(question).await?;
        let similar = self
            .store
            .search_similar(
                patient_id,
                &embedding,
                retrieval_limit,
                min_similarity,
                self.config.vector_probe_budget,
            )
            .await?;

        let mut candidates = Vec::new();
        let mut seen = std::collections::HashSet::new();
        extend_unique(&mut candidates, similar, &mut seen);

        if hybrid::needs_hybrid_search(question) {
            if let Some(term) = hybrid::primary_search_term(question) {
                let keyword_hits = self
                    .store
                    .search_keyword(patient_id, &term, chunk_limit * 2)
                    .await?;

                let document_ids: Vec<String> = dedup_by_id(keyword_hits.clone())
                    .iter()
                    .map(|chunk| chunk.document_id.clone())
                    .collect::<std::collections::HashSet<_>>()
                    .into_iter()
                    .collect();
                let sibling_chunks = self
                    .store
                    .fetch_by_documents(patient_id, &document_ids, RELATED_CHUNKS_PER_DOCUMENT)
                    .await?;

                debug!(
                    term,
                    keyword_hits = keyword_hits.len(),
                    sibling_chunks = sibling_chunks.len(),
                    "hybrid search widened the candidate pool"
                );
                extend_unique(&mut candidates, keyword_hits, &mut seen);
                extend_unique(&mut candidates, sibling_chunks, &mut seen);
            }
            candidates.truncate(retrieval_limit * 2);
        }

        if candidates.is_empty() {
            info!(patient_id, "no retrieval candidates, falling back to recency");
            // Widened to the candidate pool size so re-ranking still selects
            // the final set from a full pool of recent chunks.
            candidates = self.store.fetch_recent(patient_id, retrieval_limit).await?;
        }

        Ok(rerank_chunks(
            candidates,
            question,
            chunk_limit,
            self.rerank_weights(),
            self.config.rerank_enabled,
        ))
    }

    async fn prepare_chat(
        &self,
        request: &RetrievalRequest,
    ) -> Result<(Vec<completion::PromptMessage>, PendingLog), AppError> {
        let started = Instant::now();
        let session_id = resolve_session_id(request.session_id.clone());

        let chunks = self
            .retrieve_chunks(
                &request.patient_id,
                &request.question,
                self.config.max_retrieval_chunks_chat,
                self.config.min_similarity_score_chat,
            )
            .await?;

        let context = format_context(&chunks);
        let audit = format_audit_log(&chunks);
        let task_prompt = with_temporal_context(CHAT_TASK_PROMPT, &request.system_context);
        let messages = build_messages(
            &context,
            &task_prompt,
            &request.history,
            Some(&request.question),
            &request.system_context,
        );

        Ok((
            messages,
            PendingLog {
                session_id,
                patient_id: request.patient_id.clone(),
                user_query: request.question.clone(),
                chunks_extracted: audit,
                started,
            },
        ))
    }

    /// Answers one question and blocks until the full answer is available.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn answer_question(&self, request: RetrievalRequest) -> Result<ChatAnswer, AppError> {
        let (messages, pending) = self.prepare_chat(&request).await?;

        let answer = self.model.complete(messages, CompletionKind::Chat).await?;

        let session_id = pending.session_id.clone();
        self.logger.record(pending.into_entry(answer.clone())).await;

        Ok(ChatAnswer { answer, session_id })
    }

    /// Streams answer fragments as the model produces them. The audit entry
    /// is written when the stream ends, including on client disconnect, with
    /// whatever portion of the answer was generated.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn answer_question_stream(
        &self,
        request: RetrievalRequest,
    ) -> Result<FragmentStream, AppError> {
        let (messages, pending) = self.prepare_chat(&request).await?;

        let mut upstream = self
            .model
            .complete_stream(messages, CompletionKind::Chat)
            .await?;

        let answer = Arc::new(Mutex::new(String::new()));
        let guard = LogOnDrop {
            logger: self.logger.clone(),
            pending: Some(pending),
            answer: Arc::clone(&answer),
        };

        let fragments = stream! {
            let _guard = guard;
            while let Some(fragment) = upstream.next().await {
                match fragment {
                    Ok(text) => {
                        if let Ok(mut buffer) = answer.lock() {
                            buffer.push_str(&text);
                        }
                        yield Ok(text);
                    }
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }

    async fn prepare_summary(
        &self,
        patient_id: &str,
        system_context: &SystemContext,
    ) -> Result<(Vec<completion::PromptMessage>, PendingLog), AppError> {
        let started = Instant::now();
        let session_id = resolve_session_id(None);

        // Summaries have no question to search against; the freshest chunks
        // are the summary's raw material.
        let chunks = self
            .store
            .fetch_recent(patient_id, self.config.max_retrieval_chunks_summary)
            .await?;

        let context = format_context(&chunks);
        let audit = format_audit_log(&chunks);
        let task_prompt =
            structured_summary_request(&with_temporal_context(SUMMARY_PROMPT, system_context));
        let messages = build_messages(&context, &task_prompt, &[], None, system_context);

        Ok((
            messages,
            PendingLog {
                session_id,
                patient_id: patient_id.to_owned(),
                user_query: SUMMARY_LOG_QUERY.to_owned(),
                chunks_extracted: audit,
                started,
            },
        ))
    }

    /// Generates the structured patient summary.
    #[instrument(skip(self, system_context))]
    pub async fn generate_patient_summary(
        &self,
        patient_id: &str,
        system_context: &SystemContext,
    ) -> Result<PatientSummary, AppError> {
        let (messages, pending) = self.prepare_summary(patient_id, system_context).await?;

        let raw = self
            .model
            .complete(messages, CompletionKind::Summary)
            .await?;

        self.logger.record(pending.into_entry(raw.clone())).await;

        Ok(parse_structured_summary(&raw))
    }

    /// Streams the raw structured summary text; clients parse the
    /// HEADLINE/BULLETS format as it arrives.
    #[instrument(skip(self, system_context))]
    pub async fn generate_patient_summary_stream(
        &self,
        patient_id: &str,
        system_context: &SystemContext,
    ) -> Result<FragmentStream, AppError> {
        let (messages, pending) = self.prepare_summary(patient_id, system_context).await?;

        let mut upstream = self
            .model
            .complete_stream(messages, CompletionKind::Summary)
            .await?;

        let answer = Arc::new(Mutex::new(String::new()));
        let guard = LogOnDrop {
            logger: self.logger.clone(),
            pending: Some(pending),
            answer: Arc::clone(&answer),
        };

        let fragments = stream! {
            let _guard = guard;
            while let Some(fragment) = upstream.next().await {
                match fragment {
                    Ok(text) => {
                        if let Ok(mut buffer) = answer.lock() {
                            buffer.push_str(&text);
                        }
                        yield Ok(text);
                    }
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::PromptMessage;
    use crate::logging::LogSink;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::time::Duration;

    fn test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            openai_api_key: "key".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "ns".into(),
            surrealdb_database: "db".into(),
            http_port: 3000,
            openai_base_url: "https://api.openai.com/v1".into(),
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-large".into(),
            openai_timeout_seconds: 60,
            max_retrieval_chunks_chat: 15,
            max_retrieval_chunks_summary: 8,
            min_similarity_score: 0.3,
            min_similarity_score_chat: 0.25,
            vector_probe_budget: 10,
            rerank_enabled: true,
            rerank_top_n: 50,
            rerank_top_k: 15,
            rerank_similarity_weight: 0.6,
            rerank_keyword_weight: 0.25,
            rerank_recency_weight: 0.15,
        })
    }

    fn test_request(question: &str) -> RetrievalRequest {
        RetrievalRequest {
            patient_id: "patient-1".into(),
            question: question.into(),
            history: Vec::new(),
            system_context: SystemContext {
                context_mode: ContextMode::Rag,
                patient_scope: "patient-1".into(),
                reference_time: Utc
                    .with_ymd_and_hms(2025, 11, 21, 12, 0, 0)
                    .single()
                    .expect("valid timestamp"),
            },
            session_id: None,
        }
    }

    fn chunk(id: &str, document_id: &str, text: &str, similarity: Option<f32>) -> PatientChunk {
        let mut chunk = PatientChunk::new(
            document_id.to_owned(),
            "patient-1".to_owned(),
            None,
            None,
            None,
            Some(text.to_owned()),
            None,
        );
        chunk.id = id.to_owned();
        chunk.similarity = similarity;
        chunk
    }

    #[derive(Default)]
    struct MockStore {
        similar: Vec<PatientChunk>,
        keyword: Vec<PatientChunk>,
        by_documents: Vec<PatientChunk>,
        recent: Vec<PatientChunk>,
        recent_limits: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChunkStore for MockStore {
        async fn fetch_recent(
            &self,
            _patient_id: &str,
            limit: usize,
        ) -> Result<Vec<PatientChunk>, AppError> {
            self.recent_limits.lock().expect("lock poisoned").push(limit);
            let mut chunks = self.recent.clone();
            chunks.truncate(limit);
            Ok(chunks)
        }

        async fn search_keyword(
            &self,
            _patient_id: &str,
            _term: &str,
            limit: usize,
        ) -> Result<Vec<PatientChunk>, AppError> {
            let mut chunks = self.keyword.clone();
            chunks.truncate(limit);
            Ok(chunks)
        }

        async fn fetch_by_documents(
            &self,
            _patient_id: &str,
            document_ids: &[String],
            _per_document: usize,
        ) -> Result<Vec<PatientChunk>, AppError> {
            if document_ids.is_empty() {
                return Ok(Vec::new());
            }
            Ok(self.by_documents.clone())
        }

        async fn search_similar(
            &self,
            _patient_id: &str,
            _embedding: &[f32],
            limit: usize,
            _min_similarity: f32,
            _probe_budget: usize,
        ) -> Result<Vec<PatientChunk>, AppError> {
            let mut chunks = self.similar.clone();
            chunks.truncate(limit);
            Ok(chunks)
        }
    }

    struct MockModel {
        answer: String,
        fragments: Vec<String>,
        seen_messages: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl MockModel {
        fn new(answer: &str, fragments: &[&str]) -> Self {
            Self {
                answer: answer.to_owned(),
                fragments: fragments.iter().map(|s| (*s).to_owned()).collect(),
                seen_messages: Mutex::new(Vec::new()),
            }
        }

        fn last_context(&self) -> String {
            let seen = self.seen_messages.lock().expect("lock poisoned");
            let conversation = seen.last().expect("model was never called");
            conversation
                .iter()
                .map(|message| message.content.clone())
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    #[async_trait]
    impl CompletionModel for MockModel {
        async fn complete(
            &self,
            messages: Vec<PromptMessage>,
            _kind: CompletionKind,
        ) -> Result<String, AppError> {
            self.seen_messages
                .lock()
                .expect("lock poisoned")
                .push(messages);
            Ok(self.answer.clone())
        }

        async fn complete_stream(
            &self,
            messages: Vec<PromptMessage>,
            _kind: CompletionKind,
        ) -> Result<FragmentStream, AppError> {
            self.seen_messages
                .lock()
                .expect("lock poisoned")
                .push(messages);
            let fragments = self.fragments.clone();
            Ok(Box::pin(futures::stream::iter(
                fragments.into_iter().map(Ok),
            )))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        entries: Mutex<Vec<RagLogEntry>>,
    }

    #[async_trait]
    impl LogSink for CapturingSink {
        async fn append(&self, entry: RagLogEntry) -> Result<(), AppError> {
            self.entries.lock().expect("lock poisoned").push(entry);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn append(&self, _entry: RagLogEntry) -> Result<(), AppError> {
            Err(AppError::InternalError("sink unavailable".into()))
        }
    }

    fn service(
        store: MockStore,
        model: Arc<MockModel>,
        sink: Arc<dyn LogSink>,
    ) -> RagService {
        RagService::new(
            Arc::new(store),
            model,
            QueryLogger::new(sink),
            test_config(),
        )
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_recent_chunks() {
        let store = MockStore {
            recent: vec![chunk("r1", "doc-1", "Discharge note from June", None)],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new("answer", &[]));
        let sink = Arc::new(CapturingSink::default());
        let service = service(store, Arc::clone(&model), Arc::clone(&sink) as Arc<dyn LogSink>);

        let answer = service
            .answer_question(test_request("what happened at discharge?"))
            .await
            .expect("answer");

        assert_eq!(answer.answer, "answer");
        assert!(model.last_context().contains("Discharge note from June"));

        let entries = sink.entries.lock().expect("lock poisoned");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].chunks_extracted.contains("Discharge note"));
        assert!(entries[0].latency_seconds.is_some());
    }

    #[tokio::test]
    async fn recency_fallback_fetches_the_full_candidate_pool() {
        let store = Arc::new(MockStore {
            recent: vec![chunk("r1", "doc-1", "Progress note", None)],
            ..MockStore::default()
        });
        let model = Arc::new(MockModel::new("answer", &[]));
        let service = RagService::new(
            Arc::clone(&store) as Arc<dyn ChunkStore>,
            model,
            QueryLogger::disabled(),
            test_config(),
        );

        service
            .answer_question(test_request("anything recorded?"))
            .await
            .expect("answer");

        // Re-ranking is enabled, so the fallback pool is the re-ranking
        // candidate size, not the final chunk limit.
        let limits = store.recent_limits.lock().expect("lock poisoned");
        assert_eq!(limits.as_slice(), &[50]);
    }

    #[tokio::test]
    async fn hybrid_merge_is_capped_at_twice_the_retrieval_limit() {
        let keyword: Vec<PatientChunk> = (0..10)
            .map(|i| {
                chunk(
                    &format!("k{i}"),
                    "doc-1",
                    &format!("Triglycerides {i} entry"),
                    None,
                )
            })
            .collect();
        let store = MockStore {
            similar: vec![chunk("v", "doc-1", "Triglycerides vector hit", Some(0.9))],
            keyword,
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new("answer", &[]));
        let mut config = (*test_config()).clone();
        config.rerank_top_n = 3;
        let service = RagService::new(
            Arc::new(store),
            Arc::clone(&model) as Arc<dyn CompletionModel>,
            QueryLogger::disabled(),
            Arc::new(config),
        );

        service
            .answer_question(test_request("list all triglyceride readings"))
            .await
            .expect("answer");

        // Pool cap is 2 x rerank_top_n = 6; the vector hit plus the first
        // five keyword hits survive, the rest are cut before re-ranking.
        let context = model.last_context();
        assert!(context.contains("Triglycerides vector hit"));
        assert_eq!(context.matches("Triglycerides").count(), 6);
        assert!(!context.contains("Triglycerides 5 entry"));
    }

    #[tokio::test]
    async fn hybrid_questions_merge_vector_keyword_and_sibling_chunks() {
        let store = MockStore {
            similar: vec![chunk("a", "doc-1", "Triglycerides 150 mg/dL", Some(0.9))],
            keyword: vec![
                chunk("a", "doc-1", "Triglycerides 150 mg/dL", None),
                chunk("b", "doc-2", "Triglycerides 180 mg/dL", None),
            ],
            by_documents: vec![chunk("c", "doc-2", "Triglycerides 210 mg/dL", None)],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new("answer", &[]));
        let sink = Arc::new(CapturingSink::default());
        let service = service(store, Arc::clone(&model), Arc::clone(&sink) as Arc<dyn LogSink>);

        service
            .answer_question(test_request("list all triglyceride readings"))
            .await
            .expect("answer");

        let context = model.last_context();
        assert!(context.contains("150 mg/dL"));
        assert!(context.contains("180 mg/dL"));
        assert!(context.contains("210 mg/dL"));
        // Chunk "a" arrived from both vector and keyword search; it must
        // appear once.
        assert_eq!(context.matches("150 mg/dL").count(), 1);
    }

    #[tokio::test]
    async fn streamed_fragments_concatenate_to_the_blocking_answer() {
        let store = MockStore {
            similar: vec![chunk("a", "doc-1", "Glucose 101 mg/dL", Some(0.9))],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new(
            "Glucose was 101 mg/dL.",
            &["Glucose was ", "101 mg/dL."],
        ));
        let sink = Arc::new(CapturingSink::default());
        let service = service(store, Arc::clone(&model), Arc::clone(&sink) as Arc<dyn LogSink>);

        let stream = service
            .answer_question_stream(test_request("latest glucose?"))
            .await
            .expect("stream");
        let fragments: Vec<String> = stream
            .filter_map(|fragment| async move { fragment.ok() })
            .collect()
            .await;

        assert_eq!(fragments.concat(), "Glucose was 101 mg/dL.");

        // The audit entry is committed from the stream's drop guard.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let entries = sink.entries.lock().expect("lock poisoned");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response, "Glucose was 101 mg/dL.");
    }

    #[tokio::test]
    async fn dropped_stream_still_logs_the_partial_answer() {
        let store = MockStore {
            similar: vec![chunk("a", "doc-1", "Glucose 101 mg/dL", Some(0.9))],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new(
            "Glucose was 101 mg/dL.",
            &["Glucose was ", "101 mg/dL."],
        ));
        let sink = Arc::new(CapturingSink::default());
        let service = service(store, Arc::clone(&model), Arc::clone(&sink) as Arc<dyn LogSink>);

        let mut stream = service
            .answer_question_stream(test_request("latest glucose?"))
            .await
            .expect("stream");
        let first = stream
            .next()
            .await
            .expect("first fragment")
            .expect("fragment ok");
        assert_eq!(first, "Glucose was ");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let entries = sink.entries.lock().expect("lock poisoned");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response, "Glucose was ");
    }

    #[tokio::test]
    async fn log_sink_failure_does_not_fail_the_answer() {
        let store = MockStore {
            similar: vec![chunk("a", "doc-1", "BP 120/80", Some(0.8))],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new("answer", &[]));
        let service = service(store, Arc::clone(&model), Arc::new(FailingSink));

        let answer = service
            .answer_question(test_request("was bp elevated?"))
            .await
            .expect("logging failure must not propagate");
        assert_eq!(answer.answer, "answer");
    }

    #[tokio::test]
    async fn generated_session_ids_use_the_auto_prefix() {
        assert_eq!(resolve_session_id(Some("session-7".into())), "session-7");

        let generated = resolve_session_id(None);
        assert!(generated.starts_with("auto-"));
        assert_eq!(generated.len(), "auto-".len() + 12);

        // Blank ids are treated as absent.
        assert!(resolve_session_id(Some("  ".into())).starts_with("auto-"));
    }

    #[tokio::test]
    async fn summary_parses_structured_output_and_logs() {
        let store = MockStore {
            recent: vec![chunk("a", "doc-1", "HbA1c 6.9% on 2025-10-02", None)],
            ..MockStore::default()
        };
        let model = Arc::new(MockModel::new(
            "HEADLINE: Overall Status: Stable\nBULLETS:\n- HbA1c 6.9% on 2025-10-02",
            &[],
        ));
        let sink = Arc::new(CapturingSink::default());
        let service = service(store, Arc::clone(&model), Arc::clone(&sink) as Arc<dyn LogSink>);

        let summary = service
            .generate_patient_summary("patient-1", &test_request("").system_context)
            .await
            .expect("summary");

        assert_eq!(summary.headline, "Overall Status: Stable");
        assert_eq!(summary.content, vec!["HbA1c 6.9% on 2025-10-02"]);

        let entries = sink.entries.lock().expect("lock poisoned");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_query, SUMMARY_LOG_QUERY);
    }
}
