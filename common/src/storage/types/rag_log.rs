use uuid::Uuid;

use crate::stored_object;

stored_object!(RagLogEntry, "rag_log", {
    session_id: String,
    patient_id: String,
    user_query: String,
    response: String,
    /// Snapshot of the exact chunk set sent to the model, four-dash delimited.
    chunks_extracted: String,
    latency_seconds: Option<f64>
});

impl RagLogEntry {
    pub fn new(
        session_id: String,
        patient_id: String,
        user_query: String,
        response: String,
        chunks_extracted: String,
        latency_seconds: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            patient_id,
            user_query,
            response,
            chunks_extracted,
            latency_seconds,
        }
    }
}
