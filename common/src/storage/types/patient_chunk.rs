use uuid::Uuid;

use crate::stored_object;

stored_object!(PatientChunk, "patient_chunk", {
    document_id: String,
    patient_id: String,
    file_name: Option<String>,
    page_number: Option<i64>,
    chunk_index: Option<i64>,
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    embedding: Option<Vec<f32>>,
    /// Populated by vector search only; never carries meaning at rest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    similarity: Option<f32>
});

impl PatientChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        patient_id: String,
        file_name: Option<String>,
        page_number: Option<i64>,
        chunk_index: Option<i64>,
        text: Option<String>,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            patient_id,
            file_name,
            page_number,
            chunk_index,
            text,
            embedding,
            similarity: None,
        }
    }

    /// Blank or absent text makes a chunk inert for prompting and logging.
    pub fn has_text(&self) -> bool {
        self.text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}
