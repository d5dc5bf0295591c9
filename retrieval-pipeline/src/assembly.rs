//! Formats the selected chunk set into the prompt context block and the
//! audit-log snapshot, and merges candidate lists from multiple sources.

use std::collections::HashSet;

use common::storage::types::patient_chunk::PatientChunk;

/// Returned instead of an empty context so prompt construction can detect
/// "no context" unambiguously.
pub const NO_CONTEXT_SENTINEL: &str = "No patient context available.";

/// Audit-log counterpart of [`NO_CONTEXT_SENTINEL`].
pub const NO_CHUNKS_SENTINEL: &str = "No chunks retrieved";

/// Delimiter between chunk blocks in the audit-log snapshot.
const AUDIT_DELIMITER: &str = "\n----\n";

const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".txt", ".doc", ".docx"];

fn strip_document_extension(name: &str) -> &str {
    for extension in DOCUMENT_EXTENSIONS {
        if let Some(stripped) = name.strip_suffix(extension) {
            return stripped;
        }
    }
    name
}

fn display_document_name(chunk: &PatientChunk) -> String {
    chunk.file_name.as_deref().map_or_else(
        || chunk.document_id.clone(),
        |file_name| strip_document_extension(file_name).to_owned(),
    )
}

/// Renders chunks into the prompt context block.
///
/// Chunks with blank or absent text are excluded. Each block is labeled with
/// the document name (file name preferred over document id) and page, then
/// the chunk text; blocks are joined with a blank line.
pub fn format_context(chunks: &[PatientChunk]) -> String {
    let formatted: Vec<String> = chunks
        .iter()
        .filter(|chunk| chunk.has_text())
        .map(|chunk| {
            let mut prefix = format!("Document: {}", display_document_name(chunk));
            if let Some(page) = chunk.page_number {
                prefix.push_str(&format!(" (page {page})"));
            }
            format!("{prefix}:\n{}", chunk.text.as_deref().unwrap_or_default())
        })
        .collect();

    if formatted.is_empty() {
        NO_CONTEXT_SENTINEL.to_owned()
    } else {
        formatted.join("\n\n")
    }
}

/// Renders chunks into the audit snapshot stored with each log entry:
/// metadata lines followed by text per chunk, chunks separated by a
/// four-dash line.
pub fn format_audit_log(chunks: &[PatientChunk]) -> String {
    let formatted: Vec<String> = chunks
        .iter()
        .filter(|chunk| chunk.has_text())
        .map(|chunk| {
            let mut lines = Vec::new();
            if chunk.file_name.is_some() {
                lines.push(format!("Document: {}", display_document_name(chunk)));
            } else {
                lines.push(format!("Document ID: {}", chunk.document_id));
            }
            if let Some(page) = chunk.page_number {
                lines.push(format!("Page: {page}"));
            }
            if let Some(index) = chunk.chunk_index {
                lines.push(format!("Chunk Index: {index}"));
            }
            if let Some(similarity) = chunk.similarity {
                lines.push(format!("Similarity: {similarity:.4}"));
            }
            lines.push(chunk.text.clone().unwrap_or_default());
            lines.join("\n")
        })
        .collect();

    if formatted.is_empty() {
        NO_CHUNKS_SENTINEL.to_owned()
    } else {
        formatted.join(AUDIT_DELIMITER)
    }
}

/// Appends `incoming` chunks whose ids have not been seen yet, preserving
/// first-seen order. `seen` carries dedup state across successive merges.
pub fn extend_unique(
    chunks: &mut Vec<PatientChunk>,
    incoming: Vec<PatientChunk>,
    seen: &mut HashSet<String>,
) {
    for chunk in incoming {
        if seen.insert(chunk.id.clone()) {
            chunks.push(chunk);
        }
    }
}

/// Removes duplicate chunk ids, keeping the first occurrence of each.
pub fn dedup_by_id(chunks: Vec<PatientChunk>) -> Vec<PatientChunk> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(chunks.len());
    extend_unique(&mut unique, chunks, &mut seen);
    unique
}
