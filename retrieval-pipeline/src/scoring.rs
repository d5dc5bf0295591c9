//! Second-pass re-ranking of retrieval candidates.
//!
//! Candidates arrive with mixed provenance: vector-sourced chunks carry a
//! `similarity`, keyword- and document-expansion chunks do not. The composite
//! score blends semantic similarity, lexical overlap with the question, and
//! list-position recency. For chunks without a similarity the keyword score
//! scaled by 0.8 stands in as a relevance proxy; this systematically favors
//! vector-sourced chunks when keyword overlap is weak and is kept as a known
//! tuning concern rather than corrected here.

use std::cmp::Ordering;
use std::collections::HashSet;

use common::storage::types::patient_chunk::PatientChunk;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Weights for the composite score. Independently configured; expected, but
/// not enforced, to sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub similarity: f32,
    pub keyword: f32,
    pub recency: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            keyword: 0.25,
            recency: 0.15,
        }
    }
}

/// A chunk paired with its composite score; lives only for the duration of
/// one ranking pass.
#[derive(Debug)]
struct ScoredChunk {
    chunk: PatientChunk,
    composite_score: f32,
}

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\b\w+\b").expect("static pattern must compile")
});

/// Function words excluded from lexical scoring.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "what", "when", "where", "how", "is", "are", "was", "were", "be", "been", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should",
    ]
    .into_iter()
    .collect()
});

fn significant_terms(question: &str) -> Vec<String> {
    let question = question.to_lowercase();
    WORD_PATTERN
        .find_iter(&question)
        .map(|word| word.as_str().to_owned())
        .filter(|word| word.len() > 2 && !STOPWORDS.contains(word.as_str()))
        .collect()
}

/// Lexical overlap between the question and a chunk, in [0, 1].
///
/// Base score is the fraction of significant question terms present in the
/// chunk text, with a bonus of up to 0.3 for repeated occurrences beyond the
/// first hit.
pub fn keyword_score(text: Option<&str>, question: &str) -> f32 {
    let Some(text) = text else {
        return 0.0;
    };
    if text.trim().is_empty() {
        return 0.0;
    }

    let terms = significant_terms(question);
    if terms.is_empty() {
        return 0.0;
    }

    let text = text.to_lowercase();
    let matches = terms.iter().filter(|term| text.contains(term.as_str())).count();

    #[allow(clippy::cast_precision_loss)]
    let base_score = matches as f32 / terms.len() as f32;

    let total_occurrences: usize = terms
        .iter()
        .map(|term| text.matches(term.as_str()).count())
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let occurrence_bonus = ((total_occurrences.saturating_sub(matches)) as f32 * 0.1).min(0.3);

    (base_score + occurrence_bonus).min(1.0)
}

/// Position-based recency in [0.1, 1]: input order is the recency signal
/// (most recent first), decayed exponentially. A single-element list scores
/// 1.0.
pub fn recency_score(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let normalized = index as f32 / (len - 1) as f32;
    (-2.0 * normalized).exp().max(0.1)
}

fn composite_score(
    chunk: &PatientChunk,
    index: usize,
    len: usize,
    question: &str,
    weights: RerankWeights,
) -> f32 {
    let keyword = keyword_score(chunk.text.as_deref(), question);
    let recency = recency_score(index, len);

    // Keyword-sourced chunks carry no similarity; the scaled keyword score
    // stands in for it.
    let similarity = chunk
        .similarity
        .map_or(keyword * 0.8, |value| value.clamp(0.0, 1.0));

    weights.similarity * similarity + weights.keyword * keyword + weights.recency * recency
}

/// Selects the final `top_k` chunks by descending composite score.
///
/// Disabled re-ranking truncates an oversized input; an input already within
/// `top_k` is returned unchanged, order included.
pub fn rerank_chunks(
    mut chunks: Vec<PatientChunk>,
    question: &str,
    top_k: usize,
    weights: RerankWeights,
    enabled: bool,
) -> Vec<PatientChunk> {
    if !enabled {
        chunks.truncate(top_k);
        return chunks;
    }
    if chunks.len() <= top_k {
        return chunks;
    }

    let len = chunks.len();
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| ScoredChunk {
            composite_score: composite_score(&chunk, index, len, question, weights),
            chunk,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(top_k);

    debug!(
        candidates = len,
        kept = scored.len(),
        top_score = scored.first().map(|entry| entry.composite_score),
        "re-ranked retrieval candidates"
    );

    scored.into_iter().map(|entry| entry.chunk).collect()
}
