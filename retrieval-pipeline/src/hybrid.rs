//! Decides when pure vector search is likely to under-recall and which
//! lexical term should supplement it.
//!
//! Both the trigger heuristics and the recognized-terms vocabulary are
//! declarative pattern tables so the policy stays extensible and testable
//! without touching control flow.

use once_cell::sync::Lazy;
use regex::Regex;

/// Question shapes that imply exhaustive recall rather than a single value.
const TRIGGER_PATTERNS: &[&str] = &[
    r"\blast\s+\d+",    // "last 5", "last 10"
    r"\b(all|every|each)\s+", // "all results", "every test"
    r"\bhow many",      // "how many results"
    r"\blist\s+",       // "list all"
];

/// Lab and vital vocabulary recognized as supplemental search terms.
/// Plural variants are part of the pattern; the singular form is emitted as
/// an auxiliary candidate alongside the matched text.
const RECOGNIZED_TERM_PATTERNS: &[&str] = &[
    r"\btriglycerides?\b",
    r"\bcholesterol\b",
    r"\bglucose\b",
    r"\bhba1c\b",
    r"\bcreatinine\b",
    r"\bhemoglobin\b",
    r"\bplatelets?\b",
    r"\bwbc\b",
    r"\brbc\b",
    r"\blipids?\b",
    r"\bldl\b",
    r"\bhdl\b",
    r"\bblood pressure\b",
    r"\bbp\b",
    r"\bbmi\b",
    r"\bweight\b",
    r"\bheight\b",
];

static TRIGGERS: Lazy<Vec<Regex>> = Lazy::new(|| compile(TRIGGER_PATTERNS));
static RECOGNIZED_TERMS: Lazy<Vec<Regex>> = Lazy::new(|| compile(RECOGNIZED_TERM_PATTERNS));

#[allow(clippy::expect_used)]
fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("static pattern must compile"))
        .collect()
}

/// True when the question asks for multiple or exhaustive results, which
/// vector search alone tends to under-recall.
pub fn needs_hybrid_search(question: &str) -> bool {
    let question = question.to_lowercase();
    TRIGGERS.iter().any(|pattern| pattern.is_match(&question))
}

/// Extracts recognized lab/vital keywords from the question. Singular forms
/// are emitted alongside matched plurals for better substring coverage.
pub fn extract_domain_keywords(question: &str) -> Vec<String> {
    let question = question.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for pattern in RECOGNIZED_TERMS.iter() {
        if let Some(matched) = pattern.find(&question) {
            let keyword = matched.as_str().trim().to_owned();
            if keyword.ends_with('s') && keyword.len() > 3 {
                let singular = keyword[..keyword.len() - 1].to_owned();
                if !keywords.contains(&singular) {
                    keywords.push(singular);
                }
            }
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }

    keywords
}

/// The single supplemental search term: the longest candidate wins, longer
/// terms being assumed more specific. `None` skips augmentation entirely.
pub fn primary_search_term(question: &str) -> Option<String> {
    extract_domain_keywords(question)
        .into_iter()
        .max_by_key(String::len)
}
