//! Parsing of the structured summary output (HEADLINE + BULLETS markers)
//! with a fallback chain for model output that drifts from the format.

use serde::{Deserialize, Serialize};

/// Headline plus bullet content returned for patient summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientSummary {
    pub headline: String,
    pub content: Vec<String>,
}

const DEFAULT_HEADLINE: &str = "Overall Status: Clinical Update";
const HEADLINE_MARKER: &str = "HEADLINE:";
const BULLETS_MARKER: &str = "BULLETS:";
const STATUS_PREFIX: &str = "Overall Status:";

fn strip_bullet_glyphs(line: &str) -> &str {
    line.trim_start_matches(|c: char| {
        matches!(c, '-' | '•' | '*' | '.' | ' ') || c.is_ascii_digit()
    })
    .trim()
}

fn looks_like_bullet(line: &str) -> bool {
    line.starts_with('-')
        || line.starts_with('•')
        || line
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() && line[..line.len().min(3)].contains('.'))
}

/// Parses model output into a headline and bullet list.
///
/// Marker-based parse first; if no bullets were found under `BULLETS:`, any
/// bullet-shaped line anywhere in the output is collected; failing that,
/// non-header lines; failing that, the raw output as a single item. The
/// request never fails on malformed structure.
pub fn parse_structured_summary(content: &str) -> PatientSummary {
    let mut headline = DEFAULT_HEADLINE.to_owned();
    let mut bullets: Vec<String> = Vec::new();

    let mut in_bullets_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.to_uppercase().starts_with(HEADLINE_MARKER) {
            let headline_text = line[HEADLINE_MARKER.len()..].trim();
            headline = if headline_text.starts_with(STATUS_PREFIX) {
                headline_text.to_owned()
            } else {
                format!("{STATUS_PREFIX} {headline_text}")
            };
        } else if line.to_uppercase().starts_with(BULLETS_MARKER) {
            in_bullets_section = true;
        } else if in_bullets_section {
            let bullet = strip_bullet_glyphs(line);
            if !bullet.is_empty() {
                bullets.push(bullet.to_owned());
            }
        }
    }

    if bullets.is_empty() {
        bullets = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && looks_like_bullet(line))
            .map(|line| strip_bullet_glyphs(line).to_owned())
            .filter(|bullet| !bullet.is_empty())
            .collect();
    }

    if bullets.is_empty() {
        bullets = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.to_uppercase().starts_with(HEADLINE_MARKER))
            .map(ToOwned::to_owned)
            .collect();
    }

    if bullets.is_empty() {
        bullets = vec![content.trim().to_owned()];
    }

    PatientSummary {
        headline,
        content: bullets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_output() {
        let output = "HEADLINE: Overall Status: Stable on current regimen\n\
                      BULLETS:\n\
                      - Glucose trending down since June\n\
                      - BP within range over last 3 visits\n";
        let summary = parse_structured_summary(output);
        assert_eq!(summary.headline, "Overall Status: Stable on current regimen");
        assert_eq!(
            summary.content,
            vec![
                "Glucose trending down since June",
                "BP within range over last 3 visits"
            ]
        );
    }

    #[test]
    fn prefixes_status_marker_onto_bare_headlines() {
        let output = "HEADLINE: Improving\nBULLETS:\n- point";
        let summary = parse_structured_summary(output);
        assert_eq!(summary.headline, "Overall Status: Improving");
    }

    #[test]
    fn falls_back_to_bullet_shaped_lines_without_marker() {
        let output = "Here is the summary:\n• First observation\n2. Second observation";
        let summary = parse_structured_summary(output);
        assert_eq!(summary.headline, "Overall Status: Clinical Update");
        assert_eq!(
            summary.content,
            vec!["First observation", "Second observation"]
        );
    }

    #[test]
    fn falls_back_to_non_header_lines_then_raw_output() {
        let output = "HEADLINE: Update\nA plain sentence without bullets.";
        let summary = parse_structured_summary(output);
        assert_eq!(summary.content, vec!["A plain sentence without bullets."]);

        let raw = parse_structured_summary("single blob of text");
        assert_eq!(raw.content, vec!["single blob of text"]);
    }

    #[test]
    fn strips_numbering_and_glyphs() {
        let output = "BULLETS:\n1. first\n- second\n* third";
        let summary = parse_structured_summary(output);
        assert_eq!(summary.content, vec!["first", "second", "third"]);
    }
}
