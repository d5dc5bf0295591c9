//! Prompt text and message assembly. Wording is configuration-level policy;
//! the structural rules (context omission, temporal anchoring, history
//! ordering) are what the pipeline depends on.

use crate::assembly::NO_CONTEXT_SENTINEL;
use crate::completion::PromptMessage;
use crate::{ChatRole, ChatTurn, SystemContext};

/// Fixed role instruction prepended to every conversation.
pub const SYSTEM_PROMPT: &str = "\
You are a clinical insights assistant supporting physicians.
You must respond using ONLY the patient data provided in the current context;
do not use general medical knowledge or assumptions beyond the supplied data.

Your role is to surface observations, trends, and monitoring-relevant signals,
highlight changes over time with dates and values when available, and identify
areas that may warrant closer review, without clinical judgment.

Read through ALL provided document chunks thoroughly before concluding that
information is missing, and report every matching value found, not just the
first one encountered.

Do NOT make diagnoses, differential diagnoses, or treatment recommendations.
If information is incomplete after thorough examination, state explicitly what
is missing. Use clear, concise, clinician-facing language.";

/// Instruction block for patient summaries; the structured HEADLINE/BULLETS
/// wrapper is appended separately by [`structured_summary_request`].
pub const SUMMARY_PROMPT: &str = "\
Generate a concise, up-to-date patient summary for physician review.
The summary must reflect the available data across the patient record; when
multiple data points exist, prioritize the latest dated entry per category.

Rules:
- Use bullet points only, one concise line each
- Include specific values, dates, and trends when available
- Do NOT include diagnoses, interpretations, or treatment suggestions
- Explicitly note absent recent data (e.g. no labs recorded in 3 months)";

/// Task instruction for chat answers.
pub const CHAT_TASK_PROMPT: &str = "\
Answer the physician's question using the patient context provided.

Data extraction requirements:
- Read ALL provided document chunks completely; values may appear in tables,
  lists, or paragraphs, and in different chunks than their associated dates
- Check all date formats when searching for a specific date
- If multiple values exist for the same metric, report ALL of them sorted by
  date, most recent first
- For queries asking for the last N results, collect matching values across
  all chunks before sorting

Provide factual, concise answers based on the medical records, with exact
values, dates, and units when available. If the information is truly not in
the context after thorough examination, state that clearly.";

pub const INTRO_MESSAGE: &str = "Hello, Doctor. What would you like to know today?";

/// Binds "most recent"/"latest" language to the request's reference
/// timestamp instead of wall-clock time.
pub fn with_temporal_context(prompt: &str, system_context: &SystemContext) -> String {
    let reference_date = system_context
        .reference_time
        .format("%Y-%m-%d %H:%M:%S UTC");

    format!(
        "{prompt}\n\n\
         TEMPORAL CONTEXT (CRITICAL):\n\
         - Reference time: {reference_date}\n\
         - Terms like \"most recent\", \"latest\", \"last\", or \"recent\" MUST be\n\
           relative to the reference time above.\n\
         - Do NOT use data points newer than the reference time.\n\
         - Always anchor temporal statements to the reference time\n\
           (e.g. \"most recent value as of {reference_date}\").\n\
         - Interpret \"current\" status as \"as of {reference_date}\"."
    )
}

/// Wraps summary instructions with the strict output format the parser
/// expects.
pub fn structured_summary_request(instructions: &str) -> String {
    format!(
        "Instructions: {instructions}\n\
         Provide the response in the following format:\n\
         HEADLINE: Overall Status: <status summary>\n\
         BULLETS:\n\
         - <bullet point one>\n\
         - <bullet point two>\n\
         - <bullet point three>"
    )
}

fn system_context_metadata(system_context: &SystemContext) -> String {
    format!(
        "\n[System Context: mode={}, scope={}, reference_time={}]",
        system_context.context_mode,
        system_context.patient_scope,
        system_context.reference_time.to_rfc3339()
    )
}

/// Assembles the completion conversation: role instruction, patient context
/// (omitted entirely when it equals the no-context sentinel), task
/// instruction, prior turns in order, then the current question.
pub fn build_messages(
    context: &str,
    task_prompt: &str,
    history: &[ChatTurn],
    question: Option<&str>,
    system_context: &SystemContext,
) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(SYSTEM_PROMPT)];

    if !context.is_empty() && context != NO_CONTEXT_SENTINEL {
        messages.push(PromptMessage::system(format!(
            "Patient Context:\n{context}{}",
            system_context_metadata(system_context)
        )));
    }

    messages.push(PromptMessage::system(task_prompt));

    for turn in history {
        messages.push(match turn.role {
            ChatRole::User => PromptMessage::user(turn.content.clone()),
            ChatRole::Assistant => PromptMessage::assistant(turn.content.clone()),
        });
    }

    if let Some(question) = question {
        messages.push(PromptMessage::user(question));
    }

    messages
}
