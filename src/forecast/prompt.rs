//! Prompt construction.
//!
//! Output is a deterministic function of the definition, the budgeted
//! headlines and the fetched context documents. The closing format
//! instructions are strict because the response parser only understands
//! positional conventions.

use crate::data::ContextDocument;
use crate::types::{ForecastDefinition, Headline, PredictionType};

/// Cap on characters of a single context document pasted into the prompt.
const MAX_DOCUMENT_CHARS: usize = 12_000;

/// Short system message. Reasoning models receive it merged into the user turn.
pub fn system_prompt(prediction_type: PredictionType) -> &'static str {
    match prediction_type {
        PredictionType::Percentile => {
            "You are a calibrated superforecaster. You answer with a five-point \
             percentile distribution and nothing else on the final line."
        }
        PredictionType::PointEstimate => {
            "You are a calibrated superforecaster. You answer with a single \
             numeric estimate and nothing else on the final line."
        }
    }
}

/// Build the user prompt for one model.
pub fn build(
    definition: &ForecastDefinition,
    headlines: &[Headline],
    documents: &[ContextDocument],
) -> String {
    let mut prompt = String::with_capacity(4000 + headlines.len() * 120);

    prompt.push_str(
        "You are an expert geopolitical and economic forecaster. You will be given a \
         proposition, supporting context and a list of recent intelligence headlines. \
         Produce an independent, calibrated forecast.\n\n",
    );

    prompt.push_str(&format!("PROPOSITION: \"{}\"\n", definition.proposition.trim()));
    if !definition.units.trim().is_empty() {
        prompt.push_str(&format!("UNITS: {}\n", definition.units.trim()));
    }

    prompt.push_str(
        "\nMETHODOLOGY:\n\
         1. Start from the base rate for outcomes of this kind before looking at the news.\n\
         2. Weight each headline by its recency, magnitude and direct relevance.\n\
         3. Discount noisy or duplicated signals; do not overreact to a single report.\n\
         4. Even if the evidence is sparse or ambiguous you MUST still give your best \
         numeric answer. Never refuse and never answer with text only.\n",
    );

    if !documents.is_empty() {
        prompt.push_str("\nCONTEXT DOCUMENTS:\n");
        for (i, doc) in documents.iter().enumerate() {
            match &doc.content {
                Ok(text) => {
                    prompt.push_str(&format!("--- DOCUMENT {} ({}) ---\n", i + 1, doc.url));
                    prompt.push_str(truncate_chars(text.trim(), MAX_DOCUMENT_CHARS));
                    prompt.push('\n');
                }
                Err(e) => {
                    prompt.push_str(&format!(
                        "--- DOCUMENT {} ({}) ---\n[FAILED TO FETCH DOCUMENT: {}]\n",
                        i + 1,
                        doc.url,
                        e
                    ));
                }
            }
        }
    }

    prompt.push_str(&format!("\nRECENT HEADLINES ({}):\n", headlines.len()));
    if headlines.is_empty() {
        prompt.push_str("(no headlines available; rely on base rates)\n");
    }
    for (i, h) in headlines.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. [{}] (magnitude {:.1}) {} ({})\n",
            i + 1,
            h.category,
            h.magnitude,
            h.title.trim(),
            h.timestamp.format("%Y-%m-%d"),
        ));
    }

    prompt.push_str("\nOUTPUT FORMAT:\n");
    match definition.prediction_type {
        PredictionType::Percentile => {
            prompt.push_str(
                "Your final line MUST contain exactly five comma-separated numbers in \
                 ascending order: the 10th, 25th, 50th, 75th and 90th percentiles of your \
                 forecast distribution. No labels, no units, no percent signs, no prose \
                 on that line.\n\
                 Example final line:\n\
                 -5.2,2.1,8.5,15.3,22.7\n",
            );
        }
        PredictionType::PointEstimate => {
            prompt.push_str(
                "Your final line MUST contain exactly one number: your single best \
                 estimate. No labels, no units, no prose on that line.\n\
                 Example final line:\n\
                 42.5\n",
            );
        }
    }

    prompt
}

/// Truncate to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
