//! Context-window budgeting.
//!
//! Estimates how many headlines fit in a model's context window and
//! truncates the list to that budget. The token figures are heuristics,
//! not a tokenizer: a fixed reserve for prompt scaffolding and a flat
//! per-headline estimate.

use tracing::debug;

use crate::llm::is_reasoning_model;
use crate::types::Headline;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tokens reserved for role framing, methodology and output instructions.
pub const PROMPT_RESERVE_TOKENS: usize = 1_500;

/// Rough token cost of one formatted headline line.
pub const TOKENS_PER_HEADLINE: usize = 80;

/// Never budget below this many headlines, however small the window.
pub const MIN_HEADLINES: usize = 10;

/// Window assumed for models we don't recognise.
pub const DEFAULT_CONTEXT_TOKENS: usize = 4_096;

/// Window of every reasoning model, as classified by [`is_reasoning_model`].
pub const REASONING_CONTEXT_TOKENS: usize = 200_000;

/// Context windows by model-name substring, most specific first.
/// Evaluated top to bottom; the first match wins.
const CONTEXT_LIMITS: &[(&str, usize)] = &[
    // Flagship long-context
    ("claude", 200_000),
    ("gpt-5", 200_000),
    ("gpt-4.1", 200_000),
    ("gemini", 200_000),
    // Turbo / long-context tier
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("grok", 128_000),
    // Base tier
    ("gpt-4", 8_192),
    // Legacy
    ("gpt-3.5-turbo-16k", 16_384),
    ("gpt-3.5", 4_096),
];

// ---------------------------------------------------------------------------
// Budgeting
// ---------------------------------------------------------------------------

/// Strip any routing prefix ("openai/gpt-4o" → "gpt-4o") and lowercase.
pub fn bare_model_name(model_name: &str) -> String {
    model_name
        .rsplit('/')
        .next()
        .unwrap_or(model_name)
        .trim()
        .to_lowercase()
}

/// Estimated context window, in tokens, for a model name.
pub fn max_context_tokens(model_name: &str) -> usize {
    if is_reasoning_model(model_name) {
        return REASONING_CONTEXT_TOKENS;
    }
    let name = bare_model_name(model_name);
    CONTEXT_LIMITS
        .iter()
        .find(|(pattern, _)| name.contains(pattern))
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_CONTEXT_TOKENS)
}

/// How many headlines fit for this model (never fewer than [`MIN_HEADLINES`]).
pub fn max_headlines(model_name: &str) -> usize {
    let available = max_context_tokens(model_name).saturating_sub(PROMPT_RESERVE_TOKENS);
    (available / TOKENS_PER_HEADLINE).max(MIN_HEADLINES)
}

/// Truncate `headlines` to the model's budget.
///
/// Input is assumed most-recent-first, so truncation keeps the freshest.
pub fn budget<'a>(model_name: &str, headlines: &'a [Headline]) -> &'a [Headline] {
    let limit = max_headlines(model_name);
    if headlines.len() > limit {
        debug!(
            model = model_name,
            supplied = headlines.len(),
            kept = limit,
            "Truncating headlines to context budget"
        );
        &headlines[..limit]
    } else {
        headlines
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
