//! Response parsing.
//!
//! Extracts numbers from free-form model output. Models are told to put
//! the answer on the final line, so only the last few non-blank lines are
//! considered; earlier lines often contain numbers quoted from the
//! headlines.

use crate::types::PercentilePredictions;

/// How many trailing non-blank lines are candidates for the answer.
pub const CANDIDATE_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("no ascending five-value percentile line found in response")]
    NoPercentiles { text: String },

    #[error("no numeric point estimate found in response")]
    NoPointEstimate { text: String },
}

impl ParseError {
    /// The original response, kept for diagnostics.
    pub fn text(&self) -> &str {
        match self {
            ParseError::NoPercentiles { text } | ParseError::NoPointEstimate { text } => text,
        }
    }
}

/// Last [`CANDIDATE_LINES`] non-blank lines, final line first.
fn candidate_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(CANDIDATE_LINES)
}

/// Keep only digits, '.' and '-', then parse as a finite number.
fn parse_numeric(field: &str) -> Option<f64> {
    let cleaned: String = field
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn percentiles_from_line(line: &str) -> Option<PercentilePredictions> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 5 {
        return None;
    }
    let mut values = [0.0f64; 5];
    for (slot, field) in values.iter_mut().zip(&fields) {
        *slot = parse_numeric(field)?;
    }
    PercentilePredictions::from_array(values)
}

/// Extract P10/P25/P50/P75/P90 from a response.
pub fn parse_percentiles(text: &str) -> Result<PercentilePredictions, ParseError> {
    candidate_lines(text)
        .find_map(percentiles_from_line)
        .ok_or_else(|| ParseError::NoPercentiles {
            text: text.to_string(),
        })
}

/// Extract a single numeric estimate from a response.
pub fn parse_point_estimate(text: &str) -> Result<f64, ParseError> {
    candidate_lines(text)
        .find_map(parse_numeric)
        .ok_or_else(|| ParseError::NoPointEstimate {
            text: text.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
