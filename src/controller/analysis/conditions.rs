//! Measurement condition parsing and evaluation
//!
//! Conditions compare the provider-returned value against a numeric
//! threshold: `result < 0.95`, `result >= 100`, `result != 0`. They are
//! parsed at admission time so a malformed condition never reaches a run.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("condition {0:?} must have the form `result <op> <number>`")]
    Unparseable(String),

    #[error("condition {condition:?} has invalid threshold {threshold:?}")]
    InvalidThreshold { condition: String, threshold: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

// Two-character operators first, so "<=" is not read as "<"
const OPERATORS: [(&str, Comparison); 6] = [
    ("<=", Comparison::Le),
    (">=", Comparison::Ge),
    ("==", Comparison::Eq),
    ("!=", Comparison::Ne),
    ("<", Comparison::Lt),
    (">", Comparison::Gt),
];

fn parse(condition: &str) -> Result<(Comparison, f64), ConditionError> {
    let trimmed = condition.trim();
    if trimmed.is_empty() {
        return Err(ConditionError::Empty);
    }

    let rest = trimmed
        .strip_prefix("result")
        .ok_or_else(|| ConditionError::Unparseable(condition.to_string()))?
        .trim_start();

    for (symbol, comparison) in OPERATORS {
        if let Some(threshold_str) = rest.strip_prefix(symbol) {
            let threshold_str = threshold_str.trim();
            let threshold = threshold_str.parse::<f64>().map_err(|_| {
                ConditionError::InvalidThreshold {
                    condition: condition.to_string(),
                    threshold: threshold_str.to_string(),
                }
            })?;
            return Ok((comparison, threshold));
        }
    }

    Err(ConditionError::Unparseable(condition.to_string()))
}

/// Check a condition for syntactic validity without a value
pub fn validate_condition(condition: &str) -> Result<(), ConditionError> {
    parse(condition).map(|_| ())
}

/// Evaluate a condition against a measured value
pub fn evaluate_condition(condition: &str, result: f64) -> Result<bool, ConditionError> {
    let (comparison, threshold) = parse(condition)?;
    Ok(match comparison {
        Comparison::Lt => result < threshold,
        Comparison::Le => result <= threshold,
        Comparison::Gt => result > threshold,
        Comparison::Ge => result >= threshold,
        Comparison::Eq => result == threshold,
        Comparison::Ne => result != threshold,
    })
}
