//! Unified error type for the core crate.
//!
//! Downstream crates define their own error enums and convert into or wrap
//! [`CoreError`] at the boundary, so callers see one coherent error surface.

use thiserror::Error;

/// Errors raised by domain-model construction and parameter parsing.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Data validation errors (bad inputs, violated invariants)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for Results using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = CoreError::Validation("plan_start >= plan_end".into());
        assert!(err.to_string().contains("Validation error"));
    }
}
