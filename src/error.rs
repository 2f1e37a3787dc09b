//! Error taxonomy for the simulation engine

use thiserror::Error;

use crate::records::EntityKind;

/// Result alias used throughout the library
pub type SimResult<T> = Result<T, SimError>;

/// Everything that can go wrong while loading inputs or advancing a simulation
#[derive(Debug, Error)]
pub enum SimError {
    /// Caller wiring error: mismatched years, bad pipeline contracts, ragged inputs
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required input column is absent from the data
    #[error("schema violation: {entity} data is missing required column {column}")]
    MissingColumn { entity: EntityKind, column: String },

    /// Input does not conform to a schema or parameter definition
    #[error("schema violation: {0}")]
    Schema(String),

    /// Year or index outside the supported range
    #[error("range error: {0}")]
    Range(String),

    /// Internal state broke an invariant of the year-advance protocol
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`SimError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    SchemaViolation,
    Range,
    InvariantViolation,
    /// Unreadable or malformed input files
    Input,
}

impl SimError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SimError::Configuration(_) => ErrorCategory::Configuration,
            SimError::MissingColumn { .. } | SimError::Schema(_) => ErrorCategory::SchemaViolation,
            SimError::Range(_) => ErrorCategory::Range,
            SimError::Invariant(_) => ErrorCategory::InvariantViolation,
            SimError::Io(_) | SimError::Csv(_) | SimError::Json(_) => ErrorCategory::Input,
        }
    }

    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        SimError::Schema(msg.into())
    }

    pub(crate) fn range(msg: impl Into<String>) -> Self {
        SimError::Range(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        SimError::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_message_names_column() {
        let err = SimError::MissingColumn {
            entity: EntityKind::Corporate,
            column: "ST_CG_AMT_1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ST_CG_AMT_1"));
        assert!(msg.contains("corporate"));
        assert_eq!(err.category(), ErrorCategory::SchemaViolation);
    }

    #[test]
    fn test_categories() {
        assert_eq!(SimError::range("x").category(), ErrorCategory::Range);
        assert_eq!(SimError::config("x").category(), ErrorCategory::Configuration);
        assert_eq!(SimError::invariant("x").category(), ErrorCategory::InvariantViolation);
        let io = SimError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.category(), ErrorCategory::Input);
    }
}
