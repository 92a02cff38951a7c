//! Error types for the interaction engine.

use thiserror::Error;

use crate::object::ObjectId;

/// Errors raised inside the engine.
///
/// None of these ever reach the host: message handlers log them and recover.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid numeric input for {what}: {value}")]
    InvalidNumber { what: &'static str, value: f64 },
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
    #[error("Malformed awareness state from client {client_id}: {reason}")]
    MalformedAwareness { client_id: u64, reason: String },
    #[error("No drag session is active")]
    NoActiveDrag,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Check that a value is finite, returning an [`EngineError`] otherwise.
pub fn ensure_finite(what: &'static str, value: f64) -> EngineResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::InvalidNumber { what, value })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
