//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid {what} '{value}': {reason}")]
    InvalidName {
        what: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid payload key '{key}': only alphanumerics, '-', '_' and '.' are allowed")]
    InvalidPayloadKey { key: String },

    #[error("manifest '{key}' is {size} bytes, which exceeds the per-secret limit of {max} bytes")]
    PayloadTooLarge { key: String, size: usize, max: usize },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("unknown bundle class '{0}' (expected 'seed' or 'shoot')")]
    UnknownClass(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
