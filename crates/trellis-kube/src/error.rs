//! Error types for trellis-kube

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for trellis-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// What a wait was waiting for, used to word timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Healthy,
    Deleted,
    Migrated,
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Healthy => f.write_str("is not healthy"),
            WaitCondition::Deleted => f.write_str("still exists"),
            WaitCondition::Migrated => f.write_str("is not migrated"),
        }
    }
}

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{key} not found")]
    NotFound { key: String },

    /// Write carried a stale resourceVersion
    #[error("conflict while writing {key}: the object has been modified")]
    Conflict { key: String },

    /// Create raced with another writer
    #[error("{key} already exists")]
    AlreadyExists { key: String },

    /// Every upsert attempt ran into a conflict
    #[error("giving up on {key} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { key: String, attempts: usize },

    /// A wait ran out of time
    #[error("{resource} {condition} after {timeout:?}{}", timeout_details(.severe, .last_error))]
    Timeout {
        resource: String,
        condition: WaitCondition,
        timeout: Duration,
        last_error: Option<String>,
        severe: bool,
    },

    /// The downstream controller reported an error it may still recover from
    #[error("{resource} is unhealthy: {message}")]
    Unhealthy { resource: String, message: String },

    /// The downstream controller reported an unrecoverable error
    #[error("{resource} failed: {message}")]
    Fatal { resource: String, message: String },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before the operation started
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Invalid configuration or a failed precondition
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data model error
    #[error(transparent)]
    Core(#[from] trellis_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Several independent operations failed
    #[error("{} operations failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<KubeError>),
}

fn timeout_details(severe: &bool, last_error: &Option<String>) -> String {
    let mut details = String::new();
    if *severe {
        details.push_str(" (severe)");
    }
    if let Some(error) = last_error {
        details.push_str(": ");
        details.push_str(error);
    }
    details
}

fn join_errors(errors: &[KubeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a stale-resourceVersion conflict (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409 && resp.reason != "AlreadyExists",
            _ => false,
        }
    }

    /// Check if a create lost the race against another writer
    pub fn is_already_exists(&self) -> bool {
        match self {
            KubeError::AlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409 && resp.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if a wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, KubeError::Timeout { .. })
    }

    /// Check if the downstream controller gave up
    pub fn is_fatal(&self) -> bool {
        matches!(self, KubeError::Fatal { .. })
    }

    /// All leaf errors, flattening aggregates
    pub fn leaves(&self) -> Vec<&KubeError> {
        match self {
            KubeError::Aggregate(errors) => errors.iter().flat_map(KubeError::leaves).collect(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> KubeError {
        KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn test_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "Conflict").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!api_error(409, "AlreadyExists").is_conflict());
        assert!(KubeError::NotFound { key: "x".into() }.is_not_found());
    }

    #[test]
    fn test_timeout_message() {
        let err = KubeError::Timeout {
            resource: "ManagedResource ns1/n1".to_string(),
            condition: WaitCondition::Healthy,
            timeout: Duration::from_secs(120),
            last_error: Some("ResourcesHealthy is False".to_string()),
            severe: false,
        };
        assert_eq!(
            err.to_string(),
            "ManagedResource ns1/n1 is not healthy after 120s: ResourcesHealthy is False"
        );

        let err = KubeError::Timeout {
            resource: "Network ns1/n1".to_string(),
            condition: WaitCondition::Deleted,
            timeout: Duration::from_secs(1),
            last_error: None,
            severe: true,
        };
        assert_eq!(err.to_string(), "Network ns1/n1 still exists after 1s (severe)");
    }

    #[test]
    fn test_aggregate_message_and_leaves() {
        let err = KubeError::Aggregate(vec![
            KubeError::Cancelled,
            KubeError::InvalidConfig("empty image".to_string()),
        ]);
        assert_eq!(
            err.to_string(),
            "2 operations failed: operation cancelled; invalid configuration: empty image"
        );
        assert_eq!(err.leaves().len(), 2);
    }
}
