//! CLI error types with exit code handling
//!
//! Every failure is mapped to one [`CliError`] variant, and every variant to
//! one exit code.

use miette::Diagnostic;
use thiserror::Error;
use trellis_kube::KubeError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid arguments, names or labels
    #[error("Invalid input: {message}")]
    #[diagnostic(code(trellis::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// A wait ran out of time
    #[error("{message}")]
    #[diagnostic(
        code(trellis::cli::timeout),
        help("retry with a longer --timeout, or inspect the resource's status")
    )]
    Timeout { message: String },

    /// The downstream controller gave up
    #[error("{message}")]
    #[diagnostic(code(trellis::cli::fatal))]
    Fatal { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(trellis::cli::io))]
    Io { message: String },

    /// Any other lifecycle failure
    #[error("{message}")]
    #[diagnostic(code(trellis::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Timeout { .. } => exit_codes::TIMEOUT,
            CliError::Fatal { .. } => exit_codes::FATAL,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    /// Create a usage error with help text
    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an IO error that names the file involved
    pub fn io_at(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: format!("{}: {}", path.display(), err),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        let leaves = err.leaves();
        if leaves.iter().any(|e| e.is_fatal()) {
            return CliError::Fatal { message };
        }
        if leaves.iter().any(|e| e.is_timeout()) {
            return CliError::Timeout { message };
        }
        match err {
            KubeError::Io(_) => CliError::Io { message },
            KubeError::Core(_) => CliError::Usage { message, help: None },
            _ => CliError::Other { message },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trellis_kube::WaitCondition;

    fn timeout() -> KubeError {
        KubeError::Timeout {
            resource: "ManagedResource ns1/n1".to_string(),
            condition: WaitCondition::Healthy,
            timeout: Duration::from_secs(120),
            last_error: None,
            severe: false,
        }
    }

    fn fatal() -> KubeError {
        KubeError::Fatal {
            resource: "Network ns1/n1".to_string(),
            message: "migration failed".to_string(),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::from(timeout()).exit_code(), exit_codes::TIMEOUT);
        assert_eq!(CliError::from(fatal()).exit_code(), exit_codes::FATAL);
        assert_eq!(CliError::from(KubeError::Cancelled).exit_code(), exit_codes::ERROR);
        assert_eq!(CliError::usage("bad").exit_code(), exit_codes::USAGE_ERROR);
        assert_eq!(
            CliError::from(std::io::Error::other("denied")).exit_code(),
            exit_codes::IO_ERROR
        );
    }

    #[test]
    fn test_aggregate_takes_most_severe_leaf() {
        let both = KubeError::Aggregate(vec![timeout(), fatal()]);
        assert_eq!(CliError::from(both).exit_code(), exit_codes::FATAL);

        let timeouts = KubeError::Aggregate(vec![timeout(), KubeError::Cancelled]);
        assert_eq!(CliError::from(timeouts).exit_code(), exit_codes::TIMEOUT);
    }
}
