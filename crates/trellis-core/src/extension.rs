//! Status of extension resources and the tables that classify it
//!
//! Downstream controllers never publish a formal state machine; they write
//! `lastOperation`, `lastError` and `observedGeneration` and remove the
//! operation annotation once they picked it up. The functions here turn
//! those conventions into one explicit classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::annotations::Operation;

/// Result of inspecting a reconciled object once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceState {
    /// Desired state reached
    Converged,
    /// Still working, nothing wrong yet
    Pending(String),
    /// The controller reported an error it may recover from
    TransientError(String),
    /// The controller gave up; waiting longer will not help
    FatalError(String),
}

impl ConvergenceState {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceState::Converged)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConvergenceState::FatalError(_))
    }
}

impl fmt::Display for ConvergenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceState::Converged => f.write_str("converged"),
            ConvergenceState::Pending(reason) => write!(f, "pending: {}", reason),
            ConvergenceState::TransientError(reason) => write!(f, "error: {}", reason),
            ConvergenceState::FatalError(reason) => write!(f, "fatal error: {}", reason),
        }
    }
}

/// `status.lastOperation.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
    #[serde(other)]
    Unknown,
}

/// `status.lastOperation.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl OperationState {
    /// The controller stopped retrying this operation
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, OperationState::Error | OperationState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: OperationType,
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i32>,
}

impl LastOperation {
    pub fn new(type_: OperationType, state: OperationState) -> Self {
        Self {
            type_,
            state,
            description: None,
            last_update_time: None,
            progress: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl LastError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            codes: Vec::new(),
            last_update_time: None,
        }
    }
}

/// `status` of an extension resource, written only by its controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Opaque snapshot the controller needs to restore on another cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl ExtensionStatus {
    /// Parse from the raw `status` value; a missing status is an empty one
    pub fn from_value(value: Option<&serde_json::Value>) -> crate::Result<Self> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    fn last_error_state(&self, error: &LastError) -> ConvergenceState {
        let terminal = self
            .last_operation
            .as_ref()
            .is_some_and(|op| op.state.is_terminal_failure());
        if terminal {
            ConvergenceState::FatalError(error.description.clone())
        } else {
            ConvergenceState::TransientError(error.description.clone())
        }
    }

    /// Classify a resource after a reconcile request
    ///
    /// `generation` is `metadata.generation`; `pending_operation` is the
    /// operation annotation still on the object, if any.
    pub fn evaluate(&self, generation: Option<i64>, pending_operation: Option<&str>) -> ConvergenceState {
        if let Some(generation) = generation
            && self.observed_generation != Some(generation)
        {
            return ConvergenceState::Pending(format!(
                "observed generation {} is outdated (current {})",
                self.observed_generation
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
                generation
            ));
        }

        if let Some(operation) = pending_operation {
            return ConvergenceState::Pending(format!(
                "operation annotation '{}' has not been picked up yet",
                operation
            ));
        }

        if let Some(error) = &self.last_error {
            return self.last_error_state(error);
        }

        match &self.last_operation {
            None => ConvergenceState::Pending("no operation reported yet".to_string()),
            Some(op) if op.state != OperationState::Succeeded => ConvergenceState::Pending(format!(
                "last operation {:?} is {:?}",
                op.type_, op.state
            )),
            Some(_) => ConvergenceState::Converged,
        }
    }

    /// Classify a resource after a migrate request
    ///
    /// A `migrate` annotation still on the object means the controller has
    /// not started this attempt, so an older failure does not count.
    pub fn evaluate_migration(&self, pending_operation: Option<&str>) -> ConvergenceState {
        if let Some(operation) = pending_operation
            && operation == Operation::Migrate.as_str()
        {
            return ConvergenceState::Pending(format!(
                "operation annotation '{}' has not been picked up yet",
                operation
            ));
        }

        match &self.last_operation {
            Some(op) if op.type_ == OperationType::Migrate && op.state == OperationState::Succeeded => {
                ConvergenceState::Converged
            }
            Some(op) if op.type_ == OperationType::Migrate && op.state.is_terminal_failure() => {
                let reason = self
                    .last_error
                    .as_ref()
                    .map(|e| e.description.clone())
                    .or_else(|| op.description.clone())
                    .unwrap_or_else(|| "migration failed".to_string());
                ConvergenceState::FatalError(reason)
            }
            _ => match &self.last_error {
                Some(error) => ConvergenceState::TransientError(error.description.clone()),
                None => ConvergenceState::Pending("migration has not finished".to_string()),
            },
        }
    }

    /// Classify a resource that still exists after a delete request
    pub fn evaluate_deletion(&self) -> ConvergenceState {
        let deleting = self
            .last_operation
            .as_ref()
            .is_some_and(|op| op.type_ == OperationType::Delete);
        match &self.last_error {
            Some(error) if deleting => ConvergenceState::TransientError(format!(
                "deletion failed: {}",
                error.description
            )),
            _ => ConvergenceState::Pending("still exists".to_string()),
        }
    }
}

/// Where an extension resource stands in the restore/migrate sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Object does not exist on this cluster
    NotPresent,
    /// Created with `wait-for-state`, snapshot not handed over yet
    AwaitingState,
    /// `restore` requested, controller not done
    Restoring,
    /// Exists and is not involved in a migration
    Present,
    /// `migrate` requested or in progress
    Migrating,
    /// Controller finished the migration
    Migrated,
    /// Controller gave up on the migration
    Failed,
}

impl MigrationPhase {
    /// Derive the phase from an object snapshot; `None` means the object is absent
    pub fn observe(object: Option<(Option<&str>, &ExtensionStatus)>) -> Self {
        let Some((pending, status)) = object else {
            return MigrationPhase::NotPresent;
        };

        match pending.and_then(|op| op.parse::<Operation>().ok()) {
            Some(Operation::WaitForState) => return MigrationPhase::AwaitingState,
            Some(Operation::Restore) => return MigrationPhase::Restoring,
            Some(Operation::Migrate) => return MigrationPhase::Migrating,
            Some(Operation::Reconcile) | None => {}
        }

        match &status.last_operation {
            Some(op) if op.type_ == OperationType::Migrate => match op.state {
                OperationState::Succeeded => MigrationPhase::Migrated,
                state if state.is_terminal_failure() => MigrationPhase::Failed,
                _ => MigrationPhase::Migrating,
            },
            Some(op) if op.type_ == OperationType::Restore && op.state != OperationState::Succeeded => {
                MigrationPhase::Restoring
            }
            _ => MigrationPhase::Present,
        }
    }

    /// Terminal phases of a migrate-then-wait sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::NotPresent | MigrationPhase::Migrated | MigrationPhase::Failed
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::NotPresent => "not present",
            MigrationPhase::AwaitingState => "awaiting state",
            MigrationPhase::Restoring => "restoring",
            MigrationPhase::Present => "present",
            MigrationPhase::Migrating => "migrating",
            MigrationPhase::Migrated => "migrated",
            MigrationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}
