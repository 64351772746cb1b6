//! Health evaluation of extension resources and bundles
//!
//! Turns an object snapshot into a [`ConvergenceState`] using the tables in
//! `trellis_core`, and plugs that classification into [`wait_until`]:
//!
//! | state            | probe outcome              |
//! |------------------|----------------------------|
//! | `Converged`      | `Ready`                    |
//! | `Pending`        | `NotReady`                 |
//! | `TransientError` | `Transient(Unhealthy)`     |
//! | `FatalError`     | `Fatal(Fatal)`             |
//!
//! A failed read counts as a transient error; only a definitive NotFound
//! is treated as absence.

use kube::api::DynamicObject;
use tracing::debug;

use crate::context::Context;
use crate::error::{KubeError, Result, WaitCondition};
use crate::retry::{ProbeOutcome, WaitTarget, wait_until};
use crate::store::{ObjectStore, annotations, status};
use trellis_core::annotations::pending_operation;
use trellis_core::{ConvergenceState, ExtensionStatus, ManagedResourceStatus, MigrationPhase, ObjectKey, RetryPolicy};

/// Which table to evaluate an object against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Extension resource finished its last reconcile
    ExtensionReady,
    /// Extension resource finished its migration, or is gone
    ExtensionMigrated,
    /// Extension resource is gone; deletion errors are surfaced
    ExtensionDeleted,
    /// Bundle applied and healthy
    BundleReady,
    /// Any object is gone
    Deleted,
}

impl HealthCheck {
    pub fn condition(&self) -> WaitCondition {
        match self {
            HealthCheck::ExtensionReady | HealthCheck::BundleReady => WaitCondition::Healthy,
            HealthCheck::ExtensionMigrated => WaitCondition::Migrated,
            HealthCheck::ExtensionDeleted | HealthCheck::Deleted => WaitCondition::Deleted,
        }
    }

    /// Classify a snapshot; `None` means the object does not exist
    pub fn evaluate(&self, object: Option<&DynamicObject>) -> Result<ConvergenceState> {
        let Some(object) = object else {
            return Ok(match self {
                HealthCheck::ExtensionReady | HealthCheck::BundleReady => {
                    ConvergenceState::Pending("does not exist".to_string())
                }
                HealthCheck::ExtensionMigrated | HealthCheck::ExtensionDeleted | HealthCheck::Deleted => {
                    ConvergenceState::Converged
                }
            });
        };

        let state = match self {
            HealthCheck::ExtensionReady => extension_status(object)?.evaluate(
                object.metadata.generation,
                pending_operation(&annotations(object)),
            ),
            HealthCheck::ExtensionMigrated => {
                extension_status(object)?.evaluate_migration(pending_operation(&annotations(object)))
            }
            HealthCheck::ExtensionDeleted => extension_status(object)?.evaluate_deletion(),
            HealthCheck::BundleReady => bundle_status(object)?.evaluate(object.metadata.generation),
            HealthCheck::Deleted => ConvergenceState::Pending("still exists".to_string()),
        };
        Ok(state)
    }
}

/// Parse the status of an extension resource
pub fn extension_status(object: &DynamicObject) -> Result<ExtensionStatus> {
    Ok(ExtensionStatus::from_value(status(object))?)
}

/// Parse the status of a bundle
pub fn bundle_status(object: &DynamicObject) -> Result<ManagedResourceStatus> {
    Ok(ManagedResourceStatus::from_value(status(object))?)
}

/// Where an extension resource stands in the restore/migrate sequence
pub fn migration_phase(object: Option<&DynamicObject>) -> Result<MigrationPhase> {
    match object {
        None => Ok(MigrationPhase::NotPresent),
        Some(object) => {
            let status = extension_status(object)?;
            let annotations = annotations(object);
            Ok(MigrationPhase::observe(Some((pending_operation(&annotations), &status))))
        }
    }
}

/// Map a classification to a probe outcome
pub fn outcome(key: &ObjectKey, state: ConvergenceState) -> ProbeOutcome {
    match state {
        ConvergenceState::Converged => ProbeOutcome::Ready,
        ConvergenceState::Pending(reason) => ProbeOutcome::NotReady(reason),
        ConvergenceState::TransientError(message) => ProbeOutcome::Transient(KubeError::Unhealthy {
            resource: key.to_string(),
            message,
        }),
        ConvergenceState::FatalError(message) => ProbeOutcome::Fatal(KubeError::Fatal {
            resource: key.to_string(),
            message,
        }),
    }
}

/// Read `key` once and classify it
pub async fn probe(store: &dyn ObjectStore, key: &ObjectKey, check: HealthCheck) -> ProbeOutcome {
    let object = match store.get_opt(key).await {
        Ok(object) => object,
        Err(e) => return ProbeOutcome::Transient(e),
    };
    match check.evaluate(object.as_ref()) {
        Ok(state) => outcome(key, state),
        Err(e) => ProbeOutcome::Transient(e),
    }
}

/// Poll `key` until `check` reports it converged
pub async fn wait_for(
    ctx: &Context,
    store: &dyn ObjectStore,
    policy: &RetryPolicy,
    key: &ObjectKey,
    check: HealthCheck,
) -> Result<()> {
    debug!(resource = %key, check = ?check, timeout = ?policy.timeout, "waiting");
    let target = WaitTarget::new(key, check.condition());
    wait_until(ctx, policy, &target, || probe(store, key, check)).await
}
