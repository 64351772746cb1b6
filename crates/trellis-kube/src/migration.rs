//! Handing extension resources over between clusters
//!
//! Restore on the destination cluster runs in two phases so the controller
//! never reconciles an object before its snapshot is in place:
//!
//! ```text
//! upsert(spec, wait-for-state) ──▶ status.state = snapshot ──▶ annotate(restore)
//! ```
//!
//! On the source cluster, `migrate` asks the controller to release the
//! object's external resources without deleting them; `wait_migrate` waits
//! until the controller reports that it is done.

use kube::api::DynamicObject;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{KubeError, Result};
use crate::health::{HealthCheck, migration_phase, wait_for};
use crate::store::ObjectStore;
use crate::upsert::UpsertOperator;
use trellis_core::{MigrationPhase, ObjectKey, Operation, RetryPolicy};

/// Drives restore and migrate requests on extension resources
#[derive(Clone)]
pub struct MigrationCoordinator {
    operator: UpsertOperator,
    policy: RetryPolicy,
}

impl MigrationCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            operator: UpsertOperator::new(store),
            policy: RetryPolicy::migration_default(),
        }
    }

    /// Use `policy` for `wait_migrate`
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        self.operator.store()
    }

    /// Recreate an object from its desired spec and a migrated snapshot
    ///
    /// `state` is written to `status.state` before the controller is told to
    /// restore; without a snapshot the controller restores from scratch.
    pub async fn restore<F>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        state: Option<&serde_json::Value>,
        mutate: F,
    ) -> Result<DynamicObject>
    where
        F: FnMut(&mut DynamicObject) -> Result<()> + Send,
    {
        self.operator
            .upsert(ctx, key, Some(Operation::WaitForState), mutate)
            .await?;

        if let Some(state) = state {
            ctx.check()?;
            self.store()
                .patch_status(key, &json!({ "state": state }))
                .await?;
            debug!(resource = %key, "snapshot handed over");
        }

        let restored = self
            .operator
            .annotate(ctx, key, Operation::Restore)
            .await?
            .ok_or_else(|| KubeError::NotFound { key: key.to_string() })?;

        info!(resource = %key, with_state = state.is_some(), "restore requested");
        Ok(restored)
    }

    /// Ask the controller to migrate the object away; absence is a no-op
    pub async fn migrate(&self, ctx: &Context, key: &ObjectKey) -> Result<()> {
        match self.operator.annotate(ctx, key, Operation::Migrate).await? {
            Some(_) => info!(resource = %key, "migration requested"),
            None => debug!(resource = %key, "nothing to migrate"),
        }
        Ok(())
    }

    /// Wait until the controller reports the migration finished, or the object is gone
    pub async fn wait_migrate(&self, ctx: &Context, key: &ObjectKey) -> Result<()> {
        wait_for(ctx, self.store().as_ref(), &self.policy, key, HealthCheck::ExtensionMigrated).await?;
        info!(resource = %key, "migrated");
        Ok(())
    }

    /// Current phase of the object in the restore/migrate sequence
    pub async fn phase(&self, ctx: &Context, key: &ObjectKey) -> Result<MigrationPhase> {
        ctx.check()?;
        let object = self.store().get_opt(key).await?;
        migration_phase(object.as_ref())
    }
}
