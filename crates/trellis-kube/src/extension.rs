//! Lifecycle of extension resources (Network, ControlPlane, ...)
//!
//! An extension resource is owned by an external controller. This module only
//! writes its desired spec with a `reconcile` request, asks for deletion with
//! the confirmation annotation the controller insists on, and waits for the
//! controller to report back through `status`.

use kube::api::DynamicObject;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::Result;
use crate::health::{HealthCheck, wait_for};
use crate::store::ObjectStore;
use crate::upsert::UpsertOperator;
use trellis_core::annotations::CONFIRM_DELETION;
use trellis_core::{ObjectKey, Operation, RetryPolicy};

/// Deploy, wait for and delete extension resources
#[derive(Clone)]
pub struct ExtensionLifecycle {
    operator: UpsertOperator,
    policy: RetryPolicy,
}

impl ExtensionLifecycle {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            operator: UpsertOperator::new(store),
            policy: RetryPolicy::extension_default(),
        }
    }

    /// Use `policy` for `wait_ready` and `wait_deleted`
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.operator.store()
    }

    pub fn operator(&self) -> &UpsertOperator {
        &self.operator
    }

    /// Write the desired state and request a reconcile
    pub async fn deploy<F>(&self, ctx: &Context, key: &ObjectKey, mutate: F) -> Result<DynamicObject>
    where
        F: FnMut(&mut DynamicObject) -> Result<()> + Send,
    {
        let written = self
            .operator
            .upsert(ctx, key, Some(Operation::Reconcile), mutate)
            .await?;
        info!(resource = %key, generation = ?written.metadata.generation, "deployed");
        Ok(written)
    }

    /// Wait until the controller reports the latest generation reconciled
    pub async fn wait_ready(&self, ctx: &Context, key: &ObjectKey) -> Result<()> {
        wait_for(ctx, self.store().as_ref(), &self.policy, key, HealthCheck::ExtensionReady).await?;
        info!(resource = %key, "ready");
        Ok(())
    }

    /// Confirm and request deletion; an absent object counts as deleted
    pub async fn destroy(&self, ctx: &Context, key: &ObjectKey) -> Result<()> {
        ctx.check()?;
        let store = self.store();

        let confirm = json!({ "metadata": { "annotations": { (CONFIRM_DELETION): "true" } } });
        match store.patch(key, &confirm).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match store.delete(key).await {
            Ok(()) => {
                info!(resource = %key, "deletion requested");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait until the object is gone, surfacing deletion errors the controller reports
    pub async fn wait_deleted(&self, ctx: &Context, key: &ObjectKey) -> Result<()> {
        wait_for(ctx, self.store().as_ref(), &self.policy, key, HealthCheck::ExtensionDeleted).await?;
        info!(resource = %key, "deleted");
        Ok(())
    }
}
