//! Extension commands - wait for, delete, migrate and restore extension resources

use console::style;
use std::path::Path;
use std::time::Duration;
use trellis_core::{ObjectKey, RetryPolicy};
use trellis_kube::{ExtensionLifecycle, MigrationCoordinator};

use super::{Session, done, step};
use crate::error::Result;
use crate::util::load_document;

fn with_timeout(policy: RetryPolicy, timeout: Option<Duration>) -> RetryPolicy {
    timeout.map_or(policy, |timeout| policy.with_timeout(timeout))
}

fn lifecycle(session: &Session, timeout: Option<Duration>) -> ExtensionLifecycle {
    ExtensionLifecycle::new(session.store.clone())
        .with_policy(with_timeout(session.config.extension, timeout))
}

fn coordinator(session: &Session, timeout: Option<Duration>) -> MigrationCoordinator {
    MigrationCoordinator::new(session.store.clone())
        .with_policy(with_timeout(session.config.migration, timeout))
}

/// Key of the extension resource named on the command line
pub fn key(kind: &str, name: &str, namespace: &str) -> Result<ObjectKey> {
    let key = ObjectKey::extension(kind, namespace, name);
    key.validate().map_err(trellis_kube::KubeError::from)?;
    Ok(key)
}

/// Run the wait command
pub async fn wait(session: &Session, key: &ObjectKey, timeout: Option<Duration>) -> Result<()> {
    step("Waiting for", key, &key.namespace);
    lifecycle(session, timeout).wait_ready(&session.ctx, key).await?;
    done(format!("{} is ready", style(key).cyan()));
    Ok(())
}

/// Run the delete command
pub async fn delete(session: &Session, key: &ObjectKey, wait: bool, timeout: Option<Duration>) -> Result<()> {
    step("Deleting", key, &key.namespace);
    let lifecycle = lifecycle(session, timeout);

    lifecycle.destroy(&session.ctx, key).await?;
    if wait {
        lifecycle.wait_deleted(&session.ctx, key).await?;
        done(format!("{} is gone", style(key).cyan()));
    } else {
        done(format!("Deletion of {} requested", style(key).cyan()));
    }
    Ok(())
}

/// Run the migrate command
pub async fn migrate(session: &Session, key: &ObjectKey, wait: bool, timeout: Option<Duration>) -> Result<()> {
    step("Migrating", key, &key.namespace);
    let coordinator = coordinator(session, timeout);

    coordinator.migrate(&session.ctx, key).await?;
    if wait {
        coordinator.wait_migrate(&session.ctx, key).await?;
        done(format!("{} is migrated", style(key).cyan()));
    } else {
        let phase = coordinator.phase(&session.ctx, key).await?;
        done(format!("{} is {}", style(key).cyan(), phase));
    }
    Ok(())
}

/// Run the restore command
pub async fn restore(session: &Session, key: &ObjectKey, spec_file: &Path, state_file: Option<&Path>) -> Result<()> {
    let spec = load_document(spec_file)?;
    let state = state_file.map(load_document).transpose()?;

    step("Restoring", key, &key.namespace);
    coordinator(session, None)
        .restore(&session.ctx, key, state.as_ref(), |object| {
            object.data["spec"] = spec.clone();
            Ok(())
        })
        .await?;
    done(format!(
        "Restore of {} requested ({})",
        style(key).cyan(),
        if state.is_some() { "with state" } else { "without state" }
    ));
    Ok(())
}
