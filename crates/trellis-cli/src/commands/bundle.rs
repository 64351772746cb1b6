//! Bundle commands - deploy, wait for, destroy and prune ManagedResources

use console::style;
use std::path::Path;
use std::time::Duration;
use trellis_core::BundleClass;
use trellis_kube::{BundleReconciler, BundleSpec, Labels};

use super::{Session, done, step};
use crate::error::{CliError, Result};
use crate::util::load_manifests;

fn reconciler(session: &Session, timeout: Option<Duration>) -> BundleReconciler {
    let reconciler = session.config.bundle_reconciler(session.store.clone());
    match timeout {
        Some(timeout) => {
            let policy = reconciler.policy().with_timeout(timeout);
            reconciler.with_policy(policy)
        }
        None => reconciler,
    }
}

/// Build the desired bundle from a manifest directory, before touching the cluster
pub fn spec(
    name: &str,
    namespace: &str,
    dir: &Path,
    class: BundleClass,
    keep_objects: bool,
    labels: Vec<(String, String)>,
) -> Result<BundleSpec> {
    let payload = load_manifests(dir)?;
    if payload.is_empty() {
        return Err(CliError::usage_with_help(
            format!("no manifests found in {}", dir.display()),
            "manifests are *.yaml, *.yml or *.json files",
        ));
    }
    let spec = BundleSpec::new(namespace, name, payload)
        .with_class(class)
        .with_labels(labels.into_iter().collect())
        .keep_objects(keep_objects);
    spec.validate()?;
    Ok(spec)
}

/// Run the deploy command
pub async fn deploy(session: &Session, spec: &BundleSpec, wait: bool, timeout: Option<Duration>) -> Result<()> {
    step("Deploying bundle", &spec.name, &spec.namespace);
    let reconciler = reconciler(session, timeout);

    let outcome = reconciler.deploy(&session.ctx, spec).await?;
    let change = if outcome.payload_changed {
        style("payload changed").yellow()
    } else {
        style("payload unchanged").dim()
    };
    done(format!(
        "Deployed {} ({} manifests in {} secret(s), {})",
        style(&spec.name).cyan(),
        spec.payload.len(),
        outcome.secret_names.len(),
        change
    ));

    if wait {
        reconciler.wait(&session.ctx, &spec.namespace, &spec.name).await?;
        done(format!("{} is healthy", style(&spec.name).cyan()));
    }
    Ok(())
}

/// Run the wait command
pub async fn wait(session: &Session, name: &str, namespace: &str, timeout: Option<Duration>) -> Result<()> {
    step("Waiting for bundle", name, namespace);
    reconciler(session, timeout).wait(&session.ctx, namespace, name).await?;
    done(format!("{} is healthy", style(name).cyan()));
    Ok(())
}

/// Run the destroy command
pub async fn destroy(
    session: &Session,
    name: &str,
    namespace: &str,
    wait: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    step("Destroying bundle", name, namespace);
    let reconciler = reconciler(session, timeout);

    reconciler.destroy(&session.ctx, namespace, name).await?;
    if wait {
        reconciler.wait_cleanup(&session.ctx, namespace, name).await?;
        done(format!("{} is gone", style(name).cyan()));
    } else {
        done(format!("Deletion of {} requested", style(name).cyan()));
    }
    Ok(())
}

/// Run the prune command
pub async fn prune(
    session: &Session,
    namespace: &str,
    selector: &Labels,
    desired: &[Labels],
    wait: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    if selector.is_empty() {
        return Err(CliError::usage_with_help(
            "refusing to prune without a selector",
            "pass at least one --selector key=value",
        ));
    }
    step("Pruning stale bundles", trellis_kube::store::label_selector(selector), namespace);
    let reconciler = reconciler(session, timeout);

    let deleted = reconciler
        .delete_stale(&session.ctx, namespace, selector, desired)
        .await?;
    if deleted.is_empty() {
        done("Nothing to prune");
        return Ok(());
    }
    for name in &deleted {
        println!("  {} {}", style("-").red(), name);
    }

    if wait {
        reconciler
            .wait_cleanup_stale(&session.ctx, namespace, selector, desired)
            .await?;
    }
    done(format!("Pruned {} bundle(s)", deleted.len()));
    Ok(())
}
