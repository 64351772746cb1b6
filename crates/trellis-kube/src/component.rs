//! Component contract and fan-out helpers
//!
//! A component is anything with a deploy/destroy lifecycle that can be waited
//! on. Migration and monitoring are optional capabilities a component opts
//! into by returning itself from [`Component::as_migrator`] or
//! [`Component::as_monitoring`]; orchestrators ask for the capability instead
//! of probing for it.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::Result;
use crate::fanout::run_all;

/// Writes and removes a component's desired state
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, ctx: &Context) -> Result<()>;

    /// Request deletion; an absent component counts as deleted
    async fn destroy(&self, ctx: &Context) -> Result<()>;
}

/// Waits for a component to settle
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Wait until the component is healthy
    async fn wait(&self, ctx: &Context) -> Result<()>;

    /// Wait until the component is completely gone
    async fn wait_cleanup(&self, ctx: &Context) -> Result<()>;
}

/// Moves a component between clusters
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Recreate the component from its spec and the snapshot taken on the
    /// source cluster, if there is one
    async fn restore(&self, ctx: &Context, state: Option<&serde_json::Value>) -> Result<()>;

    /// Release the component's external resources without deleting them
    async fn migrate(&self, ctx: &Context) -> Result<()>;

    async fn wait_migrate(&self, ctx: &Context) -> Result<()>;
}

/// Monitoring configuration a component contributes
pub trait MonitoringProvider: Send + Sync {
    /// Prometheus scrape configurations, one YAML document each
    fn scrape_configs(&self) -> Vec<String>;

    /// Alerting rule files by file name
    fn alerting_rules(&self) -> BTreeMap<String, String>;
}

pub trait Component: Deployer + Waiter {
    fn name(&self) -> &str;

    fn as_migrator(&self) -> Option<&dyn Migrator> {
        None
    }

    fn as_monitoring(&self) -> Option<&dyn MonitoringProvider> {
        None
    }
}

pub async fn deploy_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(components.iter().map(|c| c.deploy(ctx)).collect()).await
}

pub async fn wait_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(components.iter().map(|c| c.wait(ctx)).collect()).await
}

pub async fn destroy_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(components.iter().map(|c| c.destroy(ctx)).collect()).await
}

pub async fn wait_cleanup_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(components.iter().map(|c| c.wait_cleanup(ctx)).collect()).await
}

/// Restore every component that supports migration
///
/// `states` holds the snapshots by component name; a component without an
/// entry is restored from its spec alone.
pub async fn restore_all(
    ctx: &Context,
    components: &[&dyn Component],
    states: &BTreeMap<String, serde_json::Value>,
) -> Result<()> {
    run_all(
        components
            .iter()
            .filter_map(|c| c.as_migrator().map(|m| (c.name(), m)))
            .map(|(name, m)| m.restore(ctx, states.get(name)))
            .collect(),
    )
    .await
}

/// Migrate every component that supports migration; the rest are skipped
pub async fn migrate_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(
        components
            .iter()
            .filter_map(|c| c.as_migrator())
            .map(|m| m.migrate(ctx))
            .collect(),
    )
    .await
}

pub async fn wait_migrate_all(ctx: &Context, components: &[&dyn Component]) -> Result<()> {
    run_all(
        components
            .iter()
            .filter_map(|c| c.as_migrator())
            .map(|m| m.wait_migrate(ctx))
            .collect(),
    )
    .await
}

/// Scrape configurations of every component that contributes monitoring
pub fn collect_scrape_configs(components: &[&dyn Component]) -> Vec<String> {
    components
        .iter()
        .filter_map(|c| c.as_monitoring())
        .flat_map(|m| m.scrape_configs())
        .collect()
}

/// Alerting rules of every component, keyed `<component>.<file>`
pub fn collect_alerting_rules(components: &[&dyn Component]) -> BTreeMap<String, String> {
    components
        .iter()
        .filter_map(|c| c.as_monitoring().map(|m| (c.name(), m)))
        .flat_map(|(name, m)| {
            m.alerting_rules()
                .into_iter()
                .map(move |(file, rules)| (format!("{}.{}", name, file), rules))
        })
        .collect()
}
