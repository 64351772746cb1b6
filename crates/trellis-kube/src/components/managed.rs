//! Bundle-backed components
//!
//! Components such as istio or the vertical pod autoscaler are shipped as
//! one ManagedResource bundle whose manifests come from a [`ManifestBuilder`].

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::bundle::{BundleReconciler, BundleSpec};
use crate::component::{Component, Deployer, MonitoringProvider, Waiter};
use crate::context::Context;
use crate::error::Result;
use crate::store::Labels;
use trellis_core::{BundleClass, Payload};

/// Renders the manifests of a component
pub trait ManifestBuilder: Send + Sync {
    fn build(&self) -> Result<Payload>;
}

/// Manifests rendered ahead of time
#[derive(Debug, Clone, Default)]
pub struct StaticManifests(pub Payload);

impl ManifestBuilder for StaticManifests {
    fn build(&self) -> Result<Payload> {
        Ok(self.0.clone())
    }
}

impl<F> ManifestBuilder for F
where
    F: Fn() -> Result<Payload> + Send + Sync,
{
    fn build(&self) -> Result<Payload> {
        self()
    }
}

/// Scrape configs and alerting rules a component ships
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringConfig {
    pub scrape_configs: Vec<String>,
    pub alerting_rules: BTreeMap<String, String>,
}

impl MonitoringProvider for MonitoringConfig {
    fn scrape_configs(&self) -> Vec<String> {
        self.scrape_configs.clone()
    }

    fn alerting_rules(&self) -> BTreeMap<String, String> {
        self.alerting_rules.clone()
    }
}

/// A component deployed as a single bundle
pub struct ManagedComponent<B> {
    name: String,
    namespace: String,
    builder: B,
    reconciler: BundleReconciler,
    class: BundleClass,
    labels: Labels,
    keep_objects: bool,
    monitoring: Option<MonitoringConfig>,
}

impl<B: ManifestBuilder> ManagedComponent<B> {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        builder: B,
        reconciler: BundleReconciler,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            builder,
            reconciler,
            class: BundleClass::default(),
            labels: Labels::new(),
            keep_objects: false,
            monitoring: None,
        }
    }

    pub fn with_class(mut self, class: BundleClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn keep_objects(mut self, keep: bool) -> Self {
        self.keep_objects = keep;
        self
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Desired bundle, rendered fresh from the builder
    pub fn bundle(&self) -> Result<BundleSpec> {
        Ok(BundleSpec::new(&self.namespace, &self.name, self.builder.build()?)
            .with_class(self.class)
            .with_labels(self.labels.clone())
            .keep_objects(self.keep_objects))
    }
}

#[async_trait]
impl<B: ManifestBuilder> Deployer for ManagedComponent<B> {
    async fn deploy(&self, ctx: &Context) -> Result<()> {
        let bundle = self.bundle()?;
        self.reconciler.deploy(ctx, &bundle).await?;
        Ok(())
    }

    async fn destroy(&self, ctx: &Context) -> Result<()> {
        self.reconciler.destroy(ctx, &self.namespace, &self.name).await
    }
}

#[async_trait]
impl<B: ManifestBuilder> Waiter for ManagedComponent<B> {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        self.reconciler.wait(ctx, &self.namespace, &self.name).await
    }

    async fn wait_cleanup(&self, ctx: &Context) -> Result<()> {
        self.reconciler.wait_cleanup(ctx, &self.namespace, &self.name).await
    }
}

impl<B: ManifestBuilder> Component for ManagedComponent<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_monitoring(&self) -> Option<&dyn MonitoringProvider> {
        self.monitoring.as_ref().map(|m| m as &dyn MonitoringProvider)
    }
}
