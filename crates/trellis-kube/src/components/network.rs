//! Network extension component

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::component::{Component, Deployer, Migrator, Waiter};
use crate::context::Context;
use crate::error::{KubeError, Result};
use crate::extension::ExtensionLifecycle;
use crate::migration::MigrationCoordinator;
use trellis_core::ObjectKey;

pub const KIND: &str = "Network";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    IPv4,
    IPv6,
}

/// Desired state of a cluster network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Extension type handled by the network controller, e.g. `calico`
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,

    #[serde(rename = "serviceCIDR")]
    pub service_cidr: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_families: Vec<IpFamily>,

    /// Opaque configuration passed through to the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
}

impl NetworkConfig {
    pub fn new(
        provider_type: impl Into<String>,
        pod_cidr: impl Into<String>,
        service_cidr: impl Into<String>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            pod_cidr: pod_cidr.into(),
            service_cidr: service_cidr.into(),
            ip_families: Vec::new(),
            provider_config: None,
        }
    }

    pub fn with_ip_families(mut self, families: Vec<IpFamily>) -> Self {
        self.ip_families = families;
        self
    }

    pub fn with_provider_config(mut self, config: serde_json::Value) -> Self {
        self.provider_config = Some(config);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider_type.is_empty() {
            return Err(KubeError::InvalidConfig("network type must not be empty".to_string()));
        }
        validate_cidr("podCIDR", &self.pod_cidr)?;
        validate_cidr("serviceCIDR", &self.service_cidr)?;
        Ok(())
    }
}

fn validate_cidr(field: &str, cidr: &str) -> Result<()> {
    if cidr.is_empty() {
        return Err(KubeError::InvalidConfig(format!("{field} must not be empty")));
    }
    let invalid = || KubeError::InvalidConfig(format!("{field} '{cidr}' is not a valid CIDR"));

    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

/// The cluster network, reconciled by an external network extension
pub struct Network {
    key: ObjectKey,
    config: NetworkConfig,
    lifecycle: ExtensionLifecycle,
    migration: MigrationCoordinator,
}

impl Network {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        config: NetworkConfig,
        lifecycle: ExtensionLifecycle,
        migration: MigrationCoordinator,
    ) -> Self {
        Self {
            key: ObjectKey::extension(KIND, namespace, name),
            config,
            lifecycle,
            migration,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn desired_spec(&self) -> Result<serde_json::Value> {
        self.config.validate()?;
        Ok(serde_json::to_value(&self.config)?)
    }
}

fn set_spec(spec: serde_json::Value) -> impl FnMut(&mut DynamicObject) -> Result<()> + Send {
    move |object| {
        object.data["spec"] = spec.clone();
        Ok(())
    }
}

#[async_trait]
impl Deployer for Network {
    async fn deploy(&self, ctx: &Context) -> Result<()> {
        let spec = self.desired_spec()?;
        self.lifecycle.deploy(ctx, &self.key, set_spec(spec)).await?;
        Ok(())
    }

    async fn destroy(&self, ctx: &Context) -> Result<()> {
        self.lifecycle.destroy(ctx, &self.key).await
    }
}

#[async_trait]
impl Waiter for Network {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        self.lifecycle.wait_ready(ctx, &self.key).await
    }

    async fn wait_cleanup(&self, ctx: &Context) -> Result<()> {
        self.lifecycle.wait_deleted(ctx, &self.key).await
    }
}

#[async_trait]
impl Migrator for Network {
    async fn restore(&self, ctx: &Context, state: Option<&serde_json::Value>) -> Result<()> {
        let spec = self.desired_spec()?;
        self.migration
            .restore(ctx, &self.key, state, set_spec(spec))
            .await?;
        Ok(())
    }

    async fn migrate(&self, ctx: &Context) -> Result<()> {
        self.migration.migrate(ctx, &self.key).await
    }

    async fn wait_migrate(&self, ctx: &Context) -> Result<()> {
        self.migration.wait_migrate(ctx, &self.key).await
    }
}

impl Component for Network {
    fn name(&self) -> &str {
        "network"
    }

    fn as_migrator(&self) -> Option<&dyn Migrator> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use trellis_core::RetryPolicy;
    use trellis_core::annotations::pending_operation;

    fn network(store: &MockStore, config: NetworkConfig) -> Network {
        let policy = RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        let store: Arc<dyn crate::store::ObjectStore> = Arc::new(store.clone());
        Network::new(
            "shoot--dev--a",
            "a",
            config,
            ExtensionLifecycle::new(store.clone()).with_policy(policy),
            MigrationCoordinator::new(store).with_policy(policy),
        )
    }

    fn calico() -> NetworkConfig {
        NetworkConfig::new("calico", "100.96.0.0/11", "100.64.0.0/13")
    }

    #[test]
    fn test_validate() {
        assert!(calico().validate().is_ok());
        assert!(NetworkConfig::new("", "100.96.0.0/11", "100.64.0.0/13").validate().is_err());
        assert!(NetworkConfig::new("calico", "", "100.64.0.0/13").validate().is_err());
        assert!(NetworkConfig::new("calico", "100.96.0.0/33", "100.64.0.0/13").validate().is_err());
        assert!(NetworkConfig::new("calico", "100.96.0.0", "100.64.0.0/13").validate().is_err());
        assert!(NetworkConfig::new("cilium", "fd00::/48", "fd01::/108").validate().is_ok());
    }

    #[tokio::test]
    async fn test_deploy_writes_spec() {
        let store = MockStore::new();
        let config = calico()
            .with_ip_families(vec![IpFamily::IPv4])
            .with_provider_config(json!({"backend": "bird"}));
        let network = network(&store, config);

        network.deploy(&Context::background()).await.unwrap();

        let object = store.object(network.key()).unwrap();
        assert_eq!(
            object.data["spec"],
            json!({
                "type": "calico",
                "podCIDR": "100.96.0.0/11",
                "serviceCIDR": "100.64.0.0/13",
                "ipFamilies": ["IPv4"],
                "providerConfig": {"backend": "bird"}
            })
        );
        assert_eq!(
            pending_operation(&object.metadata.annotations.unwrap()),
            Some("reconcile")
        );
    }

    #[tokio::test]
    async fn test_empty_type_fails_before_any_request() {
        let store = MockStore::new();
        let network = network(&store, NetworkConfig::new("", "100.96.0.0/11", "100.64.0.0/13"));

        let err = network.deploy(&Context::background()).await.unwrap_err();

        assert!(matches!(err, KubeError::InvalidConfig(_)));
        assert_eq!(store.operation_counts(), Default::default());
    }

    #[tokio::test]
    async fn test_restore_hands_over_state() {
        let store = MockStore::new();
        let network = network(&store, calico());

        network
            .restore(&Context::background(), Some(&json!({"ipam": "restored"})))
            .await
            .unwrap();

        let object = store.object(network.key()).unwrap();
        assert_eq!(object.data["status"]["state"], json!({"ipam": "restored"}));
        assert_eq!(
            pending_operation(&object.metadata.annotations.unwrap()),
            Some("restore")
        );
    }

    #[test]
    fn test_supports_migration() {
        let store = MockStore::new();
        let network = network(&store, calico());
        assert!(network.as_migrator().is_some());
        assert!(network.as_monitoring().is_none());
    }
}
