//! Per-worker-pool bundles
//!
//! Node-level components like kube-proxy ship one bundle per worker pool and
//! Kubernetes version, so a rolling version upgrade runs old and new bundles
//! side by side until the old pool is gone. Bundles are found again through
//! their labels:
//!
//! ```text
//! kube-proxy-worker-a-v1.31.2
//!   component=kube-proxy role=pool pool-name=worker-a kubernetes-version=1.31.2
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

use crate::bundle::{BundleReconciler, BundleSpec};
use crate::component::{Component, Deployer, Waiter};
use crate::context::Context;
use crate::error::Result;
use crate::fanout::run_all;
use crate::store::Labels;
use trellis_core::{BundleClass, Payload};

pub const LABEL_COMPONENT: &str = "component";
pub const LABEL_ROLE: &str = "role";
pub const LABEL_POOL_NAME: &str = "pool-name";
pub const LABEL_KUBERNETES_VERSION: &str = "kubernetes-version";
pub const ROLE_POOL: &str = "pool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPool {
    pub name: String,
    pub kubernetes_version: String,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, kubernetes_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kubernetes_version: kubernetes_version.into(),
        }
    }
}

/// Renders the manifests for one worker pool
pub trait PoolManifestBuilder: Send + Sync {
    fn build(&self, pool: &WorkerPool) -> Result<Payload>;
}

impl<F> PoolManifestBuilder for F
where
    F: Fn(&WorkerPool) -> Result<Payload> + Send + Sync,
{
    fn build(&self, pool: &WorkerPool) -> Result<Payload> {
        self(pool)
    }
}

/// One bundle per desired worker pool
pub struct PoolBundles<B> {
    component: String,
    namespace: String,
    pools: Vec<WorkerPool>,
    builder: B,
    reconciler: BundleReconciler,
    class: BundleClass,
}

impl<B: PoolManifestBuilder> PoolBundles<B> {
    pub fn new(
        namespace: impl Into<String>,
        component: impl Into<String>,
        pools: Vec<WorkerPool>,
        builder: B,
        reconciler: BundleReconciler,
    ) -> Self {
        Self {
            component: component.into(),
            namespace: namespace.into(),
            pools,
            builder,
            reconciler,
            class: BundleClass::default(),
        }
    }

    pub fn with_class(mut self, class: BundleClass) -> Self {
        self.class = class;
        self
    }

    pub fn pools(&self) -> &[WorkerPool] {
        &self.pools
    }

    pub fn bundle_name(&self, pool: &WorkerPool) -> String {
        format!("{}-{}-v{}", self.component, pool.name, pool.kubernetes_version)
    }

    /// Labels shared by every bundle of this component
    pub fn selector(&self) -> Labels {
        [
            (LABEL_COMPONENT.to_string(), self.component.clone()),
            (LABEL_ROLE.to_string(), ROLE_POOL.to_string()),
        ]
        .into_iter()
        .collect()
    }

    /// Labels that tell the bundle of `pool` apart from its siblings
    pub fn pool_labels(pool: &WorkerPool) -> Labels {
        [
            (LABEL_POOL_NAME.to_string(), pool.name.clone()),
            (LABEL_KUBERNETES_VERSION.to_string(), pool.kubernetes_version.clone()),
        ]
        .into_iter()
        .collect()
    }

    fn desired(&self) -> Vec<Labels> {
        self.pools.iter().map(Self::pool_labels).collect()
    }

    fn bundle(&self, pool: &WorkerPool) -> Result<BundleSpec> {
        Ok(
            BundleSpec::new(&self.namespace, self.bundle_name(pool), self.builder.build(pool)?)
                .with_class(self.class)
                .with_labels(self.selector())
                .with_labels(Self::pool_labels(pool)),
        )
    }

    /// Delete bundles of pools or versions no longer desired, returning their names
    pub async fn delete_stale(&self, ctx: &Context) -> Result<Vec<String>> {
        self.reconciler
            .delete_stale(ctx, &self.namespace, &self.selector(), &self.desired())
            .await
    }

    pub async fn wait_cleanup_stale(&self, ctx: &Context) -> Result<()> {
        self.reconciler
            .wait_cleanup_stale(ctx, &self.namespace, &self.selector(), &self.desired())
            .await
    }
}

#[async_trait]
impl<B: PoolManifestBuilder> Deployer for PoolBundles<B> {
    async fn deploy(&self, ctx: &Context) -> Result<()> {
        let bundles = self
            .pools
            .iter()
            .map(|pool| self.bundle(pool))
            .collect::<Result<Vec<_>>>()?;

        run_all(
            bundles
                .iter()
                .map(|bundle| {
                    self.reconciler
                        .deploy(ctx, bundle)
                        .map(|result| result.map(|_| ()))
                        .boxed()
                })
                .collect(),
        )
        .await?;
        info!(component = %self.component, pools = bundles.len(), "pool bundles deployed");
        Ok(())
    }

    /// Every bundle of the component is stale once the component goes away
    async fn destroy(&self, ctx: &Context) -> Result<()> {
        self.reconciler
            .delete_stale(ctx, &self.namespace, &self.selector(), &[])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<B: PoolManifestBuilder> Waiter for PoolBundles<B> {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        run_all(
            self.pools
                .iter()
                .map(|pool| {
                    let name = self.bundle_name(pool);
                    async move { self.reconciler.wait(ctx, &self.namespace, &name).await }.boxed()
                })
                .collect(),
        )
        .await
    }

    async fn wait_cleanup(&self, ctx: &Context) -> Result<()> {
        self.reconciler
            .wait_cleanup_stale(ctx, &self.namespace, &self.selector(), &[])
            .await
    }
}

impl<B: PoolManifestBuilder> Component for PoolBundles<B> {
    fn name(&self) -> &str {
        &self.component
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockStore, labels};
    use std::sync::Arc;
    use trellis_core::{ObjectKey, ResourceKind};

    fn kube_proxy(store: &MockStore, pools: Vec<WorkerPool>) -> PoolBundles<impl PoolManifestBuilder> {
        let builder = |pool: &WorkerPool| -> Result<Payload> {
            Ok(Payload::new().with(
                "daemonset.yaml",
                format!("image: kube-proxy:v{}", pool.kubernetes_version),
            ))
        };
        PoolBundles::new(
            "shoot--dev--a",
            "kube-proxy",
            pools,
            builder,
            BundleReconciler::new(Arc::new(store.clone())),
        )
    }

    fn bundles(store: &MockStore) -> Vec<String> {
        store.names(&ResourceKind::managed_resource(), "shoot--dev--a")
    }

    #[tokio::test]
    async fn test_deploy_names_and_labels_bundles_per_pool() {
        let store = MockStore::new();
        let proxy = kube_proxy(
            &store,
            vec![WorkerPool::new("worker-a", "1.31.2"), WorkerPool::new("worker-b", "1.31.2")],
        );

        proxy.deploy(&Context::background()).await.unwrap();

        assert_eq!(
            bundles(&store),
            vec!["kube-proxy-worker-a-v1.31.2", "kube-proxy-worker-b-v1.31.2"]
        );
        let bundle = store
            .object(&ObjectKey::managed_resource("shoot--dev--a", "kube-proxy-worker-a-v1.31.2"))
            .unwrap();
        let bundle_labels = labels(&bundle);
        assert_eq!(bundle_labels.get(LABEL_ROLE).map(String::as_str), Some("pool"));
        assert_eq!(bundle_labels.get(LABEL_POOL_NAME).map(String::as_str), Some("worker-a"));
        assert_eq!(
            bundle_labels.get(LABEL_KUBERNETES_VERSION).map(String::as_str),
            Some("1.31.2")
        );
    }

    #[tokio::test]
    async fn test_upgrade_leaves_old_version_until_stale_cleanup() {
        let store = MockStore::new();
        let ctx = Context::background();
        kube_proxy(&store, vec![WorkerPool::new("worker-a", "1.30.5")])
            .deploy(&ctx)
            .await
            .unwrap();

        let upgraded = kube_proxy(&store, vec![WorkerPool::new("worker-a", "1.31.2")]);
        upgraded.deploy(&ctx).await.unwrap();
        assert_eq!(bundles(&store).len(), 2);

        let deleted = upgraded.delete_stale(&ctx).await.unwrap();

        assert_eq!(deleted, vec!["kube-proxy-worker-a-v1.30.5".to_string()]);
        assert_eq!(bundles(&store), vec!["kube-proxy-worker-a-v1.31.2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_removes_every_pool() {
        let store = MockStore::new();
        let ctx = Context::background();
        let proxy = kube_proxy(
            &store,
            vec![WorkerPool::new("worker-a", "1.31.2"), WorkerPool::new("worker-b", "1.31.2")],
        );
        proxy.deploy(&ctx).await.unwrap();

        proxy.destroy(&ctx).await.unwrap();
        proxy.wait_cleanup(&ctx).await.unwrap();

        assert!(bundles(&store).is_empty());
        assert!(store.names(&ResourceKind::secret(), "shoot--dev--a").is_empty());
    }
}
