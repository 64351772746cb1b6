//! Trellis Kube - lifecycle engine for externally-reconciled Kubernetes resources
//!
//! This crate provides:
//! - **Object Store**: `ObjectStore` over the Kubernetes API (`KubeStore`) or in memory (`MockStore`)
//! - **Upserts**: Get-or-create with optimistic concurrency and operation annotations
//! - **Waits**: Deadline-bound polling with severity tracking and cancellation
//! - **Health**: Convergence tables for extension resources and ManagedResource bundles
//! - **Bundles**: Content-addressed payload Secrets, stale bundle cleanup
//! - **Migration**: Two-phase restore and migrate handshakes
//! - **Components**: Capability traits and concurrent, non-fail-fast orchestration

pub mod bundle;
pub mod component;
pub mod components;
pub mod config;
pub mod context;
pub mod error;
pub mod extension;
pub mod fanout;
pub mod health;
pub mod migration;
pub mod retry;
pub mod store;
pub mod upsert;

pub use bundle::{BundleReconciler, BundleSpec, DeployOutcome, partition_stale, secret_payload};
pub use component::{
    Component, Deployer, Migrator, MonitoringProvider, Waiter, deploy_all, destroy_all,
    migrate_all, restore_all, wait_all, wait_cleanup_all, wait_migrate_all,
};
pub use components::{
    IpFamily, ManagedComponent, ManifestBuilder, MonitoringConfig, Network, NetworkConfig,
    PoolBundles, PoolManifestBuilder, StaticManifests, WorkerPool,
};
pub use config::LifecycleConfig;
pub use context::Context;
pub use error::{KubeError, Result, WaitCondition};
pub use extension::ExtensionLifecycle;
pub use fanout::run_all;
pub use health::HealthCheck;
pub use migration::MigrationCoordinator;
pub use retry::{ProbeOutcome, WaitTarget, wait_until};
pub use store::{KubeStore, Labels, MockStore, ObjectStore, OperationCounts};
pub use upsert::{MAX_CONFLICT_RETRIES, UpsertOperator};
