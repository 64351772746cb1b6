//! Components built on the lifecycle engines

pub mod managed;
pub mod network;
pub mod pools;

pub use managed::{ManagedComponent, ManifestBuilder, MonitoringConfig, StaticManifests};
pub use network::{IpFamily, Network, NetworkConfig};
pub use pools::{PoolBundles, PoolManifestBuilder, WorkerPool};
