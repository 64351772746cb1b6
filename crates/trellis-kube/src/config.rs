//! Lifecycle configuration
//!
//! Stores retry policies and bundle settings in `~/.config/trellis/config.yaml`:
//!
//! ```yaml
//! extension:
//!   interval: 5s
//!   severeThreshold: 30s
//!   timeout: 3m
//! bundle:
//!   interval: 2s
//!   severeThreshold: 30s
//!   timeout: 2m
//! origin: trellis
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::{BundleReconciler, DEFAULT_ORIGIN};
use crate::error::{KubeError, Result};
use crate::extension::ExtensionLifecycle;
use crate::migration::MigrationCoordinator;
use crate::store::ObjectStore;
use trellis_core::RetryPolicy;
use trellis_core::payload::MAX_SECRET_PAYLOAD;

/// Settings shared by every lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleConfig {
    /// Waits on extension resources
    pub extension: RetryPolicy,

    /// Waits on ManagedResource bundles
    pub bundle: RetryPolicy,

    /// Waits on migrations
    pub migration: RetryPolicy,

    /// Value of the `origin` label on every bundle
    pub origin: String,

    /// Bytes stored in one payload Secret before a payload is split
    pub max_secret_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            extension: RetryPolicy::extension_default(),
            bundle: RetryPolicy::bundle_default(),
            migration: RetryPolicy::migration_default(),
            origin: DEFAULT_ORIGIN.to_string(),
            max_secret_size: MAX_SECRET_PAYLOAD,
        }
    }
}

impl LifecycleConfig {
    /// Load from `path` if given, else from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("trellis").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("extension", &self.extension),
            ("bundle", &self.bundle),
            ("migration", &self.migration),
        ] {
            if policy.interval.is_zero() {
                return Err(KubeError::InvalidConfig(format!("{name}.interval must be positive")));
            }
            if policy.timeout < policy.interval {
                return Err(KubeError::InvalidConfig(format!(
                    "{name}.timeout must not be shorter than {name}.interval"
                )));
            }
        }
        if self.max_secret_size == 0 {
            return Err(KubeError::InvalidConfig("maxSecretSize must be positive".to_string()));
        }
        trellis_core::validation::validate_label_value(&self.origin)?;
        Ok(())
    }

    pub fn extension_lifecycle(&self, store: Arc<dyn ObjectStore>) -> ExtensionLifecycle {
        ExtensionLifecycle::new(store).with_policy(self.extension)
    }

    pub fn bundle_reconciler(&self, store: Arc<dyn ObjectStore>) -> BundleReconciler {
        BundleReconciler::new(store)
            .with_policy(self.bundle)
            .with_origin(self.origin.clone())
            .with_max_secret_size(self.max_secret_size)
    }

    pub fn migration_coordinator(&self, store: Arc<dyn ObjectStore>) -> MigrationCoordinator {
        MigrationCoordinator::new(store).with_policy(self.migration)
    }
}
