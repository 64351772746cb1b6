//! CLI commands

pub mod bundle;
pub mod extension;

use console::style;
use std::path::Path;
use std::sync::Arc;
use trellis_kube::{Context, KubeStore, LifecycleConfig, ObjectStore};

use crate::error::Result;

/// Configuration plus a connection to the cluster
pub struct Session {
    pub config: LifecycleConfig,
    pub store: Arc<dyn ObjectStore>,
    pub ctx: Context,
}

impl Session {
    /// Connect using the ambient kubeconfig; Ctrl-C cancels running operations
    pub async fn connect(config: LifecycleConfig) -> Result<Self> {
        let store = KubeStore::try_default().await?;
        let ctx = Context::background();

        let on_interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Interrupted, cancelling", style("!").yellow().bold());
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            config,
            store: Arc::new(store),
            ctx,
        })
    }
}

/// Load lifecycle configuration from `--config` or the default location
pub fn load_config(path: Option<&Path>) -> Result<LifecycleConfig> {
    Ok(LifecycleConfig::load(path)?)
}

pub(crate) fn step(action: &str, what: impl std::fmt::Display, namespace: &str) {
    println!(
        "{} {} {} in namespace {}",
        style("→").blue().bold(),
        action,
        style(what).cyan(),
        style(namespace).yellow()
    );
}

pub(crate) fn done(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green().bold(), message);
}
