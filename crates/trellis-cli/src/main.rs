//! Trellis CLI - deploy, wait for and migrate externally-reconciled Kubernetes components

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use trellis_core::BundleClass;
use trellis_kube::Labels;

mod commands;
mod error;
mod exit_codes;
mod util;

use commands::Session;
use error::Result;
use util::{parse_duration, parse_key_val, parse_label_set};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author = "Trellis Contributors")]
#[command(version)]
#[command(about = "Deploy, wait for and migrate externally-reconciled Kubernetes components", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Lifecycle configuration file (default: ~/.config/trellis/config.yaml)
    #[arg(long, global = true, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage ManagedResource bundles
    #[command(subcommand)]
    Bundle(BundleCommand),

    /// Manage extension resources
    #[command(subcommand)]
    Extension(ExtensionCommand),
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassArg {
    Seed,
    Shoot,
}

impl From<ClassArg> for BundleClass {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::Seed => BundleClass::Seed,
            ClassArg::Shoot => BundleClass::Shoot,
        }
    }
}

#[derive(Subcommand)]
enum BundleCommand {
    /// Store manifests in payload secrets and point a bundle at them
    Deploy {
        /// Bundle name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Directory holding *.yaml, *.yml and *.json manifests
        #[arg(long)]
        dir: PathBuf,

        /// Resource manager that applies the bundle
        #[arg(long, value_enum, default_value = "shoot")]
        class: ClassArg,

        /// Leave applied objects behind when the bundle is deleted
        #[arg(long)]
        keep_objects: bool,

        /// Label to put on the bundle (key=value)
        #[arg(long = "label", value_parser = parse_key_val)]
        labels: Vec<(String, String)>,

        /// Wait until the bundle is healthy
        #[arg(long)]
        wait: bool,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Wait until a bundle is applied and healthy
    Wait {
        /// Bundle name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Delete a bundle and its payload secrets
    Destroy {
        /// Bundle name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Wait until the bundle is gone
        #[arg(long)]
        wait: bool,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Delete bundles matching a selector that no desired label set covers
    Prune {
        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Label every candidate bundle carries (key=value)
        #[arg(long = "selector", value_parser = parse_key_val, required = true)]
        selector: Vec<(String, String)>,

        /// Label set of a bundle to keep (k=v,k=v), repeatable
        #[arg(long = "desired", value_parser = parse_label_set)]
        desired: Vec<Labels>,

        /// Wait until pruned bundles are gone
        #[arg(long)]
        wait: bool,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },
}

#[derive(Subcommand)]
enum ExtensionCommand {
    /// Wait until the controller reports the resource reconciled
    Wait {
        /// Resource kind (e.g. Network)
        kind: String,

        /// Resource name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Confirm and request deletion
    Delete {
        /// Resource kind (e.g. Network)
        kind: String,

        /// Resource name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Wait until the resource is gone
        #[arg(long)]
        wait: bool,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Ask the controller to release the resource for a move to another cluster
    Migrate {
        /// Resource kind (e.g. Network)
        kind: String,

        /// Resource name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// Wait until the controller finished the migration
        #[arg(long)]
        wait: bool,

        /// Wait timeout (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Recreate the resource from a spec and an optional migrated state
    Restore {
        /// Resource kind (e.g. Network)
        kind: String,

        /// Resource name
        name: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: String,

        /// File holding the desired spec (YAML or JSON)
        #[arg(long)]
        spec: PathBuf,

        /// File holding the state snapshot (YAML or JSON)
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Bundle(command) => match command {
            BundleCommand::Deploy {
                name,
                namespace,
                dir,
                class,
                keep_objects,
                labels,
                wait,
                timeout,
            } => {
                let spec = commands::bundle::spec(&name, &namespace, &dir, class.into(), keep_objects, labels)?;
                let session = Session::connect(config).await?;
                commands::bundle::deploy(&session, &spec, wait, timeout).await
            }
            BundleCommand::Wait {
                name,
                namespace,
                timeout,
            } => {
                let session = Session::connect(config).await?;
                commands::bundle::wait(&session, &name, &namespace, timeout).await
            }
            BundleCommand::Destroy {
                name,
                namespace,
                wait,
                timeout,
            } => {
                let session = Session::connect(config).await?;
                commands::bundle::destroy(&session, &name, &namespace, wait, timeout).await
            }
            BundleCommand::Prune {
                namespace,
                selector,
                desired,
                wait,
                timeout,
            } => {
                let selector: Labels = selector.into_iter().collect();
                let session = Session::connect(config).await?;
                commands::bundle::prune(&session, &namespace, &selector, &desired, wait, timeout).await
            }
        },

        Commands::Extension(command) => match command {
            ExtensionCommand::Wait {
                kind,
                name,
                namespace,
                timeout,
            } => {
                let key = commands::extension::key(&kind, &name, &namespace)?;
                let session = Session::connect(config).await?;
                commands::extension::wait(&session, &key, timeout).await
            }
            ExtensionCommand::Delete {
                kind,
                name,
                namespace,
                wait,
                timeout,
            } => {
                let key = commands::extension::key(&kind, &name, &namespace)?;
                let session = Session::connect(config).await?;
                commands::extension::delete(&session, &key, wait, timeout).await
            }
            ExtensionCommand::Migrate {
                kind,
                name,
                namespace,
                wait,
                timeout,
            } => {
                let key = commands::extension::key(&kind, &name, &namespace)?;
                let session = Session::connect(config).await?;
                commands::extension::migrate(&session, &key, wait, timeout).await
            }
            ExtensionCommand::Restore {
                kind,
                name,
                namespace,
                spec,
                state,
            } => {
                let key = commands::extension::key(&kind, &name, &namespace)?;
                let session = Session::connect(config).await?;
                commands::extension::restore(&session, &key, &spec, state.as_deref()).await
            }
        },
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.debug);

    if let Err(e) = run(cli).await {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
}
