/// seldon-lifecycle - SeldonDeployment lifecycle driver
///
/// Creates a SeldonDeployment, waits for it to become ready, scales it, waits
/// again, then deletes it and waits until it is gone.
mod config;
mod convergence;
mod k8s;
mod seldon;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::{Client, ResourceExt};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LifecycleConfig;
use crate::k8s::{EventLogger, KubeDeploymentStore, KubernetesClient};
use crate::seldon::{manifest, DeploymentManager, LifecyclePlan, SeldonDeployment, WaitSettings};

const DEFAULT_SETTINGS_FILE: &str = "seldon-lifecycle.yaml";

#[derive(Parser)]
#[command(name = "seldon-lifecycle")]
#[command(about = "Create, scale and delete a SeldonDeployment, waiting on each step", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Seldon deployment document (JSON or YAML)
    #[arg(short, long, default_value = "seldon-deployment.json")]
    file: PathBuf,

    /// Settings file path
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Kubeconfig path (defaults to $KUBECONFIG, then ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace override
    #[arg(short, long)]
    namespace: Option<String>,

    /// Log Kubernetes events in the background
    #[arg(long)]
    events_logging: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full create, scale, delete lifecycle (default)
    Run,

    /// Create the deployment and wait for the initial replicas
    Create,

    /// Scale the first predictor and wait for the new replica count
    Scale {
        /// Desired replica count
        #[arg(long)]
        replicas: i32,

        /// Deployment name (defaults to the document's name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete the deployment and wait until it is gone
    Delete {
        /// Deployment name (defaults to the document's name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Tail Kubernetes events until interrupted
    Events {
        /// Substring to match (defaults to the document's name)
        #[arg(long)]
        filter: Option<String>,
    },

    /// Validate the deployment document without contacting the cluster
    Validate,

    /// Generate example settings file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("seldon_lifecycle={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    // Execute command
    let result = match cli.command {
        None | Some(Commands::Run) => run_lifecycle(&cli, cancel).await,
        Some(Commands::Create) => create(&cli, cancel).await,
        Some(Commands::Scale { replicas, ref name }) => {
            scale(&cli, name.as_deref(), replicas, cancel).await
        }
        Some(Commands::Delete { ref name }) => delete(&cli, name.as_deref(), cancel).await,
        Some(Commands::Events { ref filter }) => {
            tail_events(&cli, filter.as_deref(), cancel).await
        }
        Some(Commands::Validate) => validate(&cli),
        Some(Commands::Init) => init_settings(&cli).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load settings and apply command-line overrides
fn load_settings(cli: &Cli) -> Result<LifecycleConfig> {
    let mut config =
        LifecycleConfig::load(cli.settings.as_deref()).context("Failed to load settings")?;

    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if cli.events_logging {
        config.events.enabled = true;
    }

    config.validate()?;
    Ok(config)
}

fn load_deployment(path: &Path) -> Result<SeldonDeployment> {
    manifest::load(path)
        .with_context(|| format!("Failed to load seldon deployment from {}", path.display()))
}

async fn connect(cli: &Cli) -> Result<Client> {
    let kubeconfig = config::kubeconfig_path(cli.kubeconfig.as_deref())?;
    KubernetesClient::connect(&kubeconfig).await
}

fn manager(
    client: Client,
    config: &LifecycleConfig,
    cancel: CancellationToken,
) -> DeploymentManager<KubeDeploymentStore> {
    DeploymentManager::new(
        KubeDeploymentStore::new(client, config.namespace.clone()),
        WaitSettings::from(config),
        cancel,
    )
}

/// Start the background event logger when enabled
fn start_event_logging(
    client: &Client,
    config: &LifecycleConfig,
    name: &str,
    cancel: &CancellationToken,
) -> Option<(CancellationToken, JoinHandle<()>)> {
    if !config.events.enabled {
        return None;
    }

    let filter = config.events.filter.clone().unwrap_or_else(|| name.to_string());
    let token = cancel.child_token();
    let handle = EventLogger::new(client.clone(), filter).spawn(token.clone());
    Some((token, handle))
}

async fn stop_event_logging(logger: Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((token, handle)) = logger {
        token.cancel();
        if let Err(e) = handle.await {
            warn!("Event logger task failed: {}", e);
        }
    }
}

/// Run the full lifecycle
async fn run_lifecycle(cli: &Cli, cancel: CancellationToken) -> Result<()> {
    let config = load_settings(cli)?;
    let dpl = load_deployment(&cli.file)?;
    let name = dpl.name_any();

    info!("Starting lifecycle for seldon deployment {} in {}", name, config.namespace);

    let client = connect(cli).await?;
    let logger = start_event_logging(&client, &config, &name, &cancel);

    let result = manager(client, &config, cancel)
        .run_lifecycle(&dpl, LifecyclePlan::from(&config))
        .await;

    stop_event_logging(logger).await;
    result?;

    info!("✓ Lifecycle completed for seldon deployment {}", name);
    Ok(())
}

/// Create the deployment and wait for it to become ready
async fn create(cli: &Cli, cancel: CancellationToken) -> Result<()> {
    let config = load_settings(cli)?;
    let dpl = load_deployment(&cli.file)?;
    let name = dpl.name_any();
    let replicas = dpl
        .spec
        .predictors
        .first()
        .and_then(|p| p.replicas)
        .unwrap_or(config.initial_replicas);

    let client = connect(cli).await?;
    let logger = start_event_logging(&client, &config, &name, &cancel);
    let manager = manager(client, &config, cancel);

    let result = async {
        manager.create_deployment(&dpl).await?;
        manager.wait_for_ready_replicas(&name, replicas).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    stop_event_logging(logger).await;
    result
}

/// Resolve a deployment name from the flag or the document
fn deployment_name(cli: &Cli, name: Option<&str>) -> Result<String> {
    match name {
        Some(name) => Ok(name.to_string()),
        None => Ok(load_deployment(&cli.file)?.name_any()),
    }
}

/// Scale an existing deployment
async fn scale(
    cli: &Cli,
    name: Option<&str>,
    replicas: i32,
    cancel: CancellationToken,
) -> Result<()> {
    if replicas < 0 {
        anyhow::bail!("replicas cannot be negative");
    }

    let config = load_settings(cli)?;
    let name = deployment_name(cli, name)?;

    let client = connect(cli).await?;
    let logger = start_event_logging(&client, &config, &name, &cancel);
    let manager = manager(client, &config, cancel);

    let result = async {
        manager.update_deployment_replicas(&name, replicas).await?;
        manager.wait_for_ready_replicas(&name, replicas).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    stop_event_logging(logger).await;
    result
}

/// Delete a deployment and wait for it to disappear
async fn delete(cli: &Cli, name: Option<&str>, cancel: CancellationToken) -> Result<()> {
    let config = load_settings(cli)?;
    let name = deployment_name(cli, name)?;

    let client = connect(cli).await?;
    let manager = manager(client, &config, cancel);

    manager.delete_deployment(&name).await?;
    manager.wait_for_deleted(&name).await
}

/// Tail events until Ctrl-C
async fn tail_events(cli: &Cli, filter: Option<&str>, cancel: CancellationToken) -> Result<()> {
    let config = load_settings(cli)?;
    let filter = match filter.map(str::to_string).or(config.events.filter) {
        Some(filter) => filter,
        None => deployment_name(cli, None)?,
    };

    let client = connect(cli).await?;
    EventLogger::new(client, filter).run(cancel).await
}

/// Validate the deployment document
fn validate(cli: &Cli) -> Result<()> {
    let dpl = load_deployment(&cli.file)?;

    info!("✓ {} is valid", cli.file.display());
    info!("  Name: {}", dpl.name_any());
    for predictor in &dpl.spec.predictors {
        info!(
            "  Predictor: {} (graph: {}, replicas: {})",
            predictor.name,
            predictor.graph.name,
            predictor.replicas.unwrap_or(1)
        );
    }

    Ok(())
}

/// Initialize example settings file
async fn init_settings(cli: &Cli) -> Result<()> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    if path.exists() {
        anyhow::bail!("Settings file already exists: {}", path.display());
    }

    let yaml = serde_yaml::to_string(&LifecycleConfig::example())?;

    tokio::fs::write(&path, yaml)
        .await
        .context("Failed to write settings file")?;

    info!("Example settings created: {}", path.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the settings file to match your cluster");
    info!("  2. Point KUBECONFIG at your cluster (or pass --kubeconfig)");
    info!("  3. Run the lifecycle:");
    info!("     seldon-lifecycle --settings {} run", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_to_lifecycle_run() {
        let cli = Cli::try_parse_from(["seldon-lifecycle"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.file, PathBuf::from("seldon-deployment.json"));
        assert!(!cli.events_logging);
    }

    #[test]
    fn test_overrides_applied_to_settings() {
        let cli = Cli::try_parse_from([
            "seldon-lifecycle",
            "--namespace",
            "models",
            "--events-logging",
            "scale",
            "--replicas",
            "3",
        ])
        .unwrap();

        let config = load_settings(&cli).unwrap();
        assert_eq!(config.namespace, "models");
        assert!(config.events.enabled);
        assert!(matches!(
            cli.command,
            Some(Commands::Scale { replicas: 3, name: None })
        ));
    }
}
