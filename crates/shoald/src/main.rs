//! shoald — the shoal daemon.
//!
//! Single binary that assembles the control loop:
//! - Service discovery (compose manifest)
//! - Prometheus metric sampling
//! - Scaling policy + cooldown tracking
//! - Orchestrator reconciliation (docker compose)
//! - Routing document projection
//!
//! # Usage
//!
//! ```text
//! shoald run --watch
//! shoald generate
//! shoald status
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use shoal_control::{ControlLoop, ManifestWatcher};
use shoal_core::{ScalingRule, ServiceTopology, ShoalConfig, TopologySnapshot};
use shoal_discovery::{ComposeDiscovery, ServiceDiscovery};
use shoal_metrics::{MetricSampler, MetricsSource, PrometheusSource};
use shoal_orchestrator::{ComposeOrchestrator, Orchestrator, Reconciler};
use shoal_proxy::ConfigProjector;

#[derive(Parser)]
#[command(name = "shoald", about = "Compose service autoscaling and proxy reconciliation")]
struct Cli {
    /// Path to shoal.toml. Built-in defaults apply when the file is absent.
    #[arg(long, default_value = "shoal.toml", global = true)]
    config: PathBuf,

    /// Override the compose manifest path from the config file.
    #[arg(long, global = true)]
    compose_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop.
    Run {
        /// Tick interval in seconds (overrides the config file).
        #[arg(long)]
        interval: Option<u64>,

        /// Also tick on (debounced) manifest changes.
        #[arg(long)]
        watch: bool,

        /// Sample and decide only; skip reconciliation and projection.
        #[arg(long)]
        dry_run: bool,
    },
    /// Project the routing document once from current state and exit.
    Generate,
    /// Print discovered services with live endpoints and rules as JSON.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shoald=debug,shoal=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(compose_file) = cli.compose_file {
        config.compose_file = compose_file;
    }

    match cli.command {
        Command::Run {
            interval,
            watch,
            dry_run,
        } => run_loop(config, interval, watch, dry_run).await,
        Command::Generate => generate(config).await,
        Command::Status => status(config).await,
    }
}

/// Load shoal.toml, falling back to defaults when absent. Malformed config
/// (including scaling rules violating their invariants) is process-fatal.
fn load_config(path: &PathBuf) -> anyhow::Result<ShoalConfig> {
    if path.exists() {
        let config = ShoalConfig::from_file(path)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        Ok(ShoalConfig::default())
    }
}

async fn run_loop(
    config: ShoalConfig,
    interval: Option<u64>,
    watch_manifest: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    info!("shoal daemon starting");

    let interval = Duration::from_secs(interval.unwrap_or(config.tick_interval_secs));

    // ── Assemble subsystems ────────────────────────────────────
    let discovery = Arc::new(ComposeDiscovery::new(&config));
    info!(manifest = %config.compose_file.display(), "service discovery initialized");

    let source = Arc::new(PrometheusSource::new(&config.prometheus)?);
    let sampler = MetricSampler::new(source as Arc<dyn MetricsSource>, &config.sampling);
    info!(url = %config.prometheus.url, "metric sampler initialized");

    let orchestrator = Arc::new(ComposeOrchestrator::new(config.compose_file.clone()));
    let reconciler = Reconciler::new(
        orchestrator as Arc<dyn Orchestrator>,
        &config.reconcile,
    );
    info!("reconciler initialized");

    let projector = ConfigProjector::new(&config.domain_suffix, config.routing_file.clone());
    info!(output = %config.routing_file.display(), "projector initialized");

    let mut control = ControlLoop::new(
        config.compose_file.clone(),
        discovery as Arc<dyn ServiceDiscovery>,
        sampler,
        reconciler,
        projector,
    )
    .with_dry_run(dry_run);

    // ── Triggers ───────────────────────────────────────────────
    let (trigger_tx, trigger_rx) = shoal_control::trigger::channel();
    let _watcher = if watch_manifest {
        let watcher = ManifestWatcher::spawn(
            &config.compose_file,
            config.watch_debounce(),
            trigger_tx.clone(),
        )?;
        info!("watch mode enabled");
        Some(watcher)
    } else {
        None
    };

    // ── Run until Ctrl-C ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(async move {
        control.run(interval, trigger_rx, shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;
    drop(trigger_tx);

    info!("shoal daemon stopped");
    Ok(())
}

/// One-shot projection: discover, read live endpoints best-effort, write
/// the routing document through the same projector path the loop uses.
async fn generate(config: ShoalConfig) -> anyhow::Result<()> {
    let discovery = ComposeDiscovery::new(&config);
    let services = discovery.list_services(&config.compose_file)?;
    let orchestrator = ComposeOrchestrator::new(config.compose_file.clone());

    let mut snapshot = TopologySnapshot::new();
    for service in &services {
        let (replicas, endpoints) = match orchestrator.live_endpoints(&service.name).await {
            Ok(endpoints) if !endpoints.is_empty() => (endpoints.len() as u32, endpoints),
            Ok(_) => (
                service.replicas,
                service.default_endpoint().into_iter().collect(),
            ),
            Err(e) => {
                warn!(service = %service.name, error = %e, "endpoint query failed, using manifest defaults");
                (
                    service.replicas,
                    service.default_endpoint().into_iter().collect(),
                )
            }
        };
        snapshot.insert(&service.name, ServiceTopology::new(replicas, endpoints));
    }

    let projector = ConfigProjector::new(&config.domain_suffix, config.routing_file.clone());
    projector.write(&projector.project(&services, &snapshot))?;
    println!("{}", config.routing_file.display());
    Ok(())
}

#[derive(Serialize)]
struct ServiceStatus {
    name: String,
    image: String,
    declared_replicas: u32,
    live_endpoints: Vec<String>,
    proxy_enabled: bool,
    scaling: Option<ScalingRule>,
}

async fn status(config: ShoalConfig) -> anyhow::Result<()> {
    let discovery = ComposeDiscovery::new(&config);
    let services = discovery.list_services(&config.compose_file)?;
    let orchestrator = ComposeOrchestrator::new(config.compose_file.clone());

    let mut statuses = Vec::new();
    for service in services {
        let live_endpoints = match orchestrator.live_endpoints(&service.name).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(service = %service.name, error = %e, "endpoint query failed");
                Vec::new()
            }
        };
        statuses.push(ServiceStatus {
            name: service.name,
            image: service.image,
            declared_replicas: service.replicas,
            live_endpoints,
            proxy_enabled: service.proxy.enabled,
            scaling: service.scaling,
        });
    }

    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
