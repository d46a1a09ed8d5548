//! peerlink
//!
//! Watches a membership document and keeps one tunnel peer per member.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use peerlink_core::config::{Config, TokenMode, load_config};
use peerlink_peers::address::build_url;
use peerlink_peers::membership::load_document;
use peerlink_peers::{
    DryRunTunnelServer, FileMembershipSource, JwtTokenIssuer, PeerId, PeerRegistry,
    ReconcileWorker, Reconciler, ServiceFilter, StaticTokenIssuer, TokenIssuer,
};

#[derive(Parser, Debug)]
#[command(name = "peerlink")]
#[command(version, about = "peerlink - tunnel peer manager")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "PEERLINK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile continuously against a polled membership document.
    Run(RunArgs),
    /// Print the connections one document would open, then exit.
    Plan(PlanArgs),
}

/// Overrides shared by both subcommands.
#[derive(Args, Debug)]
struct PeerArgs {
    /// Connection URL template with one `%s` for the peer address.
    #[arg(long)]
    url_format: Option<String>,

    /// Peer ID (address) of this process; never dialled.
    #[arg(long)]
    self_id: Option<String>,

    /// Only accept membership documents for this service (`namespace/name`).
    #[arg(long)]
    service: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Membership document to poll.
    #[arg(long)]
    membership: Option<PathBuf>,

    #[command(flatten)]
    peers: PeerArgs,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "PEERLINK_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Membership document to read.
    #[arg(long)]
    membership: PathBuf,

    #[command(flatten)]
    peers: PeerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    config.logging.json |= cli.log_json;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Plan(args) => plan(config, &args),
    }
}

fn apply_peer_args(config: &mut Config, args: &PeerArgs) {
    if let Some(url_format) = &args.url_format {
        config.peers.url_format.clone_from(url_format);
    }
    if let Some(self_id) = &args.self_id {
        config.peers.self_id = Some(self_id.clone());
    }
    if let Some(service) = &args.service {
        config.membership.service = Some(service.clone());
    }
}

fn service_filter(config: &Config) -> anyhow::Result<Option<ServiceFilter>> {
    config
        .membership
        .service
        .as_deref()
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .transpose()
}

fn token_issuer(config: &Config) -> anyhow::Result<Arc<dyn TokenIssuer>> {
    let missing = |key: &str| anyhow::anyhow!("{key} is not configured");
    let issuer: Arc<dyn TokenIssuer> = match config.token.mode {
        TokenMode::Static => {
            let path = config
                .token
                .token_file
                .as_deref()
                .ok_or_else(|| missing("token.token_file"))?;
            Arc::new(StaticTokenIssuer::from_file(path)?)
        }
        TokenMode::Jwt => {
            let path = config
                .token
                .jwt_secret_file
                .as_deref()
                .ok_or_else(|| missing("token.jwt_secret_file"))?;
            Arc::new(JwtTokenIssuer::from_secret_file(
                path,
                config.peers.self_id.clone(),
                config.token.ttl_secs,
            )?)
        }
    };
    Ok(issuer)
}

async fn run(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    apply_peer_args(&mut config, &args.peers);
    if let Some(path) = &args.membership {
        config.membership.path = Some(path.clone());
    }
    config.validate()?;

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    let log_filter = format!(
        "peerlink={level},peerlink_peers={level},peerlink_core={level}",
        level = config.logging.level
    );
    let metrics_guard = peerlink_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        config.logging.json,
        metrics_endpoint,
    );

    let membership_path = config
        .membership
        .path
        .clone()
        .ok_or_else(|| anyhow::anyhow!("membership.path is not configured"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        membership = %membership_path.display(),
        url_format = %config.peers.url_format,
        self_id = ?config.peers.self_id,
        "Starting peerlink"
    );

    let tokens = token_issuer(&config)?;
    let server = Arc::new(DryRunTunnelServer::new());
    let mut reconciler = Reconciler::new(config.peers.url_format.clone(), server, tokens);
    if let Some(self_id) = &config.peers.self_id {
        reconciler = reconciler.with_self_id(PeerId::new(self_id.as_str()));
    }
    spawn_status_logger(reconciler.subscribe());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    // Disconnect notices come from the transport; the dry-run server never
    // sends any, so the sender is held until shutdown.
    let (gone_tx, gone_rx) = mpsc::channel::<PeerId>(64);

    let mut source = FileMembershipSource::new(
        membership_path,
        Duration::from_secs(config.membership.poll_interval_secs),
    );
    if let Some(filter) = service_filter(&config)? {
        source = source.with_filter(filter);
    }
    let source_handle = source.spawn(snapshot_tx, shutdown_rx.clone());

    let mut worker = ReconcileWorker::new(reconciler);
    if config.peers.resync_interval_secs > 0 {
        worker = worker.with_resync_interval(Duration::from_secs(config.peers.resync_interval_secs));
    }
    #[cfg(feature = "metrics")]
    if metrics_endpoint.is_some() {
        worker = worker.with_metrics(peerlink_core::metrics::PeerMetrics::new());
    }
    let worker_handle = worker.spawn(snapshot_rx, gone_rx, shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    shutdown_tx.send_replace(true);
    drop(gone_tx);

    if let Err(e) = source_handle.await {
        warn!(error = %e, "Membership source task failed");
    }
    let reconciler = worker_handle.await?;
    info!(peers = reconciler.registry().len(), "peerlink stopped");

    #[cfg(feature = "metrics")]
    if let Some(Err(e)) = metrics_guard.map(peerlink_core::metrics::MetricsGuard::shutdown) {
        warn!(error = %e, "Failed to flush telemetry");
    }
    #[cfg(not(feature = "metrics"))]
    let _ = metrics_guard;
    Ok(())
}

fn spawn_status_logger(mut status: watch::Receiver<peerlink_peers::PeerStatus>) {
    tokio::spawn(async move {
        let mut ready = status.borrow().ready;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().ready;
            if current != ready {
                info!(ready = current, "Peer set readiness changed");
                ready = current;
            }
        }
    });
}

#[derive(Serialize)]
struct PlannedConnection {
    id: PeerId,
    url: String,
}

#[derive(Serialize)]
struct PlanOutput {
    connect: Vec<PlannedConnection>,
    skipped: Vec<String>,
    self_present: bool,
}

#[allow(clippy::print_stdout)]
fn plan(mut config: Config, args: &PlanArgs) -> anyhow::Result<()> {
    apply_peer_args(&mut config, &args.peers);
    let filter = service_filter(&config)?;
    let snapshot = read_membership(&args.membership, filter.as_ref())?;
    let self_id = config.peers.self_id.as_deref().map(PeerId::from);

    let plan = peerlink_peers::reconciler::plan(&snapshot, &PeerRegistry::new(), self_id.as_ref());
    let output = PlanOutput {
        connect: plan
            .to_add
            .into_iter()
            .map(|add| PlannedConnection {
                url: build_url(&config.peers.url_format, &add.display),
                id: add.id,
            })
            .collect(),
        skipped: plan.skipped,
        self_present: plan.self_present,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn read_membership(
    path: &Path,
    filter: Option<&ServiceFilter>,
) -> anyhow::Result<peerlink_peers::MembershipSnapshot> {
    load_document(path, filter)?.ok_or_else(|| {
        anyhow::anyhow!(
            "{} does not describe the selected service",
            path.display()
        )
    })
}
