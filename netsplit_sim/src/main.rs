//! netsplit CLI
//!
//! `daemon` brings the nodes up, probes every pair and serves results to
//! viewers; `watch` renders those results as a live connectivity matrix.
//! Without a subcommand, `netsplit [flags]` runs `watch`.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use netsplit_core::dashboard::{ConnectivityDashboard, ExitReason, ViewerEvent};
use netsplit_core::viewer::{self, StreamEnd};
use netsplit_core::{Daemon, DaemonConfig, GridLayout, ViewerConfig, MAX_GRID_NODES};
use netsplit_env::{LinkController, LxcRuntime, NodeRuntime};
use netsplit_sim::{parse_partition, SimRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Deliberate network failure lab for ephemeral nodes
#[derive(Parser, Debug)]
#[command(name = "netsplit", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    // Flags of the default `watch` command
    #[command(flatten)]
    watch: WatchArgs,
}

impl Cli {
    fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Watch(self.watch))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the orchestrator and serve probe results
    Daemon(DaemonArgs),
    /// Connect to a daemon and render the connectivity matrix
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct DaemonArgs {
    /// Number of nodes (named n0..nN-1)
    #[arg(short, long, default_value = "5")]
    nodes: usize,

    /// Address the viewer listener binds to
    #[arg(short, long, default_value = "127.0.0.1:4001")]
    listen: String,

    /// Seconds between all-pairs sweeps
    #[arg(short, long, default_value = "4")]
    period: u64,

    /// Run against in-process simulated nodes instead of LXC
    #[arg(long)]
    simulate: bool,

    /// Partition to inject when simulating, e.g. `n0,n1/n2,n3` (repeatable)
    #[arg(long, requires = "simulate")]
    partition: Vec<String>,

    /// Probability that a simulated check is lost (0.0 - 1.0)
    #[arg(long, default_value = "0.0", requires = "simulate")]
    loss: f64,

    /// Seed for simulated loss rolls
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Daemon address
    #[arg(short, long, default_value = "127.0.0.1:4001")]
    addr: String,

    /// Number of nodes to lay out on the grid
    #[arg(
        short,
        long,
        default_value = "5",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=MAX_GRID_NODES as u64)
    )]
    nodes: usize,

    /// Print each result as a JSON object per line instead of the TUI
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.into_command() {
        Commands::Daemon(args) => {
            let level = if args.verbose { Level::DEBUG } else { Level::INFO };
            let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
            daemon(args).await
        }
        Commands::Watch(args) => {
            // The alternate screen owns stdout; keep logs on stderr.
            let level = if args.verbose { Level::DEBUG } else { Level::WARN };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
            watch(args).await
        }
    }
}

// =============================================================================
// DAEMON
// =============================================================================

async fn daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let config = DaemonConfig::default()
        .with_nodes(args.nodes)
        .with_listen_addr(args.listen.clone())
        .with_period(Duration::from_secs(args.period.max(1)));

    if args.simulate {
        let runtime = SimRuntime::new(args.seed).with_nodes(&config.prefix, args.nodes);
        for arg in &args.partition {
            let (left, right) = parse_partition(arg)?;
            info!(?left, ?right, "injecting partition");
            runtime.links().partition(&left, &right);
        }
        if args.loss > 0.0 {
            info!(loss = args.loss, "injecting loss on every link");
            runtime.links().set_default_loss(args.loss);
        }
        info!(nodes = args.nodes, seed = args.seed, "netsplit daemon (simulated)");
        serve(Arc::new(runtime), config).await
    } else {
        info!(nodes = args.nodes, "netsplit daemon (lxc)");
        serve(Arc::new(LxcRuntime::new()), config).await
    }
}

async fn serve<R: NodeRuntime>(runtime: Arc<R>, config: DaemonConfig) -> anyhow::Result<()> {
    let listener = Daemon::<R>::bind(&config.listen_addr).await?;

    let mut daemon = Daemon::new(runtime, config);
    let live = daemon.bring_up().await;
    if live == 0 {
        warn!("no node came up, probing nothing");
    }
    daemon.run(listener);

    wait_for_shutdown().await?;
    daemon.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }
    Ok(())
}

// =============================================================================
// WATCH
// =============================================================================

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let config = ViewerConfig::new(args.addr.clone());
    let stream = match viewer::connect(&config).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "giving up");
            return Err(e.into());
        }
    };

    if args.json {
        return watch_json(stream).await;
    }

    // Registered before raw mode so an external SIGINT can't skip the
    // terminal restore.
    let mut sigint = signal(SignalKind::interrupt())?;

    let (tx, rx) = crossbeam::channel::unbounded();
    let quit_tx = tx.clone();
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| args.addr.clone());
    let _ = tx.send(ViewerEvent::Connected(peer));

    let reader = tokio::spawn(async move {
        let status_tx = tx.clone();
        let ended = viewer::read_status_lines(stream, |line| {
            status_tx.send(ViewerEvent::Status(line)).is_ok()
        })
        .await;
        let reason = match ended {
            Ok(StreamEnd::Closed) => "daemon closed the connection".to_string(),
            Ok(StreamEnd::Stopped) => return,
            Err(e) => e.to_string(),
        };
        let _ = tx.send(ViewerEvent::Disconnected(reason));
    });

    let layout = GridLayout::new(args.nodes);
    let mut ui = tokio::task::spawn_blocking(move || {
        let mut dashboard = ConnectivityDashboard::new(rx, layout);
        dashboard.run()
    });
    let exit = tokio::select! {
        joined = &mut ui => joined.context("dashboard task failed")??,
        _ = sigint.recv() => {
            info!("Received SIGINT, closing dashboard...");
            let _ = quit_tx.send(ViewerEvent::Quit);
            ui.await.context("dashboard task failed")??
        }
    };
    reader.abort();

    match exit {
        ExitReason::UserQuit => Ok(()),
        ExitReason::Disconnected(reason) => {
            error!(%reason, "lost connection to daemon");
            anyhow::bail!("lost connection to daemon: {reason}")
        }
    }
}

async fn watch_json(stream: tokio::net::TcpStream) -> anyhow::Result<()> {
    let print = viewer::read_status_lines(stream, |line| {
        match serde_json::to_string(&line) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "could not encode result"),
        }
        true
    });

    tokio::select! {
        ended = print => {
            ended?;
            info!("daemon closed the connection");
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_daemon_defaults() {
        let cli = Cli::try_parse_from(["netsplit", "daemon"]).unwrap();
        let Commands::Daemon(args) = cli.into_command() else {
            panic!("expected daemon");
        };
        assert_eq!(args.nodes, 5);
        assert_eq!(args.listen, "127.0.0.1:4001");
        assert_eq!(args.period, 4);
        assert!(!args.simulate);
    }

    #[test]
    fn test_partition_requires_simulate() {
        assert!(Cli::try_parse_from(["netsplit", "daemon", "--partition", "n0/n1"]).is_err());
        let cli = Cli::try_parse_from([
            "netsplit", "daemon", "--simulate", "--partition", "n0/n1", "--partition", "n2/n3",
        ])
        .unwrap();
        let Commands::Daemon(args) = cli.into_command() else {
            panic!("expected daemon");
        };
        assert_eq!(args.partition.len(), 2);
    }

    #[test]
    fn test_loss_requires_simulate() {
        assert!(Cli::try_parse_from(["netsplit", "daemon", "--loss", "0.3"]).is_err());
        let cli = Cli::try_parse_from(["netsplit", "daemon", "--simulate", "--loss", "0.3"]).unwrap();
        let Commands::Daemon(args) = cli.into_command() else {
            panic!("expected daemon");
        };
        assert_eq!(args.loss, 0.3);
    }

    #[test]
    fn test_no_subcommand_runs_watch() {
        let cli = Cli::try_parse_from(["netsplit"]).unwrap();
        let Commands::Watch(args) = cli.into_command() else {
            panic!("expected watch");
        };
        assert_eq!(args.addr, "127.0.0.1:4001");
        assert_eq!(args.nodes, 5);
        assert!(!args.json);
    }

    #[test]
    fn test_leading_flag_runs_watch() {
        let cli = Cli::try_parse_from(["netsplit", "--addr", "10.0.0.9:4001", "-n", "3"]).unwrap();
        let Commands::Watch(args) = cli.into_command() else {
            panic!("expected watch");
        };
        assert_eq!(args.addr, "10.0.0.9:4001");
        assert_eq!(args.nodes, 3);
    }

    #[test]
    fn test_watch_nodes_are_bounded() {
        assert!(Cli::try_parse_from(["netsplit", "watch", "--nodes", "0"]).is_err());
        assert!(Cli::try_parse_from(["netsplit", "watch", "--nodes", "20000"]).is_err());
        assert!(Cli::try_parse_from(["netsplit", "--nodes", "20000"]).is_err());
        let max = MAX_GRID_NODES.to_string();
        assert!(Cli::try_parse_from(["netsplit", "watch", "--nodes", max.as_str()]).is_ok());
    }

    #[test]
    fn test_unknown_subcommand_is_usage_error() {
        let err = Cli::try_parse_from(["netsplit", "frobnicate"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_watch_flags() {
        let cli = Cli::try_parse_from(["netsplit", "watch", "--addr", "10.0.0.1:4001", "--json"]).unwrap();
        let Commands::Watch(args) = cli.into_command() else {
            panic!("expected watch");
        };
        assert_eq!(args.addr, "10.0.0.1:4001");
        assert!(args.json);
    }
}
