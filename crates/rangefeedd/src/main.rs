//! rangefeedd: drive the rangefeed engine from the command line.
//!
//! Reads an engine config (TOML) and a topology file (JSON) standing in for
//! the upstream provider, and prints task layouts as JSON on stdout.
//!
//! # Usage
//!
//! ```text
//! rangefeedd plan  --config feed.toml --topology topology.json
//! rangefeedd watch --config feed.toml --topology topology.json --offsets offsets.json
//! ```

mod offsets;
mod topology;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rangefeed_core::{EngineConfig, parse_duration};
use rangefeed_engine::{Layout, LayoutPlanner};
use rangefeed_monitor::{ChannelNotifier, TopologyMonitor};
use rangefeed_state::{InMemoryOffsetStorage, OffsetStorage, open_metadata_store};

use crate::offsets::FileOffsetStorage;
use crate::topology::FileRangeProvider;

#[derive(Parser)]
#[command(name = "rangefeedd", about = "Change-feed range assignment engine")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Sources {
    /// Engine configuration file (TOML).
    #[arg(long)]
    config: PathBuf,

    /// Topology file listing containers and their ranges (JSON).
    #[arg(long)]
    topology: PathBuf,

    /// Offsets file persisted between runs. In-memory when omitted.
    #[arg(long)]
    offsets: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the task layout once and print it.
    Plan {
        #[command(flatten)]
        sources: Sources,

        /// Override `connector.max_tasks`.
        #[arg(long)]
        max_tasks: Option<usize>,
    },
    /// Print a layout, then re-plan whenever the topology diverges.
    Watch {
        #[command(flatten)]
        sources: Sources,

        /// Override `metadata.poll_delay` (e.g. "30s").
        #[arg(long)]
        poll_delay: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Plan { sources, max_tasks } => run_plan(&sources, max_tasks).await,
        Command::Watch {
            sources,
            poll_delay,
        } => run_watch(&sources, poll_delay.as_deref()).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rangefeed=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_planner(sources: &Sources) -> anyhow::Result<LayoutPlanner> {
    let config = EngineConfig::from_file(&sources.config)
        .with_context(|| format!("loading {}", sources.config.display()))?;
    let offsets: Arc<dyn OffsetStorage> = match &sources.offsets {
        Some(path) => Arc::new(FileOffsetStorage::open(path)?),
        None => Arc::new(InMemoryOffsetStorage::new()),
    };
    let store = open_metadata_store(&config, offsets)?;
    let provider = Arc::new(FileRangeProvider::new(&sources.topology));
    info!(
        connector = %config.connector.name,
        database = %config.connector.database,
        topology = %sources.topology.display(),
        "engine configured"
    );
    Ok(LayoutPlanner::new(config, provider, store))
}

fn print_layout(layout: &Layout) -> anyhow::Result<()> {
    let out = serde_json::json!({
        "taskConfigs": layout.task_configs,
        "metadataTaskUnit": layout.metadata_unit,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn run_plan(sources: &Sources, max_tasks: Option<usize>) -> anyhow::Result<()> {
    let planner = build_planner(sources)?;
    let max_tasks = max_tasks.unwrap_or(planner.config().connector.max_tasks);
    let layout = planner.plan_with(max_tasks).await?;
    print_layout(&layout)
}

async fn run_watch(sources: &Sources, poll_delay: Option<&str>) -> anyhow::Result<()> {
    let planner = build_planner(sources)?;
    let layout = planner.plan().await?;
    print_layout(&layout)?;

    let (notifier, mut requests) = ChannelNotifier::new(1);
    let mut monitor = TopologyMonitor::new(planner.config(), planner.engine(), Arc::new(notifier))?;
    if let Some(delay) = poll_delay {
        let delay = parse_duration(delay)
            .filter(|d| !d.is_zero())
            .with_context(|| format!("invalid poll delay {delay:?}"))?;
        monitor = monitor.with_poll_delay(delay);
    }
    monitor.seed(&layout.metadata_unit);
    let handle = monitor.spawn();

    loop {
        tokio::select! {
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
                match planner.plan().await {
                    Ok(layout) => print_layout(&layout)?,
                    Err(e) => error!(error = %e, "layout recomputation failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    handle.stop().await;
    info!("rangefeedd stopped");
    Ok(())
}
