//! Snapshot binary.
//!
//! Takes a consistent snapshot of the configured Postgres tables and writes every row to stdout
//! as a JSON line. Logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use config::load_config_from;
use config::shared::SnapshotterConfig;
use telemetry::tracing::init_tracing;
use tracing::error;

use crate::core::start_snapshotter;

mod core;

/// Command line arguments, applied on top of the loaded configuration.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Directory holding `base.yaml` and the environment specific configuration files.
    #[arg(long = "config-dir", default_value = "configuration")]
    config_dir: PathBuf,

    /// Table selector (`table`, `schema.table` or `schema.*`). Replaces the configured tables
    /// when given at least once.
    #[arg(long = "table", short = 't')]
    tables: Vec<String>,

    /// Reports per schema progress while copying.
    #[arg(long)]
    progress: bool,

    /// Number of rows buffered between the snapshot workers and stdout.
    #[arg(long = "channel-capacity", default_value_t = 1024)]
    channel_capacity: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut snapshotter_config = load_config_from::<SnapshotterConfig>(&args.config_dir)?;
    if !args.tables.is_empty() {
        snapshotter_config.tables = args.tables.clone();
    }
    if args.progress {
        snapshotter_config.snapshot.progress_tracking = true;
    }
    snapshotter_config.validate()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(snapshotter_config, args.channel_capacity))
}

async fn async_main(
    snapshotter_config: SnapshotterConfig,
    channel_capacity: usize,
) -> anyhow::Result<()> {
    if let Err(err) = start_snapshotter(snapshotter_config, channel_capacity).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
