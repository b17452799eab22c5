use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use app_lib::modules::screenshot_store::DEFAULT_QUOTA_BYTES;
use app_lib::Tracker;

/// Records browser activity sent as JSON lines on stdin and answers queries
/// about it on stdout.
#[derive(Parser, Debug)]
#[command(name = "activity-tracker", version, about)]
struct Cli {
    /// Directory holding tracker.db and settings.json
    #[arg(long, env = "ACTIVITY_TRACKER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Storage quota used for screenshot eviction
    #[arg(long, default_value_t = DEFAULT_QUOTA_BYTES)]
    quota_bytes: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .context("Could not find config directory")?
            .join("activity-tracker"),
    };

    let tracker = Tracker::open(&data_dir, cli.quota_bytes)
        .await
        .with_context(|| format!("Failed to open tracker in {}", data_dir.display()))?;

    app_lib::run(tracker).await?;
    Ok(())
}
