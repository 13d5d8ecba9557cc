//! chatmirror: relays chat messages between two live-stream platforms.
//!
//! # Usage
//!
//! ```bash
//! chatmirror --config chatmirror.toml
//! chatmirror --profile production --debug
//! ```
//!
//! Every setting can also be given as a `CHATMIRROR_*` environment variable,
//! e.g. `CHATMIRROR_ENDPOINT_A_CHANNEL_ID=somechannel`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chatmirror_runtime::{MirrorRuntime, logging};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chatmirror", version, about)]
struct Cli {
    /// Configuration file (default: search chatmirror.toml / config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "production".
    #[arg(short, long)]
    profile: Option<String>,

    /// Log at debug level regardless of configuration.
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = MirrorRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    if cli.debug {
        builder = builder.set("logging.level", "debug");
    }

    let config = builder.load_config().context("failed to load configuration")?;
    let _guard = logging::init_from_config(&config.logging);

    let runtime = MirrorRuntime::from_config(config).context("invalid configuration")?;
    runtime.run().await.context("chat relay failed to start")?;

    info!("chatmirror exited cleanly");
    Ok(())
}
