//! livepilot CLI - Drive a session from a live event stream
//!
//! # Usage
//!
//! ```bash
//! # Replay recorded events into a simulated session
//! ./target/debug/livepilot --replay events.jsonl --channel streamer
//!
//! # Custom settings file and snapshot directory
//! ./target/debug/livepilot -c ./settings.toml --snapshot-dir ./saves
//!
//! # Headless (no console, stop with Ctrl-C)
//! ./target/debug/livepilot -r events.jsonl --channel streamer --no-console
//! ```

use anyhow::Result;
use clap::Parser;

use livepilot_lib::cli::{initialize, run, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize the full stack
    let ctx = initialize(&args).await?;

    let result = run(&ctx).await;

    // Graceful shutdown: final snapshot, then release the session
    ctx.shutdown().await?;

    result
}
