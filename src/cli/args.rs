//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for livepilot.

use clap::Parser;
use std::path::PathBuf;

/// livepilot - Drive an automated session from a live event stream
#[derive(Parser, Debug, Clone)]
#[command(name = "livepilot")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: ~/.livepilot/settings.toml)
    #[arg(short = 'c', long, env = "LIVEPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Replay events from a JSON-lines file (overrides stream.replay_file)
    #[arg(short = 'r', long)]
    pub replay: Option<PathBuf>,

    /// Channel to follow (overrides settings and LIVEPILOT_CHANNEL)
    #[arg(long)]
    pub channel: Option<String>,

    /// Directory for snapshot files (overrides snapshot.dir)
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Do not import the newest snapshot at start-up
    #[arg(long)]
    pub no_restore: bool,

    /// Never start the interactive console, wait for Ctrl-C instead
    #[arg(long)]
    pub no_console: bool,

    /// Show verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_values() {
        let args = Args::parse_from(["livepilot"]);
        assert_eq!(args.replay, None);
        assert_eq!(args.channel, None);
        assert!(!args.no_restore);
        assert!(!args.no_console);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_replay_and_channel() {
        let args = Args::parse_from([
            "livepilot",
            "-r",
            "events.jsonl",
            "--channel",
            "streamer",
        ]);
        assert_eq!(args.replay, Some(PathBuf::from("events.jsonl")));
        assert_eq!(args.channel, Some("streamer".to_string()));
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "livepilot",
            "--config",
            "/tmp/settings.toml",
            "--snapshot-dir",
            "/tmp/saves",
            "--no-restore",
            "--no-console",
            "-v",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/settings.toml")));
        assert_eq!(args.snapshot_dir, Some(PathBuf::from("/tmp/saves")));
        assert!(args.no_restore);
        assert!(args.no_console);
        assert!(args.verbose);
    }
}
