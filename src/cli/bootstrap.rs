//! CLI bootstrap - Initialize the full livepilot stack.
//!
//! Loads settings, sets up logging, builds the session surface and the
//! stream client, and starts the [`Pilot`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pilot::{Pilot, PilotConfig};
use crate::session::simulated::SimulatedSurface;
use crate::settings::{get_with_env_fallback, PilotSettings, SettingsManager};
use crate::snapshot::BackupStatus;
use crate::stream::replay::{ReplayConfig, ReplayStreamClient};

use super::args::Args;

/// Context for CLI execution containing all initialized services.
pub struct CliContext {
    /// The running system
    pub pilot: Pilot<SimulatedSurface>,

    /// Settings manager
    pub settings_manager: Arc<SettingsManager>,

    /// Settings as loaded at start-up
    pub settings: PilotSettings,

    /// Command-line arguments
    pub args: Args,
}

impl CliContext {
    /// Graceful shutdown - final snapshot, then release the session.
    pub async fn shutdown(self) -> Result<()> {
        let status = self.pilot.shutdown().await;
        match (&status, final_snapshot_warning(&status)) {
            (BackupStatus::Saved(record), _) => {
                tracing::info!("Final snapshot saved to {}", record.path.display());
            }
            (_, Some(message)) => tracing::warn!("{}", message),
            (_, None) => {}
        }

        Ok(())
    }
}

/// Initialize the CLI context with all services.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("[cli] Failed to load .env file: {}", e);
        }
    }

    // Load settings
    let settings_manager = Arc::new(
        match &args.config {
            Some(path) => SettingsManager::with_path(path.clone()).await,
            None => SettingsManager::new().await,
        }
        .context("Failed to initialize settings manager")?,
    );

    let settings = settings_manager.get().await;

    // Initialize logging; RUST_LOG wins over settings and --verbose
    init_logging(&settings.advanced.log_level, args.verbose);

    // Ensure settings file exists (creates template on first run)
    if args.config.is_none() {
        if let Err(e) = settings_manager.ensure_settings_file().await {
            tracing::warn!("Failed to create settings template: {}", e);
        }
    }

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
    }

    let channel = resolve_channel(&settings, args)?;
    let replay_path = resolve_replay_path(&settings, args)?;
    let config = pilot_config(&settings, args);

    if args.verbose {
        eprintln!("[cli] Channel: {}", channel);
        eprintln!("[cli] Replaying events from {}", replay_path.display());
        eprintln!("[cli] Snapshots in {}", config.snapshot_dir.display());
    }

    let client = Arc::new(ReplayStreamClient::new(ReplayConfig {
        path: replay_path,
        room_id: channel,
        interval: Duration::from_millis(settings.stream.replay_interval_ms),
        repeat: settings.stream.replay_repeat,
    }));
    let surface = SimulatedSurface::new(settings.session.simulated());

    let pilot = Pilot::start(config, surface, client).await;

    Ok(CliContext {
        pilot,
        settings_manager,
        settings,
        args: args.clone(),
    })
}

/// Warning for a final snapshot that did not produce a file.
fn final_snapshot_warning(status: &BackupStatus) -> Option<String> {
    match status {
        BackupStatus::Saved(_) => None,
        BackupStatus::InProgress => {
            Some("Final snapshot skipped: another backup was in progress".to_string())
        }
        BackupStatus::Failed(reason) => Some(format!("Final snapshot failed: {}", reason)),
    }
}

fn init_logging(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("livepilot_lib={0},livepilot={0}", level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve the channel.
///
/// Priority order:
/// 1. `--channel`
/// 2. `stream.channel` in settings
/// 3. `LIVEPILOT_CHANNEL`
fn resolve_channel(settings: &PilotSettings, args: &Args) -> Result<String> {
    if let Some(channel) = args.channel.as_ref().filter(|c| !c.is_empty()) {
        return Ok(channel.clone());
    }

    get_with_env_fallback(&settings.stream.channel, &["LIVEPILOT_CHANNEL"], None).ok_or_else(
        || {
            anyhow::anyhow!(
                "No channel configured. Pass --channel, set stream.channel in settings, \
                 or set LIVEPILOT_CHANNEL"
            )
        },
    )
}

fn resolve_replay_path(settings: &PilotSettings, args: &Args) -> Result<PathBuf> {
    args.replay
        .clone()
        .or_else(|| settings.stream.replay_file.as_ref().map(PathBuf::from))
        .ok_or_else(|| {
            anyhow::anyhow!("No event source. Pass --replay <file> or set stream.replay_file")
        })
}

fn pilot_config(settings: &PilotSettings, args: &Args) -> PilotConfig {
    let mut config = PilotConfig::from_settings(settings);
    if let Some(dir) = &args.snapshot_dir {
        config.snapshot_dir = dir.clone();
    }
    if args.no_restore {
        config.restore_on_start = false;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_channel_from_args_wins() {
        let mut settings = PilotSettings::default();
        settings.stream.channel = Some("from_settings".to_string());
        let args = Args::parse_from(["livepilot", "--channel", "from_args"]);

        assert_eq!(resolve_channel(&settings, &args).unwrap(), "from_args");
    }

    #[test]
    fn test_channel_from_settings() {
        let mut settings = PilotSettings::default();
        settings.stream.channel = Some("from_settings".to_string());
        let args = Args::parse_from(["livepilot"]);

        assert_eq!(resolve_channel(&settings, &args).unwrap(), "from_settings");
    }

    #[test]
    fn test_replay_path_is_required() {
        let settings = PilotSettings::default();
        let args = Args::parse_from(["livepilot"]);
        assert!(resolve_replay_path(&settings, &args).is_err());

        let args = Args::parse_from(["livepilot", "--replay", "events.jsonl"]);
        assert_eq!(
            resolve_replay_path(&settings, &args).unwrap(),
            PathBuf::from("events.jsonl")
        );
    }

    #[test]
    fn test_final_snapshot_warning() {
        assert_eq!(
            final_snapshot_warning(&BackupStatus::Failed("disk full".to_string())),
            Some("Final snapshot failed: disk full".to_string())
        );
        assert!(final_snapshot_warning(&BackupStatus::InProgress).is_some());
    }

    #[test]
    fn test_pilot_config_overrides() {
        let settings = PilotSettings::default();
        let args = Args::parse_from(["livepilot", "--snapshot-dir", "/tmp/saves", "--no-restore"]);

        let config = pilot_config(&settings, &args);
        assert_eq!(config.snapshot_dir, PathBuf::from("/tmp/saves"));
        assert!(!config.restore_on_start);
        assert_eq!(config.schedule.period, Duration::from_secs(3600));
    }
}
