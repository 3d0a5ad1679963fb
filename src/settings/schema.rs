//! Settings schema definitions for livepilot.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults. Durations are stored as
//! plain integers with the unit in the key name.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::ReconnectPolicy;
use crate::mapper::{default_gift_rules, CommandTable, GiftRule, GiftTable, MapperRules};
use crate::session::simulated::SimulatedConfig;
use crate::snapshot::{SchedulePolicy, SnapshotPolicy};

/// Root settings structure.
///
/// Loaded from `~/.livepilot/settings.toml` with environment variable interpolation support.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Live event stream
    pub stream: StreamSettings,

    /// Connect / reconnect timing
    pub reconnect: ReconnectSettings,

    /// Snapshot storage and schedule
    pub snapshot: SnapshotSettings,

    /// Event-to-action rules
    pub mapper: MapperSettings,

    /// Simulated session surface
    pub session: SessionSettings,

    /// Advanced/debug settings
    pub advanced: AdvancedSettings,
}

/// Live event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Channel / room to follow (supports $ENV_VAR syntax, falls back to LIVEPILOT_CHANNEL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// JSON-lines file of events to replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_file: Option<String>,

    /// Pause between replayed events
    pub replay_interval_ms: u64,

    /// Replay the file again after each reconnect
    pub replay_repeat: bool,
}

/// Connect / reconnect timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub rate_limit_cap_secs: u64,
    pub cooldown_secs: u64,
    pub min_spacing_ms: u64,
    pub connect_timeout_secs: u64,
}

/// Snapshot storage and schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Directory of snapshot files (supports $ENV_VAR syntax)
    pub dir: String,

    /// Period of scheduled snapshots
    pub interval_secs: u64,

    /// Extraction attempts per snapshot
    pub max_retries: u32,

    pub retry_delay_secs: u64,

    /// Delay before retrying a failed scheduled snapshot
    pub failure_reschedule_secs: u64,

    /// Reload the surface between attempts
    pub refresh_between_retries: bool,

    /// Import the newest snapshot at start-up
    pub restore_on_start: bool,
}

/// Event-to-action rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    /// Largest tap submission for engagement events
    pub taps_per_batch: u32,

    /// Taps per repeat for unknown gifts
    pub default_gift_taps: u32,

    /// Command that triggers a manual snapshot
    pub backup_command: String,

    /// Slot command prefix (`up`, `up1`, `up2`, ...)
    pub slot_prefix: String,

    /// Highest slot number accepted from commands
    pub max_slot: usize,

    /// Target names accepted as commands
    pub targets: Vec<String>,

    /// Gift rules keyed by gift id
    pub gifts: HashMap<String, GiftRule>,
}

/// Simulated session surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub tap_interval_ms: u64,
    pub slot_count: usize,
    pub targets: Vec<String>,
}

/// Advanced/debug settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Log level: "error" | "warn" | "info" | "debug" | "trace"
    pub log_level: String,
}

fn default_targets() -> Vec<String> {
    ["Cursor", "Grandma", "Farm", "Mine", "Factory", "Bank"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PilotSettings {
    fn default() -> Self {
        Self {
            version: 1,
            stream: StreamSettings::default(),
            reconnect: ReconnectSettings::default(),
            snapshot: SnapshotSettings::default(),
            mapper: MapperSettings::default(),
            session: SessionSettings::default(),
            advanced: AdvancedSettings::default(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel: None,
            replay_file: None,
            replay_interval_ms: 500,
            replay_repeat: true,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_secs: 60,
            rate_limit_cap_secs: 300,
            cooldown_secs: 300,
            min_spacing_ms: 1000,
            connect_timeout_secs: 30,
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            dir: "backups".to_string(),
            interval_secs: 3600,
            max_retries: 3,
            retry_delay_secs: 5,
            failure_reschedule_secs: 300,
            refresh_between_retries: true,
            restore_on_start: true,
        }
    }
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            taps_per_batch: 50,
            default_gift_taps: 50,
            backup_command: "!backup".to_string(),
            slot_prefix: "up".to_string(),
            max_slot: 10,
            targets: default_targets(),
            gifts: default_gift_rules(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tap_interval_ms: 10,
            slot_count: 10,
            targets: default_targets(),
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            rate_limit_cap: Duration::from_secs(self.rate_limit_cap_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
            min_spacing: Duration::from_millis(self.min_spacing_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

impl SnapshotSettings {
    pub fn policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            refresh_between_retries: self.refresh_between_retries,
        }
    }

    pub fn schedule(&self) -> SchedulePolicy {
        SchedulePolicy {
            period: Duration::from_secs(self.interval_secs),
            failure_delay: Duration::from_secs(self.failure_reschedule_secs),
        }
    }
}

impl MapperSettings {
    pub fn rules(&self) -> MapperRules {
        MapperRules {
            commands: CommandTable::new(
                self.backup_command.as_str(),
                self.slot_prefix.as_str(),
                self.max_slot,
                self.targets.clone(),
            ),
            gifts: GiftTable::new(self.gifts.clone(), self.default_gift_taps),
            taps_per_batch: self.taps_per_batch,
        }
    }
}

impl SessionSettings {
    pub fn simulated(&self) -> SimulatedConfig {
        SimulatedConfig {
            tap_interval: Duration::from_millis(self.tap_interval_ms),
            slot_count: self.slot_count,
            targets: self.targets.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PilotSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.reconnect.max_attempts, 5);
        assert_eq!(settings.snapshot.interval_secs, 3600);
        assert_eq!(settings.mapper.backup_command, "!backup");
        assert_eq!(settings.mapper.gifts.len(), 3);
        assert_eq!(settings.advanced.log_level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            version = 1
            [snapshot]
            interval_secs = 600

            [mapper.gifts.7934]
            taps = 10
            target = "Farm"
        "#;

        let settings: PilotSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.snapshot.interval_secs, 600);
        // Defaults should fill in missing fields
        assert_eq!(settings.snapshot.max_retries, 3);
        assert_eq!(settings.reconnect.connect_timeout_secs, 30);
        // An explicit gift table replaces the built-in one
        assert_eq!(settings.mapper.gifts.len(), 1);
        assert_eq!(settings.mapper.gifts["7934"].target.as_deref(), Some("Farm"));
    }

    #[test]
    fn test_serialize_settings() {
        let settings = PilotSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("version = 1"));
        assert!(toml_str.contains("[reconnect]"));
    }

    #[test]
    fn test_policies_match_defaults() {
        let settings = PilotSettings::default();
        assert_eq!(settings.reconnect.policy(), ReconnectPolicy::default());
        assert_eq!(settings.snapshot.policy(), SnapshotPolicy::default());
        assert_eq!(settings.snapshot.schedule(), SchedulePolicy::default());

        let rules = settings.mapper.rules();
        assert_eq!(rules.taps_per_batch, 50);
        assert_eq!(rules.commands.backup_command(), "!backup");
    }
}
