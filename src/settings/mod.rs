//! Centralized TOML-based settings system for livepilot.
//!
//! Settings are loaded from `~/.livepilot/settings.toml` with environment
//! variable interpolation support. The channel can also come from the
//! environment through the `get_with_env_fallback` helper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use livepilot_lib::settings::{SettingsManager, get_with_env_fallback};
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//!
//! let channel = get_with_env_fallback(
//!     &settings.stream.channel,
//!     &["LIVEPILOT_CHANNEL"],
//!     None,
//! );
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager};
pub use schema::PilotSettings;
