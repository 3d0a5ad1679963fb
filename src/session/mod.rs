//! The automated session surface.
//!
//! The surface itself (a browser page, an emulator, a remote document) lives
//! outside this crate. The core only sees the [`SessionSurface`] trait and
//! never holds a handle to it directly: the one instance per process is moved
//! into the [`Serializer`](crate::serializer::Serializer) worker and reached
//! only through submitted actions.
//!
//! All methods are fallible and may take arbitrarily long. None of them retry
//! internally; retry policy lives in the callers.

pub mod simulated;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use simulated::SimulatedSurface;

/// A single state-mutating operation against the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Primary low-cost engagement action, repeated `count` times.
    Tap { count: u32 },

    /// Activate the first enabled slot.
    FirstSlot,

    /// Activate the n-th enabled slot (1-based).
    Slot { index: usize },

    /// Activate a named target.
    Target { name: String },
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpec::Tap { count } => write!(f, "tap x{}", count),
            ActionSpec::FirstSlot => write!(f, "slot #first"),
            ActionSpec::Slot { index } => write!(f, "slot #{}", index),
            ActionSpec::Target { name } => write!(f, "target '{}'", name),
        }
    }
}

/// Interface of the single automated surface driven by this process.
///
/// Takes `&mut self` everywhere: the serializer worker is the sole owner, so
/// implementations need no interior locking.
#[async_trait]
pub trait SessionSurface: Send + 'static {
    /// Wait until the surface can accept input.
    ///
    /// # Errors
    /// `PilotError::NotReady` if readiness is not reached within the
    /// surface's own timeout.
    async fn readiness_check(&mut self) -> Result<()>;

    /// Perform one action.
    async fn invoke(&mut self, action: &ActionSpec) -> Result<()>;

    /// Trigger the export affordance and read back the exported payload.
    async fn export_state(&mut self) -> Result<Vec<u8>>;

    /// Load a previously exported payload.
    async fn import_state(&mut self, payload: &[u8]) -> Result<()>;

    /// Reload the surface. Used between snapshot retries.
    async fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the surface at process exit.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Run a list of actions in order, stopping at the first failure.
pub async fn invoke_all<S: SessionSurface>(session: &mut S, actions: &[ActionSpec]) -> Result<()> {
    for action in actions {
        session.invoke(action).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_spec_serde_tag() {
        let json = serde_json::to_value(ActionSpec::Tap { count: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tap", "count": 3}));

        let parsed: ActionSpec =
            serde_json::from_str(r#"{"type": "target", "name": "Cursor"}"#).unwrap();
        assert_eq!(
            parsed,
            ActionSpec::Target {
                name: "Cursor".to_string()
            }
        );
    }

    #[test]
    fn test_action_spec_display() {
        assert_eq!(ActionSpec::Tap { count: 50 }.to_string(), "tap x50");
        assert_eq!(ActionSpec::Slot { index: 2 }.to_string(), "slot #2");
    }
}
