//! In-memory session surface.
//!
//! Keeps a small counter model of the driven session so the whole pipeline
//! can run without a browser. Exported state is base64-encoded JSON, the same
//! shape of opaque text blob a real export affordance produces.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{ActionSpec, SessionSurface};
use crate::error::{PilotError, Result};

/// Counters tracked by the simulated session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedState {
    /// Total taps performed
    pub taps: u64,

    /// Activation count per slot index (1-based)
    pub slots: BTreeMap<usize, u64>,

    /// Activation count per target name
    pub targets: BTreeMap<String, u64>,
}

/// Configuration for [`SimulatedSurface`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Pause between individual taps
    pub tap_interval: Duration,

    /// Number of slots that can be activated
    pub slot_count: usize,

    /// Names of the targets that exist on the surface
    pub targets: Vec<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            tap_interval: Duration::from_millis(10),
            slot_count: 10,
            targets: Vec::new(),
        }
    }
}

pub struct SimulatedSurface {
    config: SimulatedConfig,
    state: SimulatedState,
    closed: bool,
}

impl SimulatedSurface {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            state: SimulatedState::default(),
            closed: false,
        }
    }

    /// Current counters.
    pub fn state(&self) -> &SimulatedState {
        &self.state
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PilotError::Session("surface is closed".to_string()));
        }
        Ok(())
    }

    fn find_target(&self, name: &str) -> Option<&str> {
        self.config
            .targets
            .iter()
            .find(|t| t.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

#[async_trait]
impl SessionSurface for SimulatedSurface {
    async fn readiness_check(&mut self) -> Result<()> {
        self.ensure_open()
    }

    async fn invoke(&mut self, action: &ActionSpec) -> Result<()> {
        self.ensure_open()?;

        match action {
            ActionSpec::Tap { count } => {
                for _ in 0..*count {
                    self.state.taps += 1;
                    if !self.config.tap_interval.is_zero() {
                        tokio::time::sleep(self.config.tap_interval).await;
                    }
                }
            }
            ActionSpec::FirstSlot => {
                if self.config.slot_count > 0 {
                    *self.state.slots.entry(1).or_default() += 1;
                }
            }
            ActionSpec::Slot { index } => {
                if *index >= 1 && *index <= self.config.slot_count {
                    *self.state.slots.entry(*index).or_default() += 1;
                } else {
                    tracing::debug!("[session] slot {} is not available", index);
                }
            }
            ActionSpec::Target { name } => match self.find_target(name) {
                Some(found) => {
                    let found = found.to_string();
                    *self.state.targets.entry(found).or_default() += 1;
                }
                None => tracing::debug!("[session] target '{}' not found", name),
            },
        }

        Ok(())
    }

    async fn export_state(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let json = serde_json::to_vec(&self.state)
            .map_err(|e| PilotError::Session(format!("failed to encode state: {}", e)))?;
        Ok(STANDARD.encode(json).into_bytes())
    }

    async fn import_state(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let json = STANDARD
            .decode(payload.trim_ascii())
            .map_err(|e| PilotError::Session(format!("payload is not base64: {}", e)))?;
        self.state = serde_json::from_slice(&json)
            .map_err(|e| PilotError::Session(format!("payload is not a saved state: {}", e)))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> SimulatedSurface {
        SimulatedSurface::new(SimulatedConfig {
            tap_interval: Duration::ZERO,
            slot_count: 3,
            targets: vec!["Cursor".to_string(), "Grandma".to_string()],
        })
    }

    #[tokio::test]
    async fn test_invoke_updates_counters() {
        let mut s = surface();
        s.invoke(&ActionSpec::Tap { count: 7 }).await.unwrap();
        s.invoke(&ActionSpec::FirstSlot).await.unwrap();
        s.invoke(&ActionSpec::Slot { index: 3 }).await.unwrap();
        s.invoke(&ActionSpec::Slot { index: 9 }).await.unwrap();
        s.invoke(&ActionSpec::Target {
            name: "cursor".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(s.state().taps, 7);
        assert_eq!(s.state().slots.get(&1), Some(&1));
        assert_eq!(s.state().slots.get(&3), Some(&1));
        assert_eq!(s.state().slots.get(&9), None);
        assert_eq!(s.state().targets.get("Cursor"), Some(&1));
    }

    #[tokio::test]
    async fn test_export_import_restores_state() {
        let mut s = surface();
        s.invoke(&ActionSpec::Tap { count: 42 }).await.unwrap();
        let payload = s.export_state().await.unwrap();
        assert!(!payload.is_empty());

        let mut fresh = surface();
        fresh.import_state(&payload).await.unwrap();
        assert_eq!(fresh.state().taps, 42);
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let mut s = surface();
        let err = s.import_state(b"not base64 !!").await.unwrap_err();
        assert!(matches!(err, PilotError::Session(_)));
    }

    #[tokio::test]
    async fn test_closed_surface_refuses_work() {
        let mut s = surface();
        s.close().await.unwrap();
        assert!(s.readiness_check().await.is_err());
        assert!(s.invoke(&ActionSpec::Tap { count: 1 }).await.is_err());
    }
}
