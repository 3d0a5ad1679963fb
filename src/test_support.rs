//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{PilotError, Result};
use crate::lifecycle::LifecycleHooks;
use crate::session::{ActionSpec, SessionSurface};
use crate::stream::{ConnectError, Connection, StreamClient, StreamEvent, StreamInfo, Subscription};

/// What a [`RecordingSurface`] saw.
#[derive(Debug, Default)]
pub struct SurfaceRecord {
    pub actions: Vec<ActionSpec>,
    pub exports: usize,
    pub imports: Vec<Vec<u8>>,
    pub refreshes: usize,
    pub closed: bool,
}

/// Scripted outcome of one `export_state` call.
#[derive(Debug, Clone)]
pub enum ExportStep {
    Payload(Vec<u8>),
    Empty,
    NotReady,
}

/// Session surface that records everything it is asked to do.
///
/// Exports follow the script, then default to `state-<n>`.
pub struct RecordingSurface {
    record: Arc<Mutex<SurfaceRecord>>,
    exports: VecDeque<ExportStep>,
    export_delay: Duration,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(SurfaceRecord::default())),
            exports: VecDeque::new(),
            export_delay: Duration::ZERO,
        }
    }

    pub fn with_exports(mut self, steps: Vec<ExportStep>) -> Self {
        self.exports = steps.into();
        self
    }

    pub fn with_export_delay(mut self, delay: Duration) -> Self {
        self.export_delay = delay;
        self
    }

    pub fn record(&self) -> Arc<Mutex<SurfaceRecord>> {
        Arc::clone(&self.record)
    }
}

#[async_trait]
impl SessionSurface for RecordingSurface {
    async fn readiness_check(&mut self) -> Result<()> {
        Ok(())
    }

    async fn invoke(&mut self, action: &ActionSpec) -> Result<()> {
        self.record.lock().actions.push(action.clone());
        Ok(())
    }

    async fn export_state(&mut self) -> Result<Vec<u8>> {
        if !self.export_delay.is_zero() {
            tokio::time::sleep(self.export_delay).await;
        }
        let n = {
            let mut record = self.record.lock();
            record.exports += 1;
            record.exports
        };
        match self.exports.pop_front() {
            Some(ExportStep::Payload(bytes)) => Ok(bytes),
            Some(ExportStep::Empty) => Ok(Vec::new()),
            Some(ExportStep::NotReady) => {
                Err(PilotError::NotReady("export button not found".to_string()))
            }
            None => Ok(format!("state-{}", n).into_bytes()),
        }
    }

    async fn import_state(&mut self, payload: &[u8]) -> Result<()> {
        self.record.lock().imports.push(payload.to_vec());
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.record.lock().refreshes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.record.lock().closed = true;
        Ok(())
    }
}

/// One scripted reply to `connect`.
pub enum ScriptStep {
    Connect(String, mpsc::Receiver<StreamEvent>),
    RateLimited(Duration),
    Fail(String),
    /// Never resolves; exercises the connect timeout
    Hang,
}

/// Stream client that answers connects from a script, then fails.
pub struct ScriptedClient {
    script: Mutex<VecDeque<ScriptStep>>,
    connects: Mutex<Vec<Instant>>,
    disconnects: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamClient for ScriptedClient {
    async fn connect(&self) -> std::result::Result<Connection, ConnectError> {
        self.connects.lock().push(Instant::now());
        let step = self.script.lock().pop_front();

        match step {
            Some(ScriptStep::Connect(room_id, events)) => Ok(Connection {
                info: StreamInfo { room_id },
                subscription: Subscription::new(events),
            }),
            Some(ScriptStep::RateLimited(retry_after)) => {
                Err(ConnectError::RateLimited { retry_after })
            }
            Some(ScriptStep::Fail(reason)) => Err(ConnectError::Failed(reason)),
            Some(ScriptStep::Hang) => futures::future::pending().await,
            None => Err(ConnectError::Failed("script exhausted".to_string())),
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lifecycle hooks that only remember what happened.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<StreamEvent>>,
    disconnects: AtomicUsize,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LifecycleHooks for RecordingHooks {
    fn on_event(&self, event: StreamEvent) {
        self.events.lock().push(event);
    }

    async fn on_disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
