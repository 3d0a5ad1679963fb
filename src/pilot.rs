//! Wires the serializer, lifecycle manager, snapshot coordinator and
//! mapper into one running system.
//!
//! ```text
//! StreamClient --> SessionLifecycle --> PilotHooks --> EventMapper --+
//!                        |                                          | normal
//!                        +-- on disconnect --+                      v
//!                                            v                Serializer --> S
//! SnapshotScheduler --> SnapshotCoordinator -+--- high ------------^
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{
    LifecycleHandle, LifecycleHooks, LifecycleStatus, ReconnectPolicy, SessionLifecycle,
};
use crate::mapper::{EventMapper, MapperRules};
use crate::serializer::{Serializer, SerializerStats};
use crate::session::SessionSurface;
use crate::settings::PilotSettings;
use crate::snapshot::{
    BackupStatus, BackupTarget, SchedulePolicy, SnapshotCoordinator, SnapshotPolicy,
    SnapshotRecord, SnapshotScheduler, SnapshotStore, Trigger,
};
use crate::stream::{StreamClient, StreamEvent};

/// Everything needed to start a [`Pilot`].
#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub reconnect: ReconnectPolicy,
    pub snapshot: SnapshotPolicy,
    pub schedule: SchedulePolicy,
    pub rules: MapperRules,
    pub snapshot_dir: PathBuf,
    pub restore_on_start: bool,
}

impl PilotConfig {
    pub fn from_settings(settings: &PilotSettings) -> Self {
        Self {
            reconnect: settings.reconnect.policy(),
            snapshot: settings.snapshot.policy(),
            schedule: settings.snapshot.schedule(),
            rules: settings.mapper.rules(),
            snapshot_dir: PathBuf::from(&settings.snapshot.dir),
            restore_on_start: settings.snapshot.restore_on_start,
        }
    }
}

/// Operator-facing view of the whole system.
#[derive(Debug, Clone, Serialize)]
pub struct PilotStatus {
    pub connection: LifecycleStatus,
    pub queue: SerializerStats,
    pub backup_in_progress: bool,
    pub last_snapshot: Option<SnapshotRecord>,
}

/// Routes lifecycle callbacks to the mapper and the snapshot coordinator.
struct PilotHooks<S> {
    mapper: EventMapper<S>,
    snapshots: Arc<SnapshotCoordinator<S>>,
}

#[async_trait]
impl<S: SessionSurface> LifecycleHooks for PilotHooks<S> {
    fn on_event(&self, event: StreamEvent) {
        self.mapper.handle(event);
    }

    async fn on_disconnected(&self) {
        // Best-effort: the status is logged by the coordinator
        self.snapshots.run(Trigger::Disconnect).await;
    }
}

/// A running system. Dropping it without [`Pilot::shutdown`] skips the
/// final snapshot.
pub struct Pilot<S> {
    serializer: Serializer<S>,
    snapshots: Arc<SnapshotCoordinator<S>>,
    lifecycle: LifecycleHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: SessionSurface> Pilot<S> {
    /// Take ownership of the session, restore the newest snapshot if asked
    /// to, then start the lifecycle manager and the snapshot timer.
    pub async fn start(config: PilotConfig, surface: S, client: Arc<dyn StreamClient>) -> Self {
        let shutdown = CancellationToken::new();
        let serializer = Serializer::spawn(surface);
        let snapshots = Arc::new(
            SnapshotCoordinator::new(
                serializer.clone(),
                SnapshotStore::new(&config.snapshot_dir),
                config.snapshot,
            )
            .with_shutdown(shutdown.clone()),
        );

        if config.restore_on_start {
            match snapshots.restore_latest().await {
                Ok(Some(path)) => tracing::info!("[pilot] resumed from {}", path.display()),
                Ok(None) => tracing::info!("[pilot] no snapshot found, starting fresh"),
                Err(e) => tracing::warn!("[pilot] restore failed, starting fresh: {}", e),
            }
        }

        let hooks = Arc::new(PilotHooks {
            mapper: EventMapper::new(config.rules, serializer.clone(), Arc::clone(&snapshots)),
            snapshots: Arc::clone(&snapshots),
        });

        let lifecycle = SessionLifecycle::new(client, hooks, config.reconnect);
        let handle = lifecycle.handle();
        let scheduler = SnapshotScheduler::new(
            Arc::clone(&snapshots) as Arc<dyn BackupTarget>,
            config.schedule,
        );

        let tasks = vec![
            tokio::spawn(lifecycle.run(shutdown.clone())),
            tokio::spawn(scheduler.run(shutdown.clone())),
        ];

        tracing::info!("[pilot] started");

        Self {
            serializer,
            snapshots,
            lifecycle: handle,
            shutdown,
            tasks,
        }
    }

    /// Manual snapshot, as requested by the operator.
    pub async fn backup_now(&self) -> BackupStatus {
        self.snapshots.manual().await
    }

    pub fn status(&self) -> PilotStatus {
        PilotStatus {
            connection: self.lifecycle.status(),
            queue: self.serializer.stats(),
            backup_in_progress: self.snapshots.is_in_progress(),
            last_snapshot: self.snapshots.last_record(),
        }
    }

    /// Cancel the background loops, take a final snapshot, stop the
    /// serializer and release the session.
    ///
    /// A backup still in flight (for example one requested by a stream
    /// command) is waited out first; the final snapshot is always attempted
    /// while the serializer still accepts work. Returns its outcome.
    pub async fn shutdown(self) -> BackupStatus {
        tracing::info!("[pilot] shutting down");
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("[pilot] background task failed: {}", e);
            }
        }

        let final_snapshot = self.snapshots.final_snapshot().await;

        match self.serializer.shutdown().await {
            Some(mut session) => {
                if let Err(e) = session.close().await {
                    tracing::warn!("[pilot] failed to close session: {}", e);
                }
            }
            None => tracing::warn!("[pilot] session was already released"),
        }

        tracing::info!("[pilot] stopped");
        final_snapshot
    }
}
