//! Single-flight, retrying snapshot extraction.
//!
//! Every extraction attempt is a high-priority serializer submission, so it
//! runs as soon as the current action finishes. The backup lock is held for
//! the whole retry loop: a second request while one is in flight is told
//! "backup in progress" instead of queuing a duplicate.
//!
//! Retry pauses end early once the process shutdown token fires. The final
//! [`SnapshotCoordinator::final_snapshot`] waits for any in-flight backup to
//! release the lock and then always attempts its own extraction.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::store::{SnapshotRecord, SnapshotStore};
use crate::error::{PilotError, Result};
use crate::lifecycle::wait_or_cancel;
use crate::serializer::{Priority, Serializer};
use crate::session::SessionSurface;

/// What asked for the snapshot. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
    Disconnect,
    Shutdown,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
            Trigger::Disconnect => "disconnect",
            Trigger::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Outcome of a snapshot request. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Saved(SnapshotRecord),
    InProgress,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Extraction attempts per request
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Reload the surface before each retry
    pub refresh_between_retries: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            refresh_between_retries: true,
        }
    }
}

/// Releases the backup lock when dropped and wakes [`SnapshotCoordinator::wait_idle`].
struct BackupGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for BackupGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

pub struct SnapshotCoordinator<S> {
    serializer: Serializer<S>,
    store: SnapshotStore,
    policy: SnapshotPolicy,
    in_flight: AtomicBool,
    idle: Notify,
    shutdown: CancellationToken,
    last_success: Mutex<Option<Instant>>,
    last_record: Mutex<Option<SnapshotRecord>>,
}

impl<S: SessionSurface> SnapshotCoordinator<S> {
    pub fn new(serializer: Serializer<S>, store: SnapshotStore, policy: SnapshotPolicy) -> Self {
        Self {
            serializer,
            store,
            policy,
            in_flight: AtomicBool::new(false),
            idle: Notify::new(),
            shutdown: CancellationToken::new(),
            last_success: Mutex::new(None),
            last_record: Mutex::new(None),
        }
    }

    /// Cut retry pauses short once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// True while an extraction holds the backup lock.
    pub fn is_in_progress(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// When the last snapshot was saved by this process.
    pub fn last_success(&self) -> Option<Instant> {
        *self.last_success.lock()
    }

    pub fn last_record(&self) -> Option<SnapshotRecord> {
        self.last_record.lock().clone()
    }

    fn try_lock(&self) -> Option<BackupGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BackupGuard {
                flag: &self.in_flight,
                idle: &self.idle,
            })
    }

    /// Resolve once no extraction holds the backup lock.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a release in between is not missed
            let released = self.idle.notified();
            if !self.is_in_progress() {
                return;
            }
            released.await;
        }
    }

    /// Extract and persist one snapshot.
    ///
    /// # Errors
    /// `BackupInProgress` if another extraction holds the lock; otherwise
    /// the last attempt's error once retries are exhausted.
    pub async fn extract(&self, trigger: Trigger) -> Result<SnapshotRecord> {
        let _guard = self.try_lock().ok_or(PilotError::BackupInProgress)?;

        let attempts = self.policy.max_retries.max(1);
        tracing::info!("[snapshot] {} backup started", trigger);

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.attempt(attempt > 1).await {
                Ok(record) => {
                    tracing::info!(
                        "[snapshot] {} backup saved to {} ({} bytes)",
                        trigger,
                        record.path.display(),
                        record.bytes
                    );
                    *self.last_success.lock() = Some(Instant::now());
                    *self.last_record.lock() = Some(record.clone());
                    return Ok(record);
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!("[snapshot] {} backup aborted: {}", trigger, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "[snapshot] attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts && self.pause_before_retry(trigger).await {
                        tracing::info!("[snapshot] {} backup interrupted by shutdown", trigger);
                        return Err(PilotError::ShuttingDown);
                    }
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(PilotError::Snapshot(format!(
            "gave up after {} attempts: {}",
            attempts, reason
        )))
    }

    /// Returns `true` if shutdown interrupted the pause.
    async fn pause_before_retry(&self, trigger: Trigger) -> bool {
        if trigger == Trigger::Shutdown {
            // Runs after cancellation; bounded by the retry policy alone
            tokio::time::sleep(self.policy.retry_delay).await;
            false
        } else {
            wait_or_cancel(self.policy.retry_delay, &self.shutdown).await
        }
    }

    async fn attempt(&self, is_retry: bool) -> Result<SnapshotRecord> {
        let refresh = is_retry && self.policy.refresh_between_retries;

        let payload = self
            .serializer
            .submit(Priority::High, move |session: &mut S| {
                async move {
                    if refresh {
                        session.refresh().await?;
                    }
                    session.readiness_check().await?;
                    let payload = session.export_state().await?;
                    if payload.is_empty() {
                        return Err(PilotError::Snapshot(
                            "exported payload is empty".to_string(),
                        ));
                    }
                    Ok(payload)
                }
                .boxed()
            })
            .await?;

        self.store.write(&payload).await
    }

    /// Extract, downgrading every failure to a reported status.
    pub async fn run(&self, trigger: Trigger) -> BackupStatus {
        match self.extract(trigger).await {
            Ok(record) => BackupStatus::Saved(record),
            Err(PilotError::BackupInProgress) => {
                tracing::info!("[snapshot] {} backup skipped: already in progress", trigger);
                BackupStatus::InProgress
            }
            Err(e) => {
                tracing::error!("[snapshot] {} backup failed: {}", trigger, e);
                BackupStatus::Failed(e.to_string())
            }
        }
    }

    pub async fn scheduled(&self) -> BackupStatus {
        self.run(Trigger::Scheduled).await
    }

    pub async fn manual(&self) -> BackupStatus {
        self.run(Trigger::Manual).await
    }

    /// Snapshot taken at shutdown, before the session is released.
    ///
    /// An in-flight backup is waited out rather than reported as
    /// `InProgress`, so this never returns `InProgress`.
    pub async fn final_snapshot(&self) -> BackupStatus {
        loop {
            self.wait_idle().await;
            match self.run(Trigger::Shutdown).await {
                BackupStatus::InProgress => continue,
                status => return status,
            }
        }
    }

    /// Import the most recent snapshot into the session.
    ///
    /// Returns the restored file, or `None` if there is nothing to restore.
    pub async fn restore_latest(&self) -> Result<Option<PathBuf>> {
        let Some((path, payload)) = self.store.load_latest().await? else {
            return Ok(None);
        };

        self.serializer
            .submit(Priority::High, move |session: &mut S| {
                async move {
                    session.readiness_check().await?;
                    session.import_state(&payload).await
                }
                .boxed()
            })
            .await?;

        tracing::info!("[snapshot] restored {}", path.display());
        Ok(Some(path))
    }
}
