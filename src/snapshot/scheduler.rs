//! Periodic snapshot timer.
//!
//! The next run is due `period` after the last successful snapshot (or after
//! start-up if there was none yet). A manual snapshot therefore pushes the
//! schedule back. A failed or skipped run retries after `failure_delay`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coordinator::{BackupStatus, SnapshotCoordinator};
use crate::lifecycle::wait_or_cancel;
use crate::session::SessionSurface;

/// Something the scheduler can back up.
#[async_trait]
pub trait BackupTarget: Send + Sync + 'static {
    async fn scheduled_backup(&self) -> BackupStatus;

    fn last_success(&self) -> Option<Instant>;
}

#[async_trait]
impl<S: SessionSurface> BackupTarget for SnapshotCoordinator<S> {
    async fn scheduled_backup(&self) -> BackupStatus {
        self.scheduled().await
    }

    fn last_success(&self) -> Option<Instant> {
        SnapshotCoordinator::last_success(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub period: Duration,
    pub failure_delay: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60 * 60),
            failure_delay: Duration::from_secs(5 * 60),
        }
    }
}

/// `period - elapsed`, or zero if the run is already due.
pub fn next_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

pub struct SnapshotScheduler {
    target: Arc<dyn BackupTarget>,
    policy: SchedulePolicy,
}

impl SnapshotScheduler {
    pub fn new(target: Arc<dyn BackupTarget>, policy: SchedulePolicy) -> Self {
        Self { target, policy }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let started = Instant::now();
        let period = self.policy.period;
        let mut delay = next_delay(period, Duration::ZERO);

        loop {
            tracing::info!(
                "[snapshot] next scheduled backup in {} minutes",
                delay.as_secs() / 60
            );
            if wait_or_cancel(delay, &shutdown).await {
                break;
            }

            // A manual snapshot may have moved the schedule while we slept
            let anchor = self.target.last_success().unwrap_or(started);
            let remaining = next_delay(period, anchor.elapsed());
            if !remaining.is_zero() {
                delay = remaining;
                continue;
            }

            delay = match self.target.scheduled_backup().await {
                BackupStatus::Saved(_) => period,
                BackupStatus::InProgress | BackupStatus::Failed(_) => self.policy.failure_delay,
            };
        }

        tracing::debug!("[snapshot] scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotRecord;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Answers scheduled backups from a script; defaults to success.
    struct FakeTarget {
        script: Mutex<VecDeque<bool>>,
        runs: Mutex<Vec<Instant>>,
        last_success: Mutex<Option<Instant>>,
    }

    impl FakeTarget {
        fn new(script: Vec<bool>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                runs: Mutex::new(Vec::new()),
                last_success: Mutex::new(None),
            })
        }

        fn runs(&self) -> usize {
            self.runs.lock().len()
        }

        fn mark_manual_success(&self) {
            *self.last_success.lock() = Some(Instant::now());
        }
    }

    #[async_trait]
    impl BackupTarget for FakeTarget {
        async fn scheduled_backup(&self) -> BackupStatus {
            self.runs.lock().push(Instant::now());
            let ok = self.script.lock().pop_front().unwrap_or(true);
            if ok {
                *self.last_success.lock() = Some(Instant::now());
                BackupStatus::Saved(SnapshotRecord {
                    path: PathBuf::from("save.txt"),
                    taken_at: chrono::Utc::now(),
                    bytes: 1,
                })
            } else {
                BackupStatus::Failed("export button missing".to_string())
            }
        }

        fn last_success(&self) -> Option<Instant> {
            *self.last_success.lock()
        }
    }

    fn policy() -> SchedulePolicy {
        SchedulePolicy {
            period: Duration::from_secs(60),
            failure_delay: Duration::from_secs(10),
        }
    }

    fn spawn(target: Arc<FakeTarget>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let shutdown = CancellationToken::new();
        let scheduler = SnapshotScheduler::new(target, policy());
        let task = tokio::spawn(scheduler.run(shutdown.clone()));
        (shutdown, task)
    }

    #[test]
    fn test_next_delay() {
        let hour = Duration::from_secs(3600);
        assert_eq!(next_delay(hour, Duration::from_secs(600)), Duration::from_secs(3000));
        assert_eq!(next_delay(hour, Duration::from_secs(4000)), Duration::ZERO);
        assert_eq!(next_delay(hour, hour), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_period() {
        let target = FakeTarget::new(Vec::new());
        let (shutdown, task) = spawn(target.clone());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(target.runs(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.runs(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.runs(), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_after_short_delay() {
        let target = FakeTarget::new(vec![false]);
        let (shutdown, task) = spawn(target.clone());

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(target.runs(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(target.runs(), 2);

        // Back on the full period after the retry succeeded
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(target.runs(), 2);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(target.runs(), 3);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_success_pushes_schedule_back() {
        let target = FakeTarget::new(Vec::new());
        let (shutdown, task) = spawn(target.clone());

        tokio::time::sleep(Duration::from_secs(40)).await;
        target.mark_manual_success();

        // Would have run at 60; now due at 100
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(target.runs(), 0);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(target.runs(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_timer() {
        let target = FakeTarget::new(Vec::new());
        let (shutdown, task) = spawn(target.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        shutdown.cancel();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(target.runs(), 0);
    }
}
