//! Stream session lifecycle: connect, serve, reconnect.
//!
//! ```text
//!                 +-------------- failure ---------------+
//!                 v                                      |
//! Disconnected -> Connecting -> Connected -> Disconnected (stream lost)
//!                 ^    |                         |
//!                 |    +-> BackingOff --+        +-> snapshot, then Connecting
//!                 +---------------------+
//! ```
//!
//! There is no terminal state: the manager retries until shutdown. Plain
//! failures count towards `max_attempts` with capped exponential backoff;
//! once the limit is hit a single cool-down runs, then the counter resets.
//! Rate-limit failures wait out the server's hint without counting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::stream::{ConnectError, Connection, StreamClient, StreamEvent};

/// Connection state of the stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::BackingOff => "backing_off",
        };
        f.write_str(s)
    }
}

/// Timing policy for (re)connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive plain failures before the cool-down kicks in
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for backoff delays
    pub max_delay: Duration,
    /// Upper bound for server-suggested retry-after waits
    pub rate_limit_cap: Duration,
    /// Wait after `max_attempts` failures before trying again
    pub cooldown: Duration,
    /// Minimum gap between two connect calls
    pub min_spacing: Duration,
    /// Bound on a single connect call
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_cap: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(5 * 60),
            min_spacing: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^(attempt-1), max_delay)`; attempt 0 is treated as 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What to do after a failed connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Honour the server's hint; the attempt counter is unchanged
    RateLimited(Duration),
    /// Wait, then try again
    Backoff(Duration),
    /// Attempts exhausted: wait the cool-down, reset, try once more
    CoolDown(Duration),
}

impl RetryDecision {
    pub fn delay(&self) -> Duration {
        match self {
            RetryDecision::RateLimited(d) | RetryDecision::Backoff(d) | RetryDecision::CoolDown(d) => *d,
        }
    }
}

/// Consecutive-failure bookkeeping, separate from timing so it can be
/// checked without a runtime.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn on_failure(&mut self, error: &ConnectError) -> RetryDecision {
        if let ConnectError::RateLimited { retry_after } = error {
            return RetryDecision::RateLimited((*retry_after).min(self.policy.rate_limit_cap));
        }

        self.attempts = self.attempts.saturating_add(1);
        if self.attempts < self.policy.max_attempts {
            RetryDecision::Backoff(self.policy.backoff(self.attempts))
        } else {
            RetryDecision::CoolDown(self.policy.cooldown)
        }
    }
}

/// Observable state of the lifecycle manager.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts
    pub attempts: u32,
    /// Room of the current connection
    pub room_id: Option<String>,
    /// Total connect calls issued
    pub connects: u64,
    pub last_error: Option<String>,
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            room_id: None,
            connects: 0,
            last_error: None,
        }
    }
}

/// Read-only view onto a running [`SessionLifecycle`].
#[derive(Clone, Default)]
pub struct LifecycleHandle {
    status: Arc<RwLock<LifecycleStatus>>,
}

impl LifecycleHandle {
    pub fn status(&self) -> LifecycleStatus {
        self.status.read().clone()
    }
}

/// Callbacks from the lifecycle manager into the rest of the system.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Called for every event of the current subscription, in arrival order.
    fn on_event(&self, event: StreamEvent);

    /// Called after the stream was lost, before reconnecting. Must not fail;
    /// the reconnect proceeds regardless of what happens here.
    async fn on_disconnected(&self);
}

/// Sleep for `delay` unless shutdown fires first. Returns `true` if cancelled.
pub(crate) async fn wait_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

enum ServeExit {
    StreamLost,
    Shutdown,
}

/// Owns the connect/reconnect state machine for the event stream.
pub struct SessionLifecycle {
    client: Arc<dyn StreamClient>,
    hooks: Arc<dyn LifecycleHooks>,
    policy: ReconnectPolicy,
    status: Arc<RwLock<LifecycleStatus>>,
}

impl SessionLifecycle {
    pub fn new(
        client: Arc<dyn StreamClient>,
        hooks: Arc<dyn LifecycleHooks>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            client,
            hooks,
            policy,
            status: Arc::new(RwLock::new(LifecycleStatus::default())),
        }
    }

    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            status: Arc::clone(&self.status),
        }
    }

    fn set_state(&self, state: ConnectionState, attempts: u32) {
        let mut status = self.status.write();
        status.state = state;
        status.attempts = attempts;
        if state != ConnectionState::Connected {
            status.room_id = None;
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tracker = ReconnectTracker::new(self.policy.clone());
        let mut last_attempt: Option<Instant> = None;

        tracing::info!("[lifecycle] started");

        loop {
            if let Some(previous) = last_attempt {
                let since = previous.elapsed();
                if since < self.policy.min_spacing
                    && wait_or_cancel(self.policy.min_spacing - since, &shutdown).await
                {
                    break;
                }
            }
            if shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting, tracker.attempts());
            self.status.write().connects += 1;
            last_attempt = Some(Instant::now());

            let timeout = self.policy.connect_timeout;
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = tokio::time::timeout(timeout, self.client.connect()) => {
                    outcome.unwrap_or(Err(ConnectError::Timeout(timeout)))
                }
            };

            let outcome = match outcome {
                Ok(mut connection) if connection.info.room_id.is_empty() => {
                    connection.subscription.close();
                    Err(ConnectError::MissingRoom)
                }
                other => other,
            };

            match outcome {
                Ok(connection) => {
                    tracker.reset();
                    self.status.write().last_error = None;

                    match self.serve(connection, &shutdown).await {
                        ServeExit::Shutdown => break,
                        ServeExit::StreamLost => {
                            tracing::warn!("[lifecycle] stream lost, reconnecting");
                            self.set_state(ConnectionState::Disconnected, 0);
                            self.hooks.on_disconnected().await;
                        }
                    }
                }
                Err(error) => {
                    let decision = tracker.on_failure(&error);
                    self.status.write().last_error = Some(error.to_string());
                    self.set_state(ConnectionState::BackingOff, tracker.attempts());

                    match decision {
                        RetryDecision::RateLimited(delay) => tracing::warn!(
                            "[lifecycle] {}; waiting {}s (attempt counter stays at {})",
                            error,
                            delay.as_secs(),
                            tracker.attempts()
                        ),
                        RetryDecision::Backoff(delay) => tracing::warn!(
                            "[lifecycle] {}; retrying in {}ms (attempt {}/{})",
                            error,
                            delay.as_millis(),
                            tracker.attempts(),
                            self.policy.max_attempts
                        ),
                        RetryDecision::CoolDown(delay) => tracing::error!(
                            "[lifecycle] {}; {} attempts failed, cooling down for {}s",
                            error,
                            tracker.attempts(),
                            delay.as_secs()
                        ),
                    }

                    if wait_or_cancel(decision.delay(), &shutdown).await {
                        break;
                    }

                    if matches!(decision, RetryDecision::CoolDown(_)) {
                        tracing::info!("[lifecycle] cool-down elapsed, resetting attempts");
                        tracker.reset();
                    }
                }
            }
        }

        self.client.disconnect().await;
        self.set_state(ConnectionState::Disconnected, tracker.attempts());
        tracing::info!("[lifecycle] stopped");
    }

    /// Pump events of one connection into the hooks until it ends.
    async fn serve(&self, connection: Connection, shutdown: &CancellationToken) -> ServeExit {
        let Connection {
            info,
            mut subscription,
        } = connection;

        {
            let mut status = self.status.write();
            status.state = ConnectionState::Connected;
            status.attempts = 0;
            status.room_id = Some(info.room_id.clone());
        }
        tracing::info!(
            "[lifecycle] connected to room {} (subscription {})",
            info.room_id,
            subscription.id()
        );

        let exit = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break ServeExit::Shutdown,
                event = subscription.next() => match event {
                    Some(StreamEvent::StreamEnded) | None => break ServeExit::StreamLost,
                    Some(event) => self.hooks.on_event(event),
                },
            }
        };

        subscription.close();
        if matches!(exit, ServeExit::StreamLost) {
            self.client.disconnect().await;
        }
        tracing::debug!("[lifecycle] subscription {} closed", subscription.id());
        exit
    }
}
