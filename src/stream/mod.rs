//! Live event stream interface.
//!
//! The transport and wire decoding belong to an external client; the core
//! sees typed [`StreamEvent`]s delivered through a [`Subscription`], in the
//! order the client received them.

pub mod replay;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use replay::ReplayStreamClient;

/// Events delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Repeated engagement (e.g. likes), `count` units at once
    Engagement {
        #[serde(default)]
        user: String,
        count: u32,
    },

    /// Free-text command (e.g. a chat message)
    Command {
        #[serde(default)]
        user: String,
        text: String,
    },

    /// Aggregated, possibly streaked gift
    Gift(GiftEvent),

    /// The stream reported loss of connection
    StreamEnded,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Engagement { .. } => "engagement",
            StreamEvent::Command { .. } => "command",
            StreamEvent::Gift(_) => "gift",
            StreamEvent::StreamEnded => "stream_ended",
        }
    }
}

fn default_repeat() -> u32 {
    1
}

fn default_streakable() -> bool {
    true
}

/// A gift as reported by the stream, possibly one step of a streak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftEvent {
    pub gift_id: String,

    #[serde(default)]
    pub gift_name: String,

    #[serde(default)]
    pub user: String,

    /// Running repeat count of the streak
    #[serde(default = "default_repeat")]
    pub repeat_count: u32,

    /// Whether the streak has concluded
    #[serde(default)]
    pub repeat_end: bool,

    /// Non-streakable gifts are final as soon as they arrive
    #[serde(default = "default_streakable")]
    pub streakable: bool,
}

/// Details reported by a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub room_id: String,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server asked us to slow down
    #[error("Rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Connect timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Connected but no room id was reported")]
    MissingRoom,

    #[error("Connect failed: {0}")]
    Failed(String),
}

/// An explicit event subscription for one connection.
///
/// Each successful connect produces a fresh subscription. The lifecycle
/// manager closes the previous one before connecting again.
pub struct Subscription {
    id: Uuid,
    events: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the client side is gone.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Stop receiving. The client's sender observes the closed channel.
    pub fn close(&mut self) {
        self.events.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A live connection: what the server told us plus the event feed.
#[derive(Debug)]
pub struct Connection {
    pub info: StreamInfo,
    pub subscription: Subscription,
}

/// Client for the external live event stream.
#[async_trait]
pub trait StreamClient: Send + Sync + 'static {
    /// Open a connection. The caller applies the connect timeout.
    ///
    /// # Errors
    /// `ConnectError::RateLimited` when the server supplies a retry-after
    /// hint; any other variant is a plain failure.
    async fn connect(&self) -> Result<Connection, ConnectError>;

    /// Drop the current connection, if any.
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gift_event_defaults() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type": "gift", "gift_id": "5655"}"#).unwrap();
        match event {
            StreamEvent::Gift(gift) => {
                assert_eq!(gift.repeat_count, 1);
                assert!(!gift.repeat_end);
                assert!(gift.streakable);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_tags() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type": "engagement", "user": "ana", "count": 15}"#)
                .unwrap();
        assert_eq!(event.name(), "engagement");

        let ended: StreamEvent = serde_json::from_str(r#"{"type": "stream_ended"}"#).unwrap();
        assert_eq!(ended, StreamEvent::StreamEnded);
    }

    #[tokio::test]
    async fn test_subscription_close_is_seen_by_sender() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = Subscription::new(rx);
        tx.send(StreamEvent::StreamEnded).await.unwrap();
        assert_eq!(sub.next().await, Some(StreamEvent::StreamEnded));

        sub.close();
        assert!(tx.is_closed());
    }

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::RateLimited {
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 12s");
    }
}
