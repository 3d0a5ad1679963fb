//! Stream client that replays a JSON-lines file of events.
//!
//! Each non-empty line that does not start with `#` is one [`StreamEvent`].
//! Events are fed with a fixed interval; when the file is exhausted the
//! stream ends with `stream_ended`, which drives the reconnect path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ConnectError, Connection, StreamClient, StreamEvent, StreamInfo, Subscription};

/// Configuration for [`ReplayStreamClient`].
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// JSON-lines file of events
    pub path: PathBuf,

    /// Room id reported on connect
    pub room_id: String,

    /// Pause between events
    pub interval: Duration,

    /// Replay the file again on every reconnect
    pub repeat: bool,
}

pub struct ReplayStreamClient {
    config: ReplayConfig,
    passes: AtomicU32,
    current: Mutex<Option<CancellationToken>>,
}

impl ReplayStreamClient {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            passes: AtomicU32::new(0),
            current: Mutex::new(None),
        }
    }

    /// Number of times the file has been replayed.
    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::SeqCst)
    }
}

/// Parse replay file contents, skipping blanks, comments and bad lines.
pub fn parse_replay(contents: &str) -> Vec<StreamEvent> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|(lineno, line)| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("[replay] skipping line {}: {}", lineno, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl StreamClient for ReplayStreamClient {
    async fn connect(&self) -> Result<Connection, ConnectError> {
        if !self.config.repeat && self.passes() > 0 {
            return Err(ConnectError::Failed("replay exhausted".to_string()));
        }

        let contents = tokio::fs::read_to_string(&self.config.path)
            .await
            .map_err(|e| {
                ConnectError::Failed(format!(
                    "cannot read {}: {}",
                    self.config.path.display(),
                    e
                ))
            })?;
        let events = parse_replay(&contents);

        if self.config.room_id.is_empty() {
            return Err(ConnectError::MissingRoom);
        }

        self.passes.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let interval = self.config.interval;
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::StreamEnded).await;
        });

        Ok(Connection {
            info: StreamInfo {
                room_id: self.config.room_id.clone(),
            },
            subscription: Subscription::new(rx),
        })
    }

    async fn disconnect(&self) {
        if let Some(cancel) = self.current.lock().take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
# warm-up
{"type": "engagement", "user": "ana", "count": 12}
{"type": "command", "user": "bo", "text": "up2"}
not json at all
{"type": "gift", "gift_id": "5655", "repeat_count": 3, "repeat_end": true}
"#;

    fn client(dir: &TempDir, repeat: bool) -> ReplayStreamClient {
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, SAMPLE).unwrap();
        ReplayStreamClient::new(ReplayConfig {
            path,
            room_id: "room-1".to_string(),
            interval: Duration::ZERO,
            repeat,
        })
    }

    #[test]
    fn test_parse_replay_skips_comments_and_garbage() {
        let events = parse_replay(SAMPLE);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].name(), "command");
    }

    #[tokio::test]
    async fn test_replay_ends_with_stream_ended() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, false);

        let mut conn = client.connect().await.unwrap();
        assert_eq!(conn.info.room_id, "room-1");

        let mut names = Vec::new();
        while let Some(event) = conn.subscription.next().await {
            names.push(event.name());
            if event == StreamEvent::StreamEnded {
                break;
            }
        }
        assert_eq!(names, vec!["engagement", "command", "gift", "stream_ended"]);
    }

    #[tokio::test]
    async fn test_replay_without_repeat_fails_second_connect() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, false);

        let _first = client.connect().await.unwrap();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Failed(_)));
        assert_eq!(client.passes(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_connect_failure() {
        let client = ReplayStreamClient::new(ReplayConfig {
            path: PathBuf::from("/nonexistent/events.jsonl"),
            room_id: "room-1".to_string(),
            interval: Duration::ZERO,
            repeat: true,
        });
        assert!(matches!(
            client.connect().await,
            Err(ConnectError::Failed(_))
        ));
    }
}
