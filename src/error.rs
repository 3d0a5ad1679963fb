use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    /// The session surface rejected or failed an operation.
    #[error("Session error: {0}")]
    Session(String),

    /// A selector or readiness probe did not resolve in time. Retried locally.
    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Action panicked: {0}")]
    ActionPanicked(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Backup already in progress")]
    BackupInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PilotError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PilotError::NotReady(_)
                | PilotError::Session(_)
                | PilotError::Snapshot(_)
                | PilotError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;
