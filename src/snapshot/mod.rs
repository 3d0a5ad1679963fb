//! Snapshot extraction, persistence and scheduling.

pub mod coordinator;
pub mod scheduler;
pub mod store;

pub use coordinator::{BackupStatus, SnapshotCoordinator, SnapshotPolicy, Trigger};
pub use scheduler::{next_delay, BackupTarget, SchedulePolicy, SnapshotScheduler};
pub use store::{SnapshotRecord, SnapshotStore};
