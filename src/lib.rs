//! livepilot drives a single automated session from a live event stream.
//!
//! Stream events are mapped to session actions, every session call goes
//! through one [`Serializer`], and the session state is snapshotted to
//! disk on a schedule, on request, on stream loss and at shutdown.

pub mod error;
pub mod lifecycle;
pub mod mapper;
pub mod pilot;
pub mod serializer;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod stream;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test_support;

pub use error::{PilotError, Result};
pub use lifecycle::{ConnectionState, ReconnectPolicy, SessionLifecycle};
pub use mapper::{EventMapper, MapperRules};
pub use pilot::{Pilot, PilotConfig, PilotStatus};
pub use serializer::{Priority, Serializer};
pub use session::{ActionSpec, SessionSurface};
pub use snapshot::{BackupStatus, SnapshotCoordinator, SnapshotScheduler, SnapshotStore};
pub use stream::{StreamClient, StreamEvent};
