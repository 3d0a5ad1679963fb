//! CLI module for headless livepilot operation.
//!
//! Builds the pilot from settings and command-line overrides, then keeps
//! it running behind a small operator console.
//!
//! ```text
//! +-----------+     +--------------+     +----------------+
//! | args.rs   | --> | bootstrap.rs | --> | runner.rs      |
//! | (clap)    |     | (Pilot)      |     | (console/^C)   |
//! +-----------+     +--------------+     +----------------+
//! ```
//!
//! # Console
//!
//! When stdin is a terminal the operator can request a backup, inspect
//! status or read settings. See `console.rs` for details.

mod args;
mod bootstrap;
mod console;
mod runner;

pub use args::Args;
pub use bootstrap::{initialize, CliContext};
pub use console::{format_status, run_console, ConsoleCommand};
pub use runner::run;
