//! CLI execution runner.
//!
//! Keeps the pilot running until the operator quits the console or
//! sends Ctrl-C.

use anyhow::{Context, Result};

use super::bootstrap::CliContext;
use super::console::run_console;

/// Whether the interactive console should be offered.
fn console_enabled(no_console: bool, stdin_is_tty: bool) -> bool {
    !no_console && stdin_is_tty
}

/// Run until the operator stops the pilot.
///
/// The console only starts when stdin is a terminal. Otherwise (piped
/// input, service managers) the pilot runs until Ctrl-C.
pub async fn run(ctx: &CliContext) -> Result<()> {
    if console_enabled(ctx.args.no_console, atty::is(atty::Stream::Stdin)) {
        tokio::select! {
            result = run_console(ctx) => result,
            signal = tokio::signal::ctrl_c() => {
                eprintln!();
                signal.context("Failed to listen for Ctrl-C")
            }
        }
    } else {
        eprintln!("[cli] Running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_only_on_terminal() {
        assert!(console_enabled(false, true));
        assert!(!console_enabled(false, false));
        assert!(!console_enabled(true, true));
    }
}
