//! Operator console.
//!
//! Reads commands from stdin while the pilot runs:
//! - `backup` (or the configured backup command) - take a manual snapshot
//! - `status` - connection, queue and snapshot state
//! - `get <key>` - read a setting by dotted key
//! - `quit`, `exit` - stop

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::pilot::PilotStatus;
use crate::snapshot::BackupStatus;

use super::bootstrap::CliContext;

/// Console command variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Take a manual snapshot
    Backup,
    /// Print the current status
    Status,
    /// Print a setting
    Get(String),
    /// Show usage
    Help,
    /// Stop the pilot
    Quit,
    /// Unknown command (will show help)
    Unknown(String),
    /// Empty input (skip)
    Empty,
}

impl ConsoleCommand {
    /// Parse operator input. `backup_command` is accepted as an alias for
    /// `backup`.
    pub fn parse(input: &str, backup_command: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ConsoleCommand::Empty;
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };

        match word.to_lowercase().as_str() {
            "backup" if rest.is_empty() => ConsoleCommand::Backup,
            "status" if rest.is_empty() => ConsoleCommand::Status,
            "get" if !rest.is_empty() => ConsoleCommand::Get(rest.to_string()),
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            _ if trimmed.eq_ignore_ascii_case(backup_command) => ConsoleCommand::Backup,
            _ => ConsoleCommand::Unknown(trimmed.to_string()),
        }
    }
}

fn print_usage() {
    eprintln!("Available: backup, status, get <key>, quit");
}

/// Render a status for the console.
pub fn format_status(status: &PilotStatus) -> String {
    let connection = &status.connection;
    let mut lines = vec![
        format!("connection: {}", connection.state),
        format!(
            "room:       {}",
            connection.room_id.as_deref().unwrap_or("-")
        ),
        format!(
            "attempts:   {} ({} connects)",
            connection.attempts, connection.connects
        ),
        format!(
            "queue:      {} high, {} normal{}",
            status.queue.queued_high,
            status.queue.queued_normal,
            if status.queue.busy { ", busy" } else { "" }
        ),
        format!(
            "backup:     {}",
            if status.backup_in_progress {
                "in progress"
            } else {
                "idle"
            }
        ),
    ];

    match &status.last_snapshot {
        Some(record) => lines.push(format!(
            "last save:  {} ({})",
            record.path.display(),
            record.taken_at.to_rfc3339()
        )),
        None => lines.push("last save:  -".to_string()),
    }
    if let Some(error) = &connection.last_error {
        lines.push(format!("last error: {}", error));
    }

    lines.join("\n")
}

/// Run the interactive console.
///
/// Returns when the operator quits or on EOF (Ctrl+D).
pub async fn run_console(ctx: &CliContext) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let backup_command = ctx.settings.mapper.backup_command.clone();

    eprintln!("livepilot console");
    eprintln!("Type help for commands, quit to exit\n");

    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line, &backup_command) {
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => print_usage(),
            ConsoleCommand::Unknown(cmd) => {
                eprintln!("Unknown command: {}", cmd);
                print_usage();
            }
            ConsoleCommand::Status => println!("{}", format_status(&ctx.pilot.status())),
            ConsoleCommand::Get(key) => match ctx.settings_manager.get_value(&key).await {
                Ok(value) => println!("{} = {}", key, value),
                Err(e) => eprintln!("Error: {}", e),
            },
            ConsoleCommand::Backup => match ctx.pilot.backup_now().await {
                BackupStatus::Saved(record) => println!("Saved {}", record.path.display()),
                BackupStatus::InProgress => println!("A backup is already in progress"),
                BackupStatus::Failed(reason) => eprintln!("Backup failed: {}", reason),
            },
        }
    }

    Ok(())
}
