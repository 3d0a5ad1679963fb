//! Text command recognition.

use serde::Serialize;

use crate::session::ActionSpec;

/// A recognised text command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Command {
    /// Take a manual snapshot
    Backup,
    /// Activate the first enabled slot (`up`)
    FirstSlot,
    /// Activate slot n, 1-based (`up3`)
    Slot(usize),
    /// Activate a named target, canonical spelling
    Target(String),
}

impl Command {
    /// Session action for this command; `Backup` has none.
    pub fn action(&self) -> Option<ActionSpec> {
        match self {
            Command::Backup => None,
            Command::FirstSlot => Some(ActionSpec::FirstSlot),
            Command::Slot(index) => Some(ActionSpec::Slot { index: *index }),
            Command::Target(name) => Some(ActionSpec::Target { name: name.clone() }),
        }
    }
}

/// Closed command vocabulary. Anything it does not recognise is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    backup: String,
    slot_prefix: String,
    max_slot: usize,
    targets: Vec<String>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new(
            "!backup",
            "up",
            10,
            ["Cursor", "Grandma", "Farm", "Mine", "Factory", "Bank"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl CommandTable {
    pub fn new(
        backup: impl Into<String>,
        slot_prefix: impl Into<String>,
        max_slot: usize,
        targets: Vec<String>,
    ) -> Self {
        Self {
            backup: backup.into().trim().to_lowercase(),
            slot_prefix: slot_prefix.into().trim().to_lowercase(),
            max_slot,
            targets,
        }
    }

    pub fn backup_command(&self) -> &str {
        &self.backup
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Match a message against the table. First match wins:
    /// backup, bare slot prefix, prefix plus slot number, target name.
    /// Matching is case-insensitive on the whole trimmed text.
    pub fn parse(&self, text: &str) -> Option<Command> {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        if !self.backup.is_empty() && text == self.backup {
            return Some(Command::Backup);
        }

        if !self.slot_prefix.is_empty() {
            if let Some(rest) = text.strip_prefix(&self.slot_prefix) {
                if rest.is_empty() {
                    return Some(Command::FirstSlot);
                }
                if rest.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(n) = rest.parse::<usize>() {
                        if (1..=self.max_slot).contains(&n) {
                            return Some(Command::Slot(n));
                        }
                    }
                }
            }
        }

        self.targets
            .iter()
            .find(|t| t.to_lowercase() == text)
            .map(|t| Command::Target(t.clone()))
    }
}
