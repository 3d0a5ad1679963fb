//! Event-to-action mapping.
//!
//! Turns stream events into normal-priority serializer submissions:
//!
//! - engagement of N: N taps, split into batches so snapshots can
//!   interleave
//! - command: looked up in the [`CommandTable`]; unknown text is ignored
//! - gift: deferred while its streak runs, then the gift rule (or the
//!   default tap rule) scaled by the final repeat count
//!
//! Planning is pure; [`EventMapper::dispatch`] enqueues the plan.

pub mod commands;
pub mod gifts;

use std::sync::Arc;

use futures::FutureExt;

use crate::serializer::{Pending, Priority, Serializer};
use crate::session::{invoke_all, ActionSpec, SessionSurface};
use crate::snapshot::SnapshotCoordinator;
use crate::stream::StreamEvent;

pub use commands::{Command, CommandTable};
pub use gifts::{default_gift_rules, streak_decision, GiftRule, GiftTable, StreakDecision};

/// What an event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing to do
    Ignore,
    /// Streak in progress, wait for the final event
    Deferred,
    /// One submission per inner list, in order
    Submit(Vec<Vec<ActionSpec>>),
    /// Take a manual snapshot
    Backup,
}

/// Pure mapping rules.
#[derive(Debug, Clone)]
pub struct MapperRules {
    pub commands: CommandTable,
    pub gifts: GiftTable,
    pub taps_per_batch: u32,
}

impl Default for MapperRules {
    fn default() -> Self {
        Self {
            commands: CommandTable::default(),
            gifts: GiftTable::default(),
            taps_per_batch: 50,
        }
    }
}

impl MapperRules {
    pub fn plan(&self, event: &StreamEvent) -> Reaction {
        match event {
            StreamEvent::Engagement { count, .. } => {
                let batches = tap_batches(*count, self.taps_per_batch);
                if batches.is_empty() {
                    Reaction::Ignore
                } else {
                    Reaction::Submit(batches)
                }
            }
            StreamEvent::Command { text, .. } => match self.commands.parse(text) {
                Some(Command::Backup) => Reaction::Backup,
                Some(command) => match command.action() {
                    Some(action) => Reaction::Submit(vec![vec![action]]),
                    None => Reaction::Ignore,
                },
                None => Reaction::Ignore,
            },
            StreamEvent::Gift(gift) => match streak_decision(gift) {
                StreakDecision::Pending => Reaction::Deferred,
                StreakDecision::Fire { repeat } => {
                    let actions = self.gifts.rule_or_default(&gift.gift_id).actions(repeat);
                    if actions.is_empty() {
                        Reaction::Ignore
                    } else {
                        Reaction::Submit(vec![actions])
                    }
                }
            },
            StreamEvent::StreamEnded => Reaction::Ignore,
        }
    }
}

/// Split `count` taps into batches of at most `per_batch`.
fn tap_batches(count: u32, per_batch: u32) -> Vec<Vec<ActionSpec>> {
    let per_batch = per_batch.max(1);
    let mut batches = Vec::new();
    let mut left = count;
    while left > 0 {
        let n = left.min(per_batch);
        batches.push(vec![ActionSpec::Tap { count: n }]);
        left -= n;
    }
    batches
}

/// Consumes stream events and submits their actions.
pub struct EventMapper<S> {
    rules: MapperRules,
    serializer: Serializer<S>,
    snapshots: Arc<SnapshotCoordinator<S>>,
}

impl<S: SessionSurface> EventMapper<S> {
    pub fn new(
        rules: MapperRules,
        serializer: Serializer<S>,
        snapshots: Arc<SnapshotCoordinator<S>>,
    ) -> Self {
        Self {
            rules,
            serializer,
            snapshots,
        }
    }

    pub fn rules(&self) -> &MapperRules {
        &self.rules
    }

    /// Enqueue the reaction to `event` and return the pending submissions.
    ///
    /// Submissions are queued before this returns, so events dispatched in
    /// order run in order. A backup command spawns a manual snapshot.
    pub fn dispatch(&self, event: &StreamEvent) -> Vec<Pending<()>> {
        match self.rules.plan(event) {
            Reaction::Ignore => Vec::new(),
            Reaction::Deferred => {
                if let StreamEvent::Gift(gift) = event {
                    tracing::debug!(
                        "[mapper] {} is sending {} x{} (streak in progress)",
                        gift.user,
                        gift_label(gift),
                        gift.repeat_count
                    );
                }
                Vec::new()
            }
            Reaction::Backup => {
                tracing::info!("[mapper] manual backup requested");
                let snapshots = Arc::clone(&self.snapshots);
                tokio::spawn(async move {
                    snapshots.manual().await;
                });
                Vec::new()
            }
            Reaction::Submit(batches) => {
                self.log_event(event);
                batches
                    .into_iter()
                    .map(|actions| {
                        self.serializer.enqueue(Priority::Normal, move |session: &mut S| {
                            async move { invoke_all(session, &actions).await }.boxed()
                        })
                    })
                    .collect()
            }
        }
    }

    /// Dispatch and log failures in the background.
    pub fn handle(&self, event: StreamEvent) {
        let pending = self.dispatch(&event);
        if pending.is_empty() {
            return;
        }

        let kind = event.name();
        tokio::spawn(async move {
            for submission in pending {
                if let Err(e) = submission.await {
                    tracing::warn!("[mapper] {} action failed: {}", kind, e);
                }
            }
        });
    }

    fn log_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Engagement { user, count } => {
                tracing::info!("[mapper] {} sent {} likes", user, count);
            }
            StreamEvent::Command { user, text } => {
                tracing::info!("[mapper] {}: {}", user, text);
            }
            StreamEvent::Gift(gift) => {
                let repeat = gift.repeat_count.max(1);
                match self.rules.gifts.rule(&gift.gift_id) {
                    Some(rule) => tracing::info!(
                        "[mapper] {} ({}x)",
                        rule.message.as_deref().unwrap_or(gift_label(gift)),
                        repeat
                    ),
                    None => tracing::info!(
                        "[mapper] unrecognised gift {} (id {}) x{} from {}, using default taps",
                        gift_label(gift),
                        gift.gift_id,
                        repeat,
                        gift.user
                    ),
                }
            }
            StreamEvent::StreamEnded => {}
        }
    }
}

fn gift_label(gift: &crate::stream::GiftEvent) -> &str {
    if gift.gift_name.is_empty() {
        &gift.gift_id
    } else {
        &gift.gift_name
    }
}
