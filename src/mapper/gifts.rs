//! Gift rules and streak handling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::ActionSpec;
use crate::stream::GiftEvent;

/// Reaction to one gift id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftRule {
    /// Taps per repeat of the gift
    pub taps: u32,

    /// Slot activated once per concluded gift
    pub slot: Option<usize>,

    /// Target activated once per concluded gift
    pub target: Option<String>,

    /// Thank-you line written to the log
    pub message: Option<String>,
}

impl GiftRule {
    pub fn taps(taps: u32) -> Self {
        Self {
            taps,
            ..Self::default()
        }
    }

    /// Actions for a concluded gift repeated `repeat` times.
    pub fn actions(&self, repeat: u32) -> Vec<ActionSpec> {
        let mut actions = Vec::new();
        let count = self.taps.saturating_mul(repeat);
        if count > 0 {
            actions.push(ActionSpec::Tap { count });
        }
        if let Some(index) = self.slot {
            actions.push(ActionSpec::Slot { index });
        }
        if let Some(name) = &self.target {
            actions.push(ActionSpec::Target { name: name.clone() });
        }
        actions
    }
}

/// Built-in rules for the common gifts.
pub fn default_gift_rules() -> HashMap<String, GiftRule> {
    let mut rules = HashMap::new();
    rules.insert(
        "5655".to_string(),
        GiftRule {
            taps: 100,
            message: Some("Thanks for the Rose! 100 taps!".to_string()),
            ..GiftRule::default()
        },
    );
    rules.insert(
        "5656".to_string(),
        GiftRule {
            taps: 500,
            slot: Some(1),
            message: Some("Thanks for the Lion! 500 taps and an upgrade!".to_string()),
            ..GiftRule::default()
        },
    );
    rules.insert(
        "5657".to_string(),
        GiftRule {
            taps: 1000,
            slot: Some(2),
            target: Some("Cursor".to_string()),
            message: Some("Thanks for the Universe! 1000 taps, an upgrade and a Cursor!".to_string()),
        },
    );
    rules
}

#[derive(Debug, Clone)]
pub struct GiftTable {
    rules: HashMap<String, GiftRule>,
    default_taps: u32,
}

impl Default for GiftTable {
    fn default() -> Self {
        Self::new(default_gift_rules(), 50)
    }
}

impl GiftTable {
    pub fn new(rules: HashMap<String, GiftRule>, default_taps: u32) -> Self {
        Self {
            rules,
            default_taps,
        }
    }

    pub fn rule(&self, gift_id: &str) -> Option<&GiftRule> {
        self.rules.get(gift_id)
    }

    /// Rule for `gift_id`, or the tap-only fallback for unknown gifts.
    pub fn rule_or_default(&self, gift_id: &str) -> GiftRule {
        self.rule(gift_id)
            .cloned()
            .unwrap_or_else(|| GiftRule::taps(self.default_taps))
    }
}

/// Whether a gift event should be acted on now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakDecision {
    /// Streak still running; the event is only logged
    Pending,
    /// Act now, scaled by the final repeat count
    Fire { repeat: u32 },
}

pub fn streak_decision(gift: &GiftEvent) -> StreakDecision {
    if gift.streakable && !gift.repeat_end {
        StreakDecision::Pending
    } else {
        StreakDecision::Fire {
            repeat: gift.repeat_count.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gift(id: &str, repeat: u32, end: bool) -> GiftEvent {
        GiftEvent {
            gift_id: id.to_string(),
            gift_name: String::new(),
            user: "ana".to_string(),
            repeat_count: repeat,
            repeat_end: end,
            streakable: true,
        }
    }

    #[test]
    fn test_streak_waits_for_conclusion() {
        assert_eq!(streak_decision(&gift("5655", 4, false)), StreakDecision::Pending);
        assert_eq!(
            streak_decision(&gift("5655", 4, true)),
            StreakDecision::Fire { repeat: 4 }
        );
    }

    #[test]
    fn test_non_streakable_fires_immediately() {
        let mut g = gift("5655", 0, false);
        g.streakable = false;
        assert_eq!(streak_decision(&g), StreakDecision::Fire { repeat: 1 });
    }

    #[test]
    fn test_rule_actions_scale_taps_only() {
        let table = GiftTable::default();
        let rule = table.rule_or_default("5657");
        assert_eq!(
            rule.actions(2),
            vec![
                ActionSpec::Tap { count: 2000 },
                ActionSpec::Slot { index: 2 },
                ActionSpec::Target {
                    name: "Cursor".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_unknown_gift_uses_default_taps() {
        let table = GiftTable::default();
        assert!(table.rule("9999").is_none());
        assert_eq!(
            table.rule_or_default("9999").actions(3),
            vec![ActionSpec::Tap { count: 150 }]
        );
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: GiftRule = toml::from_str("taps = 20\nslot = 3").unwrap();
        assert_eq!(rule.slot, Some(3));
        assert_eq!(rule.target, None);
        assert_eq!(rule.actions(1).len(), 2);
    }
}
