//! Typed, timestamped status conditions.
//!
//! A condition starts `Unknown`, moves to `True` or `False` on first
//! observation, and then toggles. Every status change stamps a new
//! `lastTransitionTime`; edits to reason or message alone do not.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// A single condition entry as stored in `status.conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition observed at `now`.
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    /// Whether the condition is currently `True`.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// What [`set_condition`] did to the condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionTransition {
    /// First observation of this condition type.
    Added,
    /// Status flipped; the transition time was advanced.
    StatusChanged {
        from: ConditionStatus,
        to: ConditionStatus,
    },
    /// Reason or message changed, status did not.
    Updated,
    /// Nothing changed.
    Unchanged,
}

impl ConditionTransition {
    /// Whether the transition time was stamped.
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::Added | Self::StatusChanged { .. })
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Update the condition of the given type in place, or append it.
///
/// `last_transition_time` is set to `now` for a new condition and whenever
/// the status changes; it is left alone for reason/message-only edits.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ConditionTransition {
    let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    else {
        conditions.push(Condition::new(condition_type, status, reason, message, now));
        return ConditionTransition::Added;
    };

    let from = existing.status;
    let text_changed = existing.reason != reason || existing.message != message;

    if from != status {
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.last_transition_time = now;
        return ConditionTransition::StatusChanged { from, to: status };
    }

    if text_changed {
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        return ConditionTransition::Updated;
    }

    ConditionTransition::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_700_000_000 + offset_secs)
    }

    #[test]
    fn should_add_condition_on_first_observation() {
        let mut conditions = Vec::new();
        let transition =
            set_condition(&mut conditions, "Ready", ConditionStatus::False, "Booting", "", t(0));

        assert_eq!(transition, ConditionTransition::Added);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t(0));
    }

    #[test]
    fn should_be_noop_when_reapplying_identical_condition() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", ConditionStatus::True, "Up", "ok", t(0));
        let before = conditions.clone();

        let transition =
            set_condition(&mut conditions, "Ready", ConditionStatus::True, "Up", "ok", t(60));

        assert_eq!(transition, ConditionTransition::Unchanged);
        assert_eq!(conditions, before);
    }

    #[test]
    fn should_advance_transition_time_only_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", ConditionStatus::True, "Up", "ok", t(0));

        let transition =
            set_condition(&mut conditions, "Ready", ConditionStatus::True, "Up", "still ok", t(10));
        assert_eq!(transition, ConditionTransition::Updated);
        assert_eq!(conditions[0].last_transition_time, t(0));
        assert_eq!(conditions[0].message, "still ok");

        let transition =
            set_condition(&mut conditions, "Ready", ConditionStatus::False, "Down", "lost", t(20));
        assert_eq!(
            transition,
            ConditionTransition::StatusChanged {
                from: ConditionStatus::True,
                to: ConditionStatus::False
            }
        );
        assert_eq!(conditions[0].last_transition_time, t(20));
        assert!(transition.is_transition());
    }

    #[test]
    fn should_keep_conditions_of_other_types() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", ConditionStatus::True, "", "", t(0));
        set_condition(&mut conditions, "Degraded", ConditionStatus::False, "", "", t(1));
        set_condition(&mut conditions, "Ready", ConditionStatus::False, "", "", t(2));

        assert_eq!(conditions.len(), 2);
        let degraded = find_condition(&conditions, "Degraded");
        assert_eq!(degraded.map(|c| c.last_transition_time), Some(t(1)));
        assert!(find_condition(&conditions, "Missing").is_none());
    }

    #[test]
    fn should_serialize_with_wire_field_names() {
        let condition = Condition::new("Ready", ConditionStatus::Unknown, "r", "m", t(0));
        let json = serde_json::to_value(&condition).unwrap_or_default();

        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "Unknown");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
