//! The enforcement action vocabulary.

use chrono::Duration;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// An action the moderation pipeline can take against a message or its
/// author.
///
/// The serialized form is the same vocabulary the classifier is instructed
/// to emit (`WARN`, `TIMEOUT_SHORT`, ...), so infraction records and wire
/// payloads read identically.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModAction {
    /// Take no action
    #[display("IGNORE")]
    Ignore,
    /// Remove the message and warn the author by DM
    #[display("WARN")]
    Warn,
    /// Remove the message only
    #[display("DELETE")]
    Delete,
    /// Remove the message and time the author out for 10 minutes
    #[display("TIMEOUT_SHORT")]
    TimeoutShort,
    /// Remove the message and time the author out for 1 hour
    #[display("TIMEOUT_MEDIUM")]
    TimeoutMedium,
    /// Remove the message and time the author out for 1 day
    #[display("TIMEOUT_LONG")]
    TimeoutLong,
    /// Remove the message and kick the author
    #[display("KICK")]
    Kick,
    /// Remove the message and ban the author
    #[display("BAN")]
    Ban,
    /// Surface the case to moderators without touching the author
    #[display("NOTIFY_MODS")]
    NotifyMods,
    /// Self-harm concern: leave the message, send support resources
    #[display("SUICIDAL")]
    Suicidal,
}

impl ModAction {
    /// Parses a classifier-suggested action string. Tolerates surrounding
    /// whitespace and any casing; returns `None` for anything outside the
    /// vocabulary.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IGNORE" => Some(Self::Ignore),
            "WARN" => Some(Self::Warn),
            "DELETE" => Some(Self::Delete),
            "TIMEOUT_SHORT" => Some(Self::TimeoutShort),
            "TIMEOUT_MEDIUM" => Some(Self::TimeoutMedium),
            "TIMEOUT_LONG" => Some(Self::TimeoutLong),
            "KICK" => Some(Self::Kick),
            "BAN" => Some(Self::Ban),
            "NOTIFY_MODS" => Some(Self::NotifyMods),
            "SUICIDAL" => Some(Self::Suicidal),
            _ => None,
        }
    }

    /// Relative severity, used to apply per-category minimum actions.
    /// `Suicidal` ranks alongside `Ignore`: it is support, not punishment.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Ignore | Self::Suicidal => 0,
            Self::NotifyMods => 1,
            Self::Warn => 2,
            Self::Delete => 3,
            Self::TimeoutShort => 4,
            Self::TimeoutMedium => 5,
            Self::TimeoutLong => 6,
            Self::Kick => 7,
            Self::Ban => 8,
        }
    }

    /// The communication timeout this action imposes, if any.
    #[must_use]
    pub fn timeout_duration(self) -> Option<Duration> {
        match self {
            Self::TimeoutShort => Some(Duration::minutes(10)),
            Self::TimeoutMedium => Some(Duration::hours(1)),
            Self::TimeoutLong => Some(Duration::days(1)),
            _ => None,
        }
    }

    /// Human-readable length of the timeout this action imposes, if any.
    #[must_use]
    pub const fn timeout_label(self) -> Option<&'static str> {
        match self {
            Self::TimeoutShort => Some("10 minutes"),
            Self::TimeoutMedium => Some("1 hour"),
            Self::TimeoutLong => Some("1 day"),
            _ => None,
        }
    }

    /// Whether the offending message is removed as part of this action.
    #[must_use]
    pub const fn removes_message(self) -> bool {
        matches!(
            self,
            Self::Warn
                | Self::Delete
                | Self::TimeoutShort
                | Self::TimeoutMedium
                | Self::TimeoutLong
                | Self::Kick
                | Self::Ban
        )
    }

    /// Whether this action is written to the author's infraction history.
    /// `Delete` alone is not recorded, and neither is the self-harm path.
    #[must_use]
    pub const fn records_infraction(self) -> bool {
        matches!(
            self,
            Self::Warn
                | Self::TimeoutShort
                | Self::TimeoutMedium
                | Self::TimeoutLong
                | Self::Kick
                | Self::Ban
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_serde() {
        for (action, wire) in [
            (ModAction::Ignore, "\"IGNORE\""),
            (ModAction::Warn, "\"WARN\""),
            (ModAction::TimeoutShort, "\"TIMEOUT_SHORT\""),
            (ModAction::NotifyMods, "\"NOTIFY_MODS\""),
            (ModAction::Suicidal, "\"SUICIDAL\""),
        ] {
            let serialized = serde_json::to_string(&action).unwrap();
            assert_eq!(serialized, wire);
            let parsed: ModAction = serde_json::from_str(&serialized).unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(ModAction::TimeoutMedium.to_string(), "TIMEOUT_MEDIUM");
        assert_eq!(ModAction::Ban.to_string(), "BAN");
    }

    #[test]
    fn from_wire_tolerates_case_and_whitespace() {
        assert_eq!(ModAction::from_wire("ban"), Some(ModAction::Ban));
        assert_eq!(
            ModAction::from_wire("  timeout_long "),
            Some(ModAction::TimeoutLong)
        );
        assert_eq!(ModAction::from_wire("Warn"), Some(ModAction::Warn));
    }

    #[test]
    fn from_wire_rejects_unknown_values() {
        assert_eq!(ModAction::from_wire("TIMEOUT"), None);
        assert_eq!(ModAction::from_wire("OBLITERATE"), None);
        assert_eq!(ModAction::from_wire(""), None);
    }

    #[test]
    fn timeout_tiers() {
        assert_eq!(
            ModAction::TimeoutShort.timeout_duration(),
            Some(Duration::minutes(10))
        );
        assert_eq!(
            ModAction::TimeoutMedium.timeout_duration(),
            Some(Duration::hours(1))
        );
        assert_eq!(
            ModAction::TimeoutLong.timeout_duration(),
            Some(Duration::days(1))
        );
        assert_eq!(ModAction::Ban.timeout_duration(), None);
        assert_eq!(ModAction::TimeoutLong.timeout_label(), Some("1 day"));
    }

    #[test]
    fn severity_orders_the_ladder() {
        let ladder = [
            ModAction::Ignore,
            ModAction::NotifyMods,
            ModAction::Warn,
            ModAction::Delete,
            ModAction::TimeoutShort,
            ModAction::TimeoutMedium,
            ModAction::TimeoutLong,
            ModAction::Kick,
            ModAction::Ban,
        ];
        for pair in ladder.windows(2) {
            assert!(pair[0].severity() < pair[1].severity());
        }
        assert_eq!(ModAction::Suicidal.severity(), ModAction::Ignore.severity());
    }

    #[test]
    fn side_effect_tables() {
        assert!(ModAction::Warn.removes_message());
        assert!(ModAction::Ban.removes_message());
        assert!(!ModAction::Suicidal.removes_message());
        assert!(!ModAction::NotifyMods.removes_message());

        assert!(ModAction::Kick.records_infraction());
        assert!(!ModAction::Delete.records_infraction());
        assert!(!ModAction::Suicidal.records_infraction());
        assert!(!ModAction::Ignore.records_infraction());
    }
}
