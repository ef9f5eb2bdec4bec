//! Global world state and the emergency-stop interlock.
//!
//! The world state is the single global mode governing whether any team may
//! act at all. Transitions cascade to every team control; the cascade is
//! expressed as an explicit table ([`TeamCascade`]) so it can be tested
//! independently of the rest of the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single global mode governing all team activity.
///
/// Mutated only through `Supervision::set_world_state`; every transition
/// applies a [`TeamCascade`] to the team registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorldState {
    /// Humans drive everything; team statuses are left as they are.
    #[default]
    Manual,
    /// Hard stop: every team is paused and scheduling is suspended.
    Paused,
    /// Teams run, but sensitive actions go through the approval queue.
    SemiAuto,
    /// Teams run unattended within their allowed actions and windows.
    Autonomous,
}

impl WorldState {
    /// Parse a state name as supplied by operators or config.
    ///
    /// # Example
    ///
    /// ```
    /// use warden::control::WorldState;
    ///
    /// assert_eq!(WorldState::parse("autonomous"), Some(WorldState::Autonomous));
    /// assert_eq!(WorldState::parse("SEMI_AUTO"), Some(WorldState::SemiAuto));
    /// assert_eq!(WorldState::parse("bogus"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "paused" => Some(Self::Paused),
            "semi_auto" | "semi-auto" | "semiauto" => Some(Self::SemiAuto),
            "autonomous" => Some(Self::Autonomous),
            _ => None,
        }
    }

    /// The cascade this state applies to every team control on entry.
    #[must_use]
    pub const fn cascade(&self) -> TeamCascade {
        match self {
            Self::Paused => TeamCascade::PauseAll,
            Self::SemiAuto | Self::Autonomous => TeamCascade::ResumeAll,
            Self::Manual => TeamCascade::LeaveUnchanged,
        }
    }

    /// Whether unattended (scheduler-driven) execution is possible at all
    /// in this state.
    #[must_use]
    pub const fn permits_unattended(&self) -> bool {
        matches!(self, Self::SemiAuto | Self::Autonomous)
    }
}

impl std::fmt::Display for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Paused => write!(f, "paused"),
            Self::SemiAuto => write!(f, "semi_auto"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

/// Per-team effect of entering a world state.
///
/// Kept as a standalone table so the cascade semantics are testable without
/// constructing a full control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamCascade {
    /// Force every team to paused.
    PauseAll,
    /// Force every team to running.
    ResumeAll,
    /// Do not touch team statuses.
    LeaveUnchanged,
}

/// The emergency-stop interlock.
///
/// Always takes precedence over [`WorldState`]: while engaged, every
/// admission decision denies before anything else is consulted. Cleared only
/// with the matching confirmation code.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmergencyStop {
    /// Whether the interlock is engaged.
    pub active: bool,
    /// Operator-supplied reason, for the audit trail and status queries.
    pub reason: Option<String>,
    /// When the interlock was engaged.
    pub engaged_at: Option<DateTime<Utc>>,
}

impl EmergencyStop {
    /// Engage the interlock.
    pub fn engage(&mut self, reason: impl Into<String>) {
        self.active = true;
        self.reason = Some(reason.into());
        self.engaged_at = Some(Utc::now());
    }

    /// Clear the interlock. Callers must have verified the confirmation
    /// code first.
    pub fn clear(&mut self) {
        self.active = false;
        self.reason = None;
        self.engaged_at = None;
    }
}

/// Compare a supplied confirmation code against the expected one without
/// short-circuiting on the first mismatched byte.
///
/// The comparison inspects every byte of the supplied code regardless of
/// where the first difference occurs, so response timing reveals nothing
/// about how much of a guess was correct.
#[must_use]
pub fn constant_time_code_eq(expected: &str, supplied: &str) -> bool {
    let expected = expected.as_bytes();
    let supplied = supplied.as_bytes();

    let mut diff = (expected.len() ^ supplied.len()) as u8;
    for (i, &b) in supplied.iter().enumerate() {
        let e = expected.get(i % expected.len().max(1)).copied().unwrap_or(0);
        diff |= e ^ b;
    }
    diff == 0 && !expected.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_state_parse() {
        assert_eq!(WorldState::parse("manual"), Some(WorldState::Manual));
        assert_eq!(WorldState::parse("PAUSED"), Some(WorldState::Paused));
        assert_eq!(WorldState::parse("semi_auto"), Some(WorldState::SemiAuto));
        assert_eq!(WorldState::parse("semi-auto"), Some(WorldState::SemiAuto));
        assert_eq!(
            WorldState::parse("autonomous"),
            Some(WorldState::Autonomous)
        );
        assert_eq!(WorldState::parse("turbo"), None);
        assert_eq!(WorldState::parse(""), None);
    }

    #[test]
    fn test_world_state_display_roundtrip() {
        for state in [
            WorldState::Manual,
            WorldState::Paused,
            WorldState::SemiAuto,
            WorldState::Autonomous,
        ] {
            assert_eq!(WorldState::parse(&state.to_string()), Some(state));
        }
    }

    #[test]
    fn test_cascade_table() {
        assert_eq!(WorldState::Paused.cascade(), TeamCascade::PauseAll);
        assert_eq!(WorldState::SemiAuto.cascade(), TeamCascade::ResumeAll);
        assert_eq!(WorldState::Autonomous.cascade(), TeamCascade::ResumeAll);
        assert_eq!(WorldState::Manual.cascade(), TeamCascade::LeaveUnchanged);
    }

    #[test]
    fn test_permits_unattended() {
        assert!(WorldState::Autonomous.permits_unattended());
        assert!(WorldState::SemiAuto.permits_unattended());
        assert!(!WorldState::Manual.permits_unattended());
        assert!(!WorldState::Paused.permits_unattended());
    }

    #[test]
    fn test_emergency_stop_engage_and_clear() {
        let mut estop = EmergencyStop::default();
        assert!(!estop.active);

        estop.engage("runaway spend");
        assert!(estop.active);
        assert_eq!(estop.reason.as_deref(), Some("runaway spend"));
        assert!(estop.engaged_at.is_some());

        estop.clear();
        assert!(!estop.active);
        assert!(estop.reason.is_none());
        assert!(estop.engaged_at.is_none());
    }

    #[test]
    fn test_constant_time_code_eq_matches() {
        assert!(constant_time_code_eq("RESET-123", "RESET-123"));
    }

    #[test]
    fn test_constant_time_code_eq_rejects() {
        assert!(!constant_time_code_eq("RESET-123", "RESET-124"));
        assert!(!constant_time_code_eq("RESET-123", "RESET-12"));
        assert!(!constant_time_code_eq("RESET-123", ""));
        assert!(!constant_time_code_eq("RESET-123", "RESET-1234"));
    }

    #[test]
    fn test_constant_time_code_eq_empty_expected_never_matches() {
        assert!(!constant_time_code_eq("", ""));
        assert!(!constant_time_code_eq("", "anything"));
    }
}
