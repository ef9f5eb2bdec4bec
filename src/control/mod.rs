//! Global safety state machine and per-team controls.
//!
//! The [`Supervision`] aggregate owns the world state, the emergency-stop
//! interlock, and the fixed team registry as one unit, because world
//! transitions cascade into team statuses and must be applied atomically.
//! The control plane wraps one `Supervision` in a single lock; everything in
//! this module is synchronous and lock-free so it stays unit-testable.

pub mod log;
pub mod teams;
pub mod world;

pub use log::{ChainVerification, ControlLog, ControlLogEntry};
pub use teams::{AutomationLevel, TeamControl, TeamRegistry, TeamStatus};
pub use world::{constant_time_code_eq, EmergencyStop, TeamCascade, WorldState};

use serde::{Deserialize, Serialize};

use crate::config::TeamConfig;
use crate::error::{DenialReason, Result, WardenError};

/// Outcome of a world-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldTransition {
    pub from: WorldState,
    pub to: WorldState,
    /// `false` when the requested state was already active (logged no-op).
    pub changed: bool,
    pub cascade: TeamCascade,
}

/// Read-only snapshot of the global safety state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldStatus {
    pub state: WorldState,
    pub emergency_stop: EmergencyStop,
    pub teams_running: usize,
    pub teams_paused: usize,
}

/// The world state machine, emergency stop, and team registry as one
/// atomically-mutated aggregate.
#[derive(Debug, Clone)]
pub struct Supervision {
    state: WorldState,
    emergency_stop: EmergencyStop,
    teams: TeamRegistry,
    confirmation_code: String,
    /// Where `resume_world` returns to after a global pause.
    state_before_pause: Option<WorldState>,
}

impl Supervision {
    /// Build the startup supervision state from configured teams.
    #[must_use]
    pub fn new(team_configs: &[TeamConfig], confirmation_code: impl Into<String>) -> Self {
        Self {
            state: WorldState::Manual,
            emergency_stop: EmergencyStop::default(),
            teams: TeamRegistry::from_configs(team_configs),
            confirmation_code: confirmation_code.into(),
            state_before_pause: None,
        }
    }

    /// Current world state.
    #[must_use]
    pub fn world_state(&self) -> WorldState {
        self.state
    }

    /// Whether the emergency stop is engaged.
    #[must_use]
    pub fn emergency_stopped(&self) -> bool {
        self.emergency_stop.active
    }

    /// The team registry (read access).
    #[must_use]
    pub fn teams(&self) -> &TeamRegistry {
        &self.teams
    }

    /// Mutable team registry access for run bookkeeping.
    pub fn teams_mut(&mut self) -> &mut TeamRegistry {
        &mut self.teams
    }

    /// Transition the world state, applying the cascade from the transition
    /// table to every team.
    ///
    /// Re-applying the current state is a no-op that still reports the
    /// transition (`changed = false`) so the caller can log it.
    pub fn set_world_state(&mut self, new_state: WorldState) -> WorldTransition {
        let from = self.state;
        let cascade = new_state.cascade();
        if from == new_state {
            return WorldTransition {
                from,
                to: new_state,
                changed: false,
                cascade,
            };
        }

        if new_state == WorldState::Paused {
            self.state_before_pause = Some(from);
        }
        self.state = new_state;
        match cascade {
            TeamCascade::PauseAll => self.teams.set_all_statuses(TeamStatus::Paused),
            TeamCascade::ResumeAll => self.teams.set_all_statuses(TeamStatus::Running),
            TeamCascade::LeaveUnchanged => {}
        }

        WorldTransition {
            from,
            to: new_state,
            changed: true,
            cascade,
        }
    }

    /// Return from a global pause to the state active before it.
    ///
    /// Falls back to `Manual` when there is no recorded prior state (e.g.
    /// the process started paused).
    pub fn resume_world(&mut self) -> WorldTransition {
        let target = self.state_before_pause.take().unwrap_or(WorldState::Manual);
        self.set_world_state(target)
    }

    /// Pause a single team.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown team id.
    pub fn pause_team(&mut self, team_id: &str) -> Result<()> {
        let team = self
            .teams
            .get_mut(team_id)
            .ok_or_else(|| WardenError::not_found("team", team_id))?;
        team.status = TeamStatus::Paused;
        Ok(())
    }

    /// Resume a single team.
    ///
    /// The global pause takes precedence: while the world is paused this
    /// refuses with `BlockedByGlobalPause` instead of silently doing
    /// nothing, and the team stays paused.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown team id, or the denial above.
    pub fn resume_team(&mut self, team_id: &str) -> Result<()> {
        if self.teams.get(team_id).is_none() {
            return Err(WardenError::not_found("team", team_id));
        }
        if self.state == WorldState::Paused {
            return Err(WardenError::Denied(DenialReason::BlockedByGlobalPause));
        }
        // Checked present above.
        if let Some(team) = self.teams.get_mut(team_id) {
            team.status = TeamStatus::Running;
        }
        Ok(())
    }

    /// Change a team's automation level.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown team id.
    pub fn set_team_automation_level(
        &mut self,
        team_id: &str,
        level: AutomationLevel,
    ) -> Result<()> {
        let team = self
            .teams
            .get_mut(team_id)
            .ok_or_else(|| WardenError::not_found("team", team_id))?;
        team.automation_level = level;
        Ok(())
    }

    /// Engage the emergency stop and force the pause cascade onto every
    /// team. The world state itself is left untouched; the interlock
    /// overrides it in every admission decision.
    pub fn trigger_emergency_stop(&mut self, reason: impl Into<String>) {
        self.emergency_stop.engage(reason);
        self.teams.set_all_statuses(TeamStatus::Paused);
    }

    /// Clear the emergency stop given the matching confirmation code.
    ///
    /// Fails closed on any mismatch with a single opaque error, revealing
    /// nothing about why the attempt was rejected.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the code does not match.
    pub fn reset_emergency_stop(&mut self, confirmation_code: &str) -> Result<()> {
        if !constant_time_code_eq(&self.confirmation_code, confirmation_code) {
            return Err(WardenError::validation(
                "confirmation_code",
                "confirmation rejected",
            ));
        }
        self.emergency_stop.clear();
        Ok(())
    }

    /// Read-only snapshot for status queries.
    #[must_use]
    pub fn world_status(&self) -> WorldStatus {
        let running = self
            .teams
            .iter()
            .filter(|t| t.status == TeamStatus::Running)
            .count();
        WorldStatus {
            state: self.state,
            emergency_stop: self.emergency_stop.clone(),
            teams_running: running,
            teams_paused: self.teams.len() - running,
        }
    }

    /// Snapshot of one team's control record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown team id.
    pub fn team_status(&self, team_id: &str) -> Result<TeamControl> {
        self.teams
            .get(team_id)
            .cloned()
            .ok_or_else(|| WardenError::not_found("team", team_id))
    }
}
