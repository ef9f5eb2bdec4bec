//! Per-team run status, automation level, and the fixed team registry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TeamConfig;

/// Whether a team is currently permitted to run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeamStatus {
    #[default]
    Paused,
    Running,
}

impl std::fmt::Display for TeamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Per-team policy for unattended execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    /// Only a human directly invoking an action may run it.
    #[default]
    Manual,
    /// Runs, but every action goes through the approval queue.
    SemiAuto,
    /// Runs unattended within allowed actions and automation windows.
    Autonomous,
}

impl AutomationLevel {
    /// Parse a level name as supplied by operators or config.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "semi_auto" | "semi-auto" | "semiauto" => Some(Self::SemiAuto),
            "autonomous" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

impl std::fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::SemiAuto => write!(f, "semi_auto"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

/// Control record for one team in the fixed registry.
///
/// Created at startup for every configured team and never destroyed, only
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamControl {
    /// Stable team identifier (registry key).
    pub id: String,
    /// Human-readable name for status output.
    pub name: String,
    /// Current run status.
    pub status: TeamStatus,
    /// Unattended-execution policy.
    pub automation_level: AutomationLevel,
    /// Action types this team may perform.
    pub allowed_actions: BTreeSet<String>,
    /// When the team last completed a run.
    pub last_run: Option<DateTime<Utc>>,
    /// Total completed runs since startup.
    pub run_count: u64,
}

impl TeamControl {
    /// Build the startup control record for a configured team.
    #[must_use]
    pub fn from_config(config: &TeamConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            status: TeamStatus::Paused,
            automation_level: config.automation_level,
            allowed_actions: config.allowed_actions.clone(),
            last_run: None,
            run_count: 0,
        }
    }

    /// Check whether the team may perform the given action type.
    #[must_use]
    pub fn allows_action(&self, action_type: &str) -> bool {
        self.allowed_actions.contains(action_type)
    }

    /// Record a completed run.
    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.run_count += 1;
    }
}

/// The fixed team registry.
///
/// A thin ordered map; membership never changes after startup, so lookups
/// return `Option` and callers translate `None` into a not-found error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamRegistry {
    teams: BTreeMap<String, TeamControl>,
}

impl TeamRegistry {
    /// Build the registry from configured teams.
    #[must_use]
    pub fn from_configs(configs: &[TeamConfig]) -> Self {
        let teams = configs
            .iter()
            .map(|c| (c.id.clone(), TeamControl::from_config(c)))
            .collect();
        Self { teams }
    }

    /// Look up one team.
    #[must_use]
    pub fn get(&self, team_id: &str) -> Option<&TeamControl> {
        self.teams.get(team_id)
    }

    /// Look up one team mutably.
    pub fn get_mut(&mut self, team_id: &str) -> Option<&mut TeamControl> {
        self.teams.get_mut(team_id)
    }

    /// Iterate all teams in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TeamControl> {
        self.teams.values()
    }

    /// Apply a status to every team.
    pub fn set_all_statuses(&mut self, status: TeamStatus) {
        for team in self.teams.values_mut() {
            team.status = status;
        }
    }

    /// All team ids, in registry order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.teams.keys().cloned().collect()
    }

    /// Number of registered teams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.teams.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;

    fn registry() -> TeamRegistry {
        TeamRegistry::from_configs(&WardenConfig::default().teams)
    }

    #[test]
    fn test_automation_level_parse() {
        assert_eq!(AutomationLevel::parse("manual"), Some(AutomationLevel::Manual));
        assert_eq!(
            AutomationLevel::parse("SEMI_AUTO"),
            Some(AutomationLevel::SemiAuto)
        );
        assert_eq!(
            AutomationLevel::parse("autonomous"),
            Some(AutomationLevel::Autonomous)
        );
        assert_eq!(AutomationLevel::parse("yolo"), None);
    }

    #[test]
    fn test_registry_built_from_config() {
        let registry = registry();
        assert!(!registry.is_empty());
        assert!(registry.get("developer").is_some());
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_teams_start_paused() {
        let registry = registry();
        assert!(registry.iter().all(|t| t.status == TeamStatus::Paused));
    }

    #[test]
    fn test_set_all_statuses() {
        let mut registry = registry();
        registry.set_all_statuses(TeamStatus::Running);
        assert!(registry.iter().all(|t| t.status == TeamStatus::Running));

        registry.set_all_statuses(TeamStatus::Paused);
        assert!(registry.iter().all(|t| t.status == TeamStatus::Paused));
    }

    #[test]
    fn test_allows_action() {
        let registry = registry();
        let developer = registry.get("developer").unwrap();
        assert!(developer.allows_action("code_review"));
        assert!(!developer.allows_action("pricing_change"));
    }

    #[test]
    fn test_record_run() {
        let mut registry = registry();
        let now = Utc::now();
        let team = registry.get_mut("developer").unwrap();
        assert_eq!(team.run_count, 0);
        assert!(team.last_run.is_none());

        team.record_run(now);
        assert_eq!(team.run_count, 1);
        assert_eq!(team.last_run, Some(now));
    }

    #[test]
    fn test_ids_are_ordered() {
        let registry = registry();
        let ids = registry.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
