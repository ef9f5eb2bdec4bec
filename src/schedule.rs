//! Time-windowed autonomy scheduling.
//!
//! Automation windows gate *unattended* execution only: a human triggering
//! an action interactively is never subject to them. A team/action pair is
//! in window when scheduling is enabled and at least one window whose team
//! and action sets match (empty set = wildcard) covers the current time,
//! evaluated in the schedule's configured UTC offset.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ScheduleConfig, WindowConfig};
use crate::error::{Result, WardenError};

/// One time range during which specific teams/actions may run unattended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationWindow {
    pub id: Uuid,
    /// Inclusive start, in the schedule's timezone.
    pub start: NaiveTime,
    /// Exclusive end, in the schedule's timezone.
    pub end: NaiveTime,
    /// Teams this window applies to; empty means every team.
    pub teams: BTreeSet<String>,
    /// Actions this window applies to; empty means every action.
    pub actions: BTreeSet<String>,
}

impl AutomationWindow {
    /// Whether this window applies to the given team/action pair.
    #[must_use]
    pub fn matches(&self, team_id: &str, action_type: &str) -> bool {
        let team_ok = self.teams.is_empty() || self.teams.contains(team_id);
        let action_ok = self.actions.is_empty() || self.actions.contains(action_type);
        team_ok && action_ok
    }

    /// Whether the given local wall-clock time falls inside the window.
    #[must_use]
    pub fn covers(&self, local_time: NaiveTime) -> bool {
        self.start <= local_time && local_time < self.end
    }
}

/// The automation window set and its master switch.
#[derive(Debug, Clone)]
pub struct AutomationScheduler {
    enabled: bool,
    offset: FixedOffset,
    windows: Vec<AutomationWindow>,
}

impl AutomationScheduler {
    /// Build the scheduler from config.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an out-of-range offset or a malformed
    /// window.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let offset = parse_offset(config.utc_offset_minutes)?;
        let mut scheduler = Self {
            enabled: config.enabled,
            offset,
            windows: Vec::new(),
        };
        for window in &config.windows {
            let (start, end) = parse_window_times(window)?;
            scheduler.insert_window(start, end, window.teams.clone(), window.actions.clone())?;
        }
        Ok(scheduler)
    }

    /// Whether unattended admission checks are active at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Add a window with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless `start < end`.
    pub fn add_automation_window(
        &mut self,
        start: NaiveTime,
        end: NaiveTime,
        teams: BTreeSet<String>,
        actions: BTreeSet<String>,
    ) -> Result<AutomationWindow> {
        self.insert_window(start, end, teams, actions)
    }

    /// Remove a window by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no window has that id.
    pub fn remove_automation_window(&mut self, id: Uuid) -> Result<AutomationWindow> {
        let index = self
            .windows
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| WardenError::not_found("automation window", id.to_string()))?;
        Ok(self.windows.remove(index))
    }

    /// Bulk-replace the window set, switch, and timezone.
    ///
    /// `enabled = false` disables unattended admission without touching any
    /// other mode.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad offset or malformed window; the
    /// previous schedule stays in place on failure.
    pub fn set_automation_schedule(
        &mut self,
        enabled: bool,
        windows: Vec<WindowConfig>,
        utc_offset_minutes: i32,
    ) -> Result<()> {
        let offset = parse_offset(utc_offset_minutes)?;
        let mut parsed = Vec::with_capacity(windows.len());
        for window in &windows {
            let (start, end) = parse_window_times(window)?;
            if start >= end {
                return Err(window_order_error(start, end));
            }
            parsed.push(AutomationWindow {
                id: Uuid::new_v4(),
                start,
                end,
                teams: window.teams.clone(),
                actions: window.actions.clone(),
            });
        }

        self.enabled = enabled;
        self.offset = offset;
        self.windows = parsed;
        Ok(())
    }

    /// Whether the team/action pair is inside an active window right now.
    ///
    /// Returns `false` whenever scheduling is disabled; the admission layer
    /// treats disabled scheduling as "no window gate" separately.
    #[must_use]
    pub fn is_in_window(&self, team_id: &str, action_type: &str, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let local_time = now.with_timezone(&self.offset).time();
        self.windows
            .iter()
            .any(|w| w.matches(team_id, action_type) && w.covers(local_time))
    }

    /// Current windows, in insertion order.
    #[must_use]
    pub fn windows(&self) -> &[AutomationWindow] {
        &self.windows
    }

    fn insert_window(
        &mut self,
        start: NaiveTime,
        end: NaiveTime,
        teams: BTreeSet<String>,
        actions: BTreeSet<String>,
    ) -> Result<AutomationWindow> {
        if start >= end {
            return Err(window_order_error(start, end));
        }
        let window = AutomationWindow {
            id: Uuid::new_v4(),
            start,
            end,
            teams,
            actions,
        };
        self.windows.push(window.clone());
        Ok(window)
    }
}

fn parse_offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
        WardenError::validation(
            "utc_offset_minutes",
            format!("offset {minutes} minutes is out of range"),
        )
    })
}

fn parse_window_times(window: &WindowConfig) -> Result<(NaiveTime, NaiveTime)> {
    let parse = |field: &str, value: &str| {
        NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| {
            WardenError::validation(field, format!("expected HH:MM, got '{value}'"))
        })
    };
    Ok((
        parse("window.start", &window.start)?,
        parse("window.end", &window.end)?,
    ))
}

fn window_order_error(start: NaiveTime, end: NaiveTime) -> WardenError {
    WardenError::validation(
        "window",
        format!("start {start} must be before end {end}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn enabled_scheduler() -> AutomationScheduler {
        AutomationScheduler::from_config(&ScheduleConfig {
            enabled: true,
            utc_offset_minutes: 0,
            windows: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_add_window_validates_order() {
        let mut scheduler = enabled_scheduler();
        assert!(scheduler
            .add_automation_window(t(17, 0), t(9, 0), BTreeSet::new(), BTreeSet::new())
            .is_err());
        assert!(scheduler
            .add_automation_window(t(9, 0), t(9, 0), BTreeSet::new(), BTreeSet::new())
            .is_err());
        assert!(scheduler
            .add_automation_window(t(9, 0), t(17, 0), BTreeSet::new(), BTreeSet::new())
            .is_ok());
        assert_eq!(scheduler.windows().len(), 1);
    }

    #[test]
    fn test_remove_window() {
        let mut scheduler = enabled_scheduler();
        let window = scheduler
            .add_automation_window(t(9, 0), t(17, 0), BTreeSet::new(), BTreeSet::new())
            .unwrap();

        scheduler.remove_automation_window(window.id).unwrap();
        assert!(scheduler.windows().is_empty());

        let err = scheduler.remove_automation_window(window.id).unwrap_err();
        assert!(matches!(err, WardenError::NotFound { .. }));
    }

    #[test]
    fn test_outside_window_hours() {
        // Window 09:00-17:00 for sales/outreach; 20:00 is outside.
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(
                t(9, 0),
                t(17, 0),
                BTreeSet::from(["sales".to_string()]),
                BTreeSet::from(["outreach".to_string()]),
            )
            .unwrap();

        assert!(!scheduler.is_in_window("sales", "outreach", utc(20, 0)));
        assert!(scheduler.is_in_window("sales", "outreach", utc(10, 30)));
    }

    #[test]
    fn test_window_bounds_inclusive_exclusive() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(t(9, 0), t(17, 0), BTreeSet::new(), BTreeSet::new())
            .unwrap();

        assert!(scheduler.is_in_window("sales", "outreach", utc(9, 0)));
        assert!(!scheduler.is_in_window("sales", "outreach", utc(17, 0)));
    }

    #[test]
    fn test_empty_sets_are_wildcards() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(t(0, 0), t(23, 59), BTreeSet::new(), BTreeSet::new())
            .unwrap();

        assert!(scheduler.is_in_window("anyone", "anything", utc(12, 0)));
    }

    #[test]
    fn test_team_and_action_sets_both_must_match() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(
                t(0, 0),
                t(23, 59),
                BTreeSet::from(["sales".to_string()]),
                BTreeSet::from(["outreach".to_string()]),
            )
            .unwrap();

        assert!(scheduler.is_in_window("sales", "outreach", utc(12, 0)));
        assert!(!scheduler.is_in_window("developer", "outreach", utc(12, 0)));
        assert!(!scheduler.is_in_window("sales", "deploy", utc(12, 0)));
    }

    #[test]
    fn test_disabled_schedule_never_in_window() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(t(0, 0), t(23, 59), BTreeSet::new(), BTreeSet::new())
            .unwrap();
        scheduler
            .set_automation_schedule(
                false,
                vec![WindowConfig {
                    start: "00:00".into(),
                    end: "23:59".into(),
                    teams: BTreeSet::new(),
                    actions: BTreeSet::new(),
                }],
                0,
            )
            .unwrap();

        assert!(!scheduler.is_enabled());
        assert!(!scheduler.is_in_window("sales", "outreach", utc(12, 0)));
    }

    #[test]
    fn test_set_schedule_replaces_window_set() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(t(1, 0), t(2, 0), BTreeSet::new(), BTreeSet::new())
            .unwrap();

        scheduler
            .set_automation_schedule(
                true,
                vec![WindowConfig {
                    start: "09:00".into(),
                    end: "17:00".into(),
                    teams: BTreeSet::new(),
                    actions: BTreeSet::new(),
                }],
                0,
            )
            .unwrap();

        assert_eq!(scheduler.windows().len(), 1);
        assert_eq!(scheduler.windows()[0].start, t(9, 0));
    }

    #[test]
    fn test_set_schedule_rejects_bad_window_keeping_previous() {
        let mut scheduler = enabled_scheduler();
        scheduler
            .add_automation_window(t(9, 0), t(17, 0), BTreeSet::new(), BTreeSet::new())
            .unwrap();

        let err = scheduler.set_automation_schedule(
            true,
            vec![WindowConfig {
                start: "17:00".into(),
                end: "09:00".into(),
                teams: BTreeSet::new(),
                actions: BTreeSet::new(),
            }],
            0,
        );
        assert!(err.is_err());
        // Previous schedule intact.
        assert_eq!(scheduler.windows().len(), 1);
        assert_eq!(scheduler.windows()[0].start, t(9, 0));
    }

    #[test]
    fn test_offset_shifts_window_evaluation() {
        // Window 09:00-17:00 at UTC+2: 07:30 UTC is 09:30 local.
        let mut scheduler = AutomationScheduler::from_config(&ScheduleConfig {
            enabled: true,
            utc_offset_minutes: 120,
            windows: vec![WindowConfig {
                start: "09:00".into(),
                end: "17:00".into(),
                teams: BTreeSet::new(),
                actions: BTreeSet::new(),
            }],
        })
        .unwrap();

        assert!(scheduler.is_in_window("sales", "outreach", utc(7, 30)));
        assert!(!scheduler.is_in_window("sales", "outreach", utc(16, 0)));

        scheduler.set_automation_schedule(true, Vec::new(), 24 * 60).unwrap_err();
    }

    #[test]
    fn test_malformed_time_rejected() {
        let config = ScheduleConfig {
            enabled: true,
            utc_offset_minutes: 0,
            windows: vec![WindowConfig {
                start: "9am".into(),
                end: "17:00".into(),
                teams: BTreeSet::new(),
                actions: BTreeSet::new(),
            }],
        };
        assert!(AutomationScheduler::from_config(&config).is_err());
    }
}
