//! End-to-end tests for the control plane's admission and approval flows.

use std::sync::Arc;

use serde_json::json;
use warden::config::{WardenConfig, WindowConfig};
use warden::control::{AutomationLevel, TeamStatus, WorldState};
use warden::plane::{ActionSource, ControlPlane, RunOptions};
use warden::provider::MockProvider;
use warden::{DenialReason, SessionStatus, WardenError};

fn plane() -> ControlPlane {
    ControlPlane::new(WardenConfig::default()).unwrap()
}

async fn autonomous_plane() -> ControlPlane {
    let plane = plane();
    plane
        .set_world_state(WorldState::Autonomous, "test")
        .await
        .unwrap();
    for team in plane.config().teams.clone() {
        plane
            .set_team_automation_level(&team.id, AutomationLevel::Autonomous, "test")
            .await
            .unwrap();
    }
    plane
}

fn mock_options() -> RunOptions {
    RunOptions {
        provider_override: Some(Arc::new(
            MockProvider::new()
                .with_tool_call("create_task", json!({"title": "integration task"}))
                .completing("wrapped up"),
        )),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_global_pause_cascades_and_blocks_team_resume() {
    let plane = autonomous_plane().await;
    assert!(plane
        .all_team_statuses()
        .await
        .iter()
        .all(|t| t.status == TeamStatus::Running));

    plane.pause_world("operator").await.unwrap();
    assert!(plane
        .all_team_statuses()
        .await
        .iter()
        .all(|t| t.status == TeamStatus::Paused));

    // Per-team resume is refused with a specific reason while the world is
    // paused, for every team id.
    for team in plane.config().teams.clone() {
        let err = plane
            .resume_team(&team.id, "operator", "trying")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WardenError::Denied(DenialReason::BlockedByGlobalPause)
        ));
        assert_eq!(
            plane.team_status(&team.id).await.unwrap().status,
            TeamStatus::Paused
        );
    }

    // Resuming the world returns to the prior state and the cascade reruns.
    let transition = plane.resume_world("operator").await.unwrap();
    assert_eq!(transition.to, WorldState::Autonomous);
    assert!(plane
        .all_team_statuses()
        .await
        .iter()
        .all(|t| t.status == TeamStatus::Running));
}

#[tokio::test]
async fn test_deferred_approval_matches_direct_trigger_under_same_policy() {
    let plane = autonomous_plane().await;

    let direct = plane
        .trigger_team_action(
            "sales",
            "outreach",
            json!({"segment": "smb"}),
            ActionSource::Scheduled,
            "scheduler",
        )
        .await
        .unwrap();
    assert!(direct.success);

    let pending = plane
        .queue_action("sales", "outreach", json!({"segment": "smb"}), true, "scheduler")
        .await
        .unwrap();
    let approved = plane.approve_action(pending.id, "manager").await.unwrap();
    assert!(approved.success);

    let direct_receipt = direct.receipt.unwrap();
    let approved_receipt = approved.receipt.unwrap();
    assert_eq!(direct_receipt.team_id, approved_receipt.team_id);
    assert_eq!(direct_receipt.action_type, approved_receipt.action_type);
    assert_eq!(direct_receipt.parameters, approved_receipt.parameters);
    assert_eq!(plane.team_status("sales").await.unwrap().run_count, 2);
}

#[tokio::test]
async fn test_credit_blocked_denies_before_autonomy_checks() {
    let plane = autonomous_plane().await;
    let daily = plane.config().credit.daily_limit;

    // dailyLimit exhausted with overshoot past the boundary.
    plane.record_spend(daily - 5.0, "earlier").await.unwrap();
    plane.record_spend(10.0, "landing late").await.unwrap();

    let status = plane.check_credit_limits().await;
    assert!(!status.can_proceed);
    assert_eq!(status.daily_spend, daily + 5.0);

    let decision = plane
        .can_execute_action("developer", "deploy", ActionSource::Scheduled)
        .await
        .unwrap();
    assert_eq!(decision.reason(), Some(&DenialReason::CreditExceeded));

    // The external timer resets the period and admission recovers.
    plane.reset_daily_spend("timer").await.unwrap();
    let decision = plane
        .can_execute_action("developer", "deploy", ActionSource::Scheduled)
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn test_emergency_stop_overrides_everything_until_reset() {
    let plane = autonomous_plane().await;
    let pending = plane
        .queue_action("developer", "deploy", json!({}), true, "scheduler")
        .await
        .unwrap();

    let rejected = plane.trigger_emergency_stop("runaway loop").await.unwrap();
    assert_eq!(rejected, vec![pending.id]);

    // Admission denies on the interlock first, for any source.
    for source in [ActionSource::Interactive, ActionSource::Scheduled] {
        let decision = plane
            .can_execute_action("developer", "deploy", source)
            .await
            .unwrap();
        assert_eq!(decision.reason(), Some(&DenialReason::EmergencyStop));
    }

    // Wrong codes never clear it, any number of times.
    for guess in ["", "confirm-reset", "CONFIRM", "CONFIRM-RESET2"] {
        assert!(plane.reset_emergency_stop("intruder", guess).await.is_err());
        assert!(plane.world_status().await.emergency_stop.active);
    }

    plane
        .reset_emergency_stop("operator", "CONFIRM-RESET")
        .await
        .unwrap();
    assert!(!plane.world_status().await.emergency_stop.active);

    // Teams were cascaded to paused by the stop; the world state survived.
    assert_eq!(plane.world_status().await.state, WorldState::Autonomous);
    assert!(plane
        .all_team_statuses()
        .await
        .iter()
        .all(|t| t.status == TeamStatus::Paused));
}

#[tokio::test]
async fn test_schedule_gates_unattended_but_not_interactive() {
    use chrono::TimeZone;
    let plane = autonomous_plane().await;
    plane
        .set_automation_schedule(
            true,
            vec![WindowConfig {
                start: "09:00".into(),
                end: "17:00".into(),
                teams: ["sales".to_string()].into(),
                actions: ["outreach".to_string()].into(),
            }],
            0,
            "operator",
        )
        .await
        .unwrap();

    let evening = chrono::Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
    let scheduled = plane
        .can_execute_action_at("sales", "outreach", ActionSource::Scheduled, evening)
        .await
        .unwrap();
    assert_eq!(scheduled.reason(), Some(&DenialReason::OutsideWindow));

    let interactive = plane
        .can_execute_action_at("sales", "outreach", ActionSource::Interactive, evening)
        .await
        .unwrap();
    assert!(interactive.is_allowed());

    // Disabling the schedule removes the window gate entirely.
    plane
        .set_automation_schedule(false, Vec::new(), 0, "operator")
        .await
        .unwrap();
    let scheduled = plane
        .can_execute_action_at("sales", "outreach", ActionSource::Scheduled, evening)
        .await
        .unwrap();
    assert!(scheduled.is_allowed());
}

#[tokio::test]
async fn test_full_loop_commits_results_and_spend() {
    let plane = autonomous_plane().await;
    let session = plane
        .run_agent_loop("developer", "prepare release", mock_options())
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.completion_summary.as_deref(), Some("wrapped up"));
    assert_eq!(session.tasks_created.len(), 1);
    assert!(session.usage.api_calls >= 2);

    let credit = plane.check_credit_limits().await;
    assert!(credit.daily_spend > 0.0);

    let team = plane.team_status("developer").await.unwrap();
    assert_eq!(team.run_count, 1);
    assert!(team.last_run.is_some());

    // The control log saw the run and the spend, in that order.
    let actions: Vec<String> = plane
        .control_log(50)
        .await
        .into_iter()
        .map(|e| e.action)
        .collect();
    let run_pos = actions.iter().position(|a| a == "run_agent_loop").unwrap();
    let spend_pos = actions.iter().position(|a| a == "record_spend").unwrap();
    assert!(run_pos < spend_pos);
}

#[tokio::test]
async fn test_run_all_teams_reports_denials_per_slot() {
    let plane = autonomous_plane().await;
    plane
        .pause_team("support", "operator", "on hold")
        .await
        .unwrap();

    let results = plane.run_all_teams("daily check-in", mock_options()).await;
    assert_eq!(results.len(), plane.config().teams.len());

    for outcome in results {
        match outcome.team_id.as_str() {
            "support" => {
                let err = outcome.result.unwrap_err();
                assert!(err.is_denial());
            }
            _ => {
                let session = outcome.result.unwrap();
                assert_eq!(session.status, SessionStatus::Completed);
            }
        }
    }
}

#[tokio::test]
async fn test_reject_action_is_terminal() {
    let plane = autonomous_plane().await;
    let pending = plane
        .queue_action("marketing", "draft_campaign", json!({}), true, "scheduler")
        .await
        .unwrap();

    let rejected = plane
        .reject_action(pending.id, "manager", "not this quarter")
        .await
        .unwrap();
    assert_eq!(
        rejected.resolution_note.as_deref(),
        Some("not this quarter")
    );

    assert!(plane.approve_action(pending.id, "manager").await.is_err());
    assert!(plane
        .reject_action(pending.id, "manager", "again")
        .await
        .is_err());
    assert_eq!(plane.team_status("marketing").await.unwrap().run_count, 0);
}
