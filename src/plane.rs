//! The control plane facade.
//!
//! [`ControlPlane`] owns every authoritative aggregate behind its own lock
//! (the world/teams pair, the credit ledger, the action queue, the
//! scheduler, the control log) and composes them into the admission
//! decision, the direct and deferred execution paths, and the agent loop
//! entry point. No global lock exists: a slow provider call never
//! serializes unrelated teams.
//!
//! Locking discipline: hold at most one aggregate lock at a time, taking
//! the control-log lock only while the mutated aggregate's lock is still
//! held, so log order reflects the order mutating calls were accepted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{TeamConfig, WardenConfig, WindowConfig};
use crate::control::{
    AutomationLevel, ControlLog, ControlLogEntry, Supervision, TeamControl, TeamStatus,
    WorldState, WorldStatus, WorldTransition,
};
use crate::credit::{CreditLedger, CreditStatus, SpendRecord};
use crate::engine::{
    AgentLoopEngine, AgentLoopSession, CancelHandle, EventSink, NullSink, StateContext,
};
use crate::error::{DenialReason, Result, WardenError};
use crate::provider::{create_provider, estimate_cost, LlmProvider, TokenUsage};
use crate::queue::{ActionQueue, ActionStatus, PendingAction};
use crate::schedule::{AutomationScheduler, AutomationWindow};
use crate::sync::{InMemoryStateStore, StateSync, TeamStateStore};

/// Who is asking for an action to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    /// A human directly invoking the action.
    Interactive,
    /// The scheduler or another unattended caller.
    Scheduled,
}

/// Typed admission result. Denial is routine, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allowed,
    Denied { reason: DenialReason },
}

impl AdmissionDecision {
    /// Whether execution may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The denial reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&DenialReason> {
        match self {
            Self::Allowed => None,
            Self::Denied { reason } => Some(reason),
        }
    }
}

/// Proof that an action was executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub team_id: String,
    pub action_type: String,
    pub parameters: serde_json::Value,
    pub executed_at: DateTime<Utc>,
}

/// Result of a trigger or approval attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub reason: Option<DenialReason>,
    pub receipt: Option<ExecutionReceipt>,
}

impl ActionOutcome {
    fn denied(reason: DenialReason) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            receipt: None,
        }
    }

    fn executed(receipt: ExecutionReceipt) -> Self {
        Self {
            success: true,
            reason: None,
            receipt: Some(receipt),
        }
    }
}

/// Options for one agent loop invocation.
#[derive(Clone)]
pub struct RunOptions {
    /// Who asked for the run (gates the autonomy-window checks).
    pub source: ActionSource,
    /// Action type the run is admitted as.
    pub action_type: String,
    /// Requested iterations; falls back to config, clamped by the engine.
    pub max_iterations: Option<u32>,
    /// Provider to use instead of the configured one (tests, per-run model).
    pub provider_override: Option<Arc<dyn LlmProvider>>,
    /// Live event destination.
    pub sink: Arc<dyn EventSink>,
    /// Cooperative cancellation flag.
    pub cancel: CancelHandle,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            source: ActionSource::Interactive,
            action_type: "agent_loop".to_string(),
            max_iterations: None,
            provider_override: None,
            sink: Arc::new(NullSink),
            cancel: CancelHandle::new(),
        }
    }
}

/// Per-team result from [`ControlPlane::run_all_teams`].
pub struct TeamRunResult {
    pub team_id: String,
    pub result: Result<AgentLoopSession>,
}

/// The orchestration control plane.
pub struct ControlPlane {
    config: WardenConfig,
    supervision: Arc<RwLock<Supervision>>,
    credit: Arc<Mutex<CreditLedger>>,
    queue: Arc<Mutex<ActionQueue>>,
    scheduler: Arc<RwLock<AutomationScheduler>>,
    log: Arc<Mutex<ControlLog>>,
    store: Arc<dyn TeamStateStore>,
    state_sync: StateSync,
    busy_teams: Arc<Mutex<HashSet<String>>>,
    session_permits: Arc<Semaphore>,
}

impl ControlPlane {
    /// Build a control plane with the in-memory state store.
    ///
    /// # Errors
    ///
    /// Returns a configuration/validation error if any section of the
    /// config is unusable.
    pub fn new(config: WardenConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemoryStateStore::new()))
    }

    /// Build a control plane over a caller-supplied state store.
    ///
    /// # Errors
    ///
    /// Returns a configuration/validation error if any section of the
    /// config is unusable.
    pub fn with_store(config: WardenConfig, store: Arc<dyn TeamStateStore>) -> Result<Self> {
        config.validate()?;
        let supervision = Arc::new(RwLock::new(Supervision::new(
            &config.teams,
            config.estop_confirmation_code.clone(),
        )));
        let credit = CreditLedger::new(config.credit.daily_limit, config.credit.monthly_limit)?;
        let scheduler = AutomationScheduler::from_config(&config.schedule)?;
        let permits = config.concurrency.max_concurrent_sessions;
        let log = match &config.control_log_path {
            Some(path) => ControlLog::new().with_sink(path),
            None => ControlLog::new(),
        };

        Ok(Self {
            state_sync: StateSync::new(supervision.clone(), store.clone()),
            supervision,
            credit: Arc::new(Mutex::new(credit)),
            queue: Arc::new(Mutex::new(ActionQueue::new())),
            scheduler: Arc::new(RwLock::new(scheduler)),
            log: Arc::new(Mutex::new(log)),
            store,
            busy_teams: Arc::new(Mutex::new(HashSet::new())),
            session_permits: Arc::new(Semaphore::new(permits)),
            config,
        })
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    // =========================================================================
    // World state and emergency stop
    // =========================================================================

    /// Transition the global world state, cascading to every team.
    pub async fn set_world_state(
        &self,
        new_state: WorldState,
        actor: &str,
    ) -> Result<WorldTransition> {
        let mut supervision = self.supervision.write().await;
        let transition = supervision.set_world_state(new_state);
        self.record_log(
            "set_world_state",
            actor,
            true,
            json!({
                "from": transition.from,
                "to": transition.to,
                "changed": transition.changed,
            }),
        )
        .await?;
        drop(supervision);

        info!(
            "World state: {} -> {} ({})",
            transition.from,
            transition.to,
            if transition.changed { "applied" } else { "no-op" }
        );
        Ok(transition)
    }

    /// Convenience wrapper: enter the global pause.
    pub async fn pause_world(&self, actor: &str) -> Result<WorldTransition> {
        self.set_world_state(WorldState::Paused, actor).await
    }

    /// Convenience wrapper: leave the global pause, returning to the state
    /// active before it.
    pub async fn resume_world(&self, actor: &str) -> Result<WorldTransition> {
        let mut supervision = self.supervision.write().await;
        let transition = supervision.resume_world();
        self.record_log(
            "resume_world",
            actor,
            true,
            json!({ "from": transition.from, "to": transition.to }),
        )
        .await?;
        Ok(transition)
    }

    /// Engage the emergency stop: pause every team and auto-reject every
    /// still-pending approval so nothing can fire into a stopped world.
    ///
    /// Returns the ids of the auto-rejected pending actions.
    pub async fn trigger_emergency_stop(&self, reason: &str) -> Result<Vec<Uuid>> {
        let mut supervision = self.supervision.write().await;
        supervision.trigger_emergency_stop(reason);

        let mut queue = self.queue.lock().await;
        let rejected = queue.reject_all_pending("emergency_stop", "emergency stop engaged");
        drop(queue);

        self.record_log(
            "trigger_emergency_stop",
            "system",
            true,
            json!({ "reason": reason, "auto_rejected": rejected.len() }),
        )
        .await?;
        drop(supervision);

        warn!(
            "EMERGENCY STOP engaged: {} ({} pending action(s) auto-rejected)",
            reason,
            rejected.len()
        );
        Ok(rejected)
    }

    /// Clear the emergency stop with the matching confirmation code.
    ///
    /// Fails closed with one opaque error on any mismatch; the failed
    /// attempt is still logged.
    pub async fn reset_emergency_stop(&self, actor: &str, confirmation_code: &str) -> Result<()> {
        let mut supervision = self.supervision.write().await;
        let outcome = supervision.reset_emergency_stop(confirmation_code);
        self.record_log(
            "reset_emergency_stop",
            actor,
            outcome.is_ok(),
            json!({}),
        )
        .await?;
        drop(supervision);

        if outcome.is_ok() {
            info!("Emergency stop cleared by {}", actor);
        }
        outcome
    }

    // =========================================================================
    // Team controls
    // =========================================================================

    /// Pause one team.
    pub async fn pause_team(&self, team_id: &str, actor: &str, reason: &str) -> Result<()> {
        let mut supervision = self.supervision.write().await;
        let outcome = supervision.pause_team(team_id);
        self.record_log(
            "pause_team",
            actor,
            outcome.is_ok(),
            json!({ "team": team_id, "reason": reason }),
        )
        .await?;
        outcome
    }

    /// Resume one team. Refused with `BlockedByGlobalPause` while the world
    /// is paused.
    pub async fn resume_team(&self, team_id: &str, actor: &str, reason: &str) -> Result<()> {
        let mut supervision = self.supervision.write().await;
        let outcome = supervision.resume_team(team_id);
        self.record_log(
            "resume_team",
            actor,
            outcome.is_ok(),
            json!({ "team": team_id, "reason": reason }),
        )
        .await?;
        outcome
    }

    /// Change one team's automation level.
    pub async fn set_team_automation_level(
        &self,
        team_id: &str,
        level: AutomationLevel,
        actor: &str,
    ) -> Result<()> {
        let mut supervision = self.supervision.write().await;
        let outcome = supervision.set_team_automation_level(team_id, level);
        self.record_log(
            "set_team_automation_level",
            actor,
            outcome.is_ok(),
            json!({ "team": team_id, "level": level.to_string() }),
        )
        .await?;
        outcome
    }

    // =========================================================================
    // Admission control
    // =========================================================================

    /// May this team run this action right now?
    ///
    /// Pure read; composes the safety interlock, global and team pause
    /// state, the budget gate, and (for unattended sources) the automation
    /// level, allowed-action set, and window schedule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown team; every policy "no" comes back
    /// as a typed [`AdmissionDecision::Denied`], not an error.
    pub async fn can_execute_action(
        &self,
        team_id: &str,
        action_type: &str,
        source: ActionSource,
    ) -> Result<AdmissionDecision> {
        self.can_execute_action_at(team_id, action_type, source, Utc::now())
            .await
    }

    /// Admission check against an explicit clock, for window testing.
    pub async fn can_execute_action_at(
        &self,
        team_id: &str,
        action_type: &str,
        source: ActionSource,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision> {
        let deny = |reason| Ok(AdmissionDecision::Denied { reason });

        // Emergency stop is always the first check.
        let (team_status, team_level, action_allowed) = {
            let supervision = self.supervision.read().await;
            if supervision.emergency_stopped() {
                return deny(DenialReason::EmergencyStop);
            }
            if supervision.world_state() == WorldState::Paused {
                return deny(DenialReason::WorldPaused);
            }
            let team = supervision
                .teams()
                .get(team_id)
                .ok_or_else(|| WardenError::not_found("team", team_id))?;
            (
                team.status,
                team.automation_level,
                team.allows_action(action_type),
            )
        };

        if team_status == TeamStatus::Paused {
            return deny(DenialReason::TeamPaused {
                team: team_id.to_string(),
            });
        }

        if !self.credit.lock().await.check_credit_limits().can_proceed {
            return deny(DenialReason::CreditExceeded);
        }

        // A human directly invoking an action is not subject to the
        // autonomy-window checks.
        if source == ActionSource::Interactive {
            return Ok(AdmissionDecision::Allowed);
        }

        if team_level != AutomationLevel::Autonomous {
            return deny(DenialReason::RequiresApproval {
                team: team_id.to_string(),
                level: team_level.to_string(),
            });
        }
        if !action_allowed {
            return deny(DenialReason::ActionNotAllowed {
                team: team_id.to_string(),
                action: action_type.to_string(),
            });
        }

        let scheduler = self.scheduler.read().await;
        if scheduler.is_enabled() && !scheduler.is_in_window(team_id, action_type, now) {
            return deny(DenialReason::OutsideWindow);
        }

        Ok(AdmissionDecision::Allowed)
    }

    // =========================================================================
    // Direct and deferred execution paths
    // =========================================================================

    /// Run admission and, if allowed, execute the action directly.
    pub async fn trigger_team_action(
        &self,
        team_id: &str,
        action_type: &str,
        parameters: serde_json::Value,
        source: ActionSource,
        actor: &str,
    ) -> Result<ActionOutcome> {
        let decision = self
            .can_execute_action(team_id, action_type, source)
            .await?;
        if let AdmissionDecision::Denied { reason } = decision {
            self.record_log(
                "trigger_team_action",
                actor,
                false,
                json!({ "team": team_id, "action": action_type, "denied": reason }),
            )
            .await?;
            return Ok(ActionOutcome::denied(reason));
        }

        self.execute_action("trigger_team_action", team_id, action_type, parameters, actor)
            .await
    }

    /// Queue an action for human approval. Always succeeds for a known
    /// team: queueing is how a caller asks instead of being told no.
    pub async fn queue_action(
        &self,
        team_id: &str,
        action_type: &str,
        parameters: serde_json::Value,
        requires_approval: bool,
        actor: &str,
    ) -> Result<PendingAction> {
        if self.supervision.read().await.teams().get(team_id).is_none() {
            return Err(WardenError::not_found("team", team_id));
        }

        let mut queue = self.queue.lock().await;
        let action = queue.queue_action(team_id, action_type, parameters, requires_approval);
        self.record_log(
            "queue_action",
            actor,
            true,
            json!({ "id": action.id, "team": team_id, "action": action_type }),
        )
        .await?;
        drop(queue);

        debug!("Queued action {} for team {}", action.id, team_id);
        Ok(action)
    }

    /// Approve a pending action.
    ///
    /// Admission is re-run at approval time because policy may have changed
    /// since the request was queued. A denial leaves the action pending so
    /// a human can retry once conditions clear.
    pub async fn approve_action(&self, id: Uuid, actor: &str) -> Result<ActionOutcome> {
        let (team_id, action_type, parameters) = {
            let queue = self.queue.lock().await;
            let action = queue
                .get(id)
                .filter(|a| a.status == ActionStatus::Pending)
                .ok_or_else(|| WardenError::not_found("pending action", id.to_string()))?;
            (
                action.team_id.clone(),
                action.action_type.clone(),
                action.parameters.clone(),
            )
        };

        let decision = self
            .can_execute_action(&team_id, &action_type, ActionSource::Interactive)
            .await?;
        if let AdmissionDecision::Denied { reason } = decision {
            self.record_log(
                "approve_action",
                actor,
                false,
                json!({ "id": id, "team": team_id, "denied": reason }),
            )
            .await?;
            return Ok(ActionOutcome::denied(reason));
        }

        // Resolve exactly once; a concurrent resolution surfaces NotFound.
        self.queue
            .lock()
            .await
            .resolve(id, ActionStatus::Approved, actor, None)?;

        self.execute_action("approve_action", &team_id, &action_type, parameters, actor)
            .await
    }

    /// Reject a pending action with a reason.
    pub async fn reject_action(&self, id: Uuid, actor: &str, reason: &str) -> Result<PendingAction> {
        let mut queue = self.queue.lock().await;
        let action = queue.resolve(id, ActionStatus::Rejected, actor, Some(reason.to_string()))?;
        self.record_log(
            "reject_action",
            actor,
            true,
            json!({ "id": id, "team": action.team_id, "reason": reason }),
        )
        .await?;
        Ok(action)
    }

    /// Shared execution step for the direct and deferred paths.
    async fn execute_action(
        &self,
        via: &str,
        team_id: &str,
        action_type: &str,
        parameters: serde_json::Value,
        actor: &str,
    ) -> Result<ActionOutcome> {
        let executed_at = Utc::now();
        let mut supervision = self.supervision.write().await;
        match supervision.teams_mut().get_mut(team_id) {
            Some(team) => team.record_run(executed_at),
            None => return Err(WardenError::not_found("team", team_id)),
        }
        self.record_log(
            via,
            actor,
            true,
            json!({ "team": team_id, "action": action_type }),
        )
        .await?;
        drop(supervision);

        Ok(ActionOutcome::executed(ExecutionReceipt {
            team_id: team_id.to_string(),
            action_type: action_type.to_string(),
            parameters,
            executed_at,
        }))
    }

    // =========================================================================
    // Credit ledger
    // =========================================================================

    /// Pure read of the budget state.
    pub async fn check_credit_limits(&self) -> CreditStatus {
        self.credit.lock().await.check_credit_limits()
    }

    /// Record actual spend.
    pub async fn record_spend(&self, amount: f64, source: &str) -> Result<SpendRecord> {
        let mut credit = self.credit.lock().await;
        let outcome = credit.record_spend(amount, source);
        self.record_log(
            "record_spend",
            source,
            outcome.is_ok(),
            json!({ "amount": amount }),
        )
        .await?;
        outcome
    }

    /// Replace the budget limits.
    pub async fn set_credit_limits(
        &self,
        daily_limit: f64,
        monthly_limit: f64,
        actor: &str,
    ) -> Result<()> {
        let mut credit = self.credit.lock().await;
        let outcome = credit.set_credit_limits(daily_limit, monthly_limit);
        self.record_log(
            "set_credit_limits",
            actor,
            outcome.is_ok(),
            json!({ "daily": daily_limit, "monthly": monthly_limit }),
        )
        .await?;
        outcome
    }

    /// Zero the daily counter (driven by the external period timer).
    pub async fn reset_daily_spend(&self, actor: &str) -> Result<()> {
        let mut credit = self.credit.lock().await;
        credit.reset_daily_spend();
        self.record_log("reset_daily_spend", actor, true, json!({})).await?;
        Ok(())
    }

    /// Zero the monthly counter (driven by the external period timer).
    pub async fn reset_monthly_spend(&self, actor: &str) -> Result<()> {
        let mut credit = self.credit.lock().await;
        credit.reset_monthly_spend();
        self.record_log("reset_monthly_spend", actor, true, json!({}))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Automation schedule
    // =========================================================================

    /// Add one automation window.
    pub async fn add_automation_window(
        &self,
        start: chrono::NaiveTime,
        end: chrono::NaiveTime,
        teams: std::collections::BTreeSet<String>,
        actions: std::collections::BTreeSet<String>,
        actor: &str,
    ) -> Result<AutomationWindow> {
        let mut scheduler = self.scheduler.write().await;
        let outcome = scheduler.add_automation_window(start, end, teams, actions);
        self.record_log(
            "add_automation_window",
            actor,
            outcome.is_ok(),
            json!({ "start": start.to_string(), "end": end.to_string() }),
        )
        .await?;
        outcome
    }

    /// Remove one automation window.
    pub async fn remove_automation_window(&self, id: Uuid, actor: &str) -> Result<AutomationWindow> {
        let mut scheduler = self.scheduler.write().await;
        let outcome = scheduler.remove_automation_window(id);
        self.record_log(
            "remove_automation_window",
            actor,
            outcome.is_ok(),
            json!({ "id": id }),
        )
        .await?;
        outcome
    }

    /// Bulk-replace the schedule.
    pub async fn set_automation_schedule(
        &self,
        enabled: bool,
        windows: Vec<WindowConfig>,
        utc_offset_minutes: i32,
        actor: &str,
    ) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        let outcome = scheduler.set_automation_schedule(enabled, windows, utc_offset_minutes);
        self.record_log(
            "set_automation_schedule",
            actor,
            outcome.is_ok(),
            json!({ "enabled": enabled }),
        )
        .await?;
        outcome
    }

    // =========================================================================
    // Agent loop
    // =========================================================================

    /// Run one bounded agent loop session for a team.
    ///
    /// Admission runs first; a denial comes back as `Denied`. Per team at
    /// most one session is in flight (`TeamBusy` otherwise) and a global
    /// semaphore bounds total concurrency. After the loop ends, actual
    /// spend is recorded and results are synced into the state store.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown teams, `Denied` for admission refusals, and
    /// configuration errors when no provider can be built. Loop-level
    /// failures are *not* errors: they return a session with
    /// `status == Failed` and partial results intact.
    pub async fn run_agent_loop(
        &self,
        team_id: &str,
        task: &str,
        options: RunOptions,
    ) -> Result<AgentLoopSession> {
        let team = self
            .config
            .team(team_id)
            .cloned()
            .ok_or_else(|| WardenError::not_found("team", team_id))?;

        let decision = self
            .can_execute_action(team_id, &options.action_type, options.source)
            .await?;
        if let AdmissionDecision::Denied { reason } = decision {
            self.record_log(
                "run_agent_loop",
                "system",
                false,
                json!({ "team": team_id, "denied": reason }),
            )
            .await?;
            return Err(WardenError::Denied(reason));
        }

        // Per-team mutual exclusion for the session's whole duration.
        {
            let mut busy = self.busy_teams.lock().await;
            if !busy.insert(team_id.to_string()) {
                let reason = DenialReason::TeamBusy {
                    team: team_id.to_string(),
                };
                self.record_log(
                    "run_agent_loop",
                    "system",
                    false,
                    json!({ "team": team_id, "denied": reason }),
                )
                .await?;
                return Err(WardenError::Denied(reason));
            }
        }

        let result = self.run_session_inner(&team, task, &options).await;
        self.busy_teams.lock().await.remove(team_id);
        result
    }

    async fn run_session_inner(
        &self,
        team: &TeamConfig,
        task: &str,
        options: &RunOptions,
    ) -> Result<AgentLoopSession> {
        let _permit = self
            .session_permits
            .acquire()
            .await
            .map_err(|_| WardenError::config("session semaphore closed"))?;

        let provider = match &options.provider_override {
            Some(provider) => provider.clone(),
            None => {
                let api_key = std::env::var(&self.config.llm.api_key_env).ok();
                create_provider(&self.config.llm, api_key)?
            }
        };

        self.record_log(
            "run_agent_loop",
            "system",
            true,
            json!({ "team": team.id, "task": task }),
        )
        .await?;

        let context = StateContext {
            credit: self.check_credit_limits().await,
            open_tasks: self.store.open_task_count(&team.id).await?,
            pending_approvals: self.queue.lock().await.pending().len() as u64,
        };

        let max_iterations = options
            .max_iterations
            .unwrap_or(self.config.loop_bounds.max_iterations);
        let engine = AgentLoopEngine::new(
            provider.clone(),
            max_iterations,
            self.config.loop_bounds.max_retries,
        );

        let session = engine
            .run(team, task, &context, options.sink.as_ref(), &options.cancel)
            .await;

        // Real cost lands after the session, win or lose.
        let cost = estimate_cost(
            provider.model(),
            TokenUsage {
                input_tokens: session.usage.input_tokens,
                output_tokens: session.usage.output_tokens,
            },
        );
        if cost > 0.0 {
            self.record_spend(cost, &format!("agent_loop:{}", team.id))
                .await?;
        }

        let report = self.state_sync.sync_from_agent_loop(&session).await?;
        debug!(
            "Session {} synced: {:?}",
            session.session_id, report
        );

        Ok(session)
    }

    /// Run every team on the same task in bounded parallel batches with a
    /// short delay between batches.
    ///
    /// Each team's denial or failure is reported in its slot; one team's
    /// "no" never stops the others.
    pub async fn run_all_teams(&self, task: &str, options: RunOptions) -> Vec<TeamRunResult> {
        let team_ids: Vec<String> = self.config.teams.iter().map(|t| t.id.clone()).collect();
        let batch_size = self.config.concurrency.max_concurrent_sessions.max(1);
        let mut results = Vec::with_capacity(team_ids.len());

        for (batch_index, batch) in team_ids.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.concurrency.batch_delay_ms,
                ))
                .await;
            }
            let runs = batch.iter().map(|team_id| {
                let options = options.clone();
                async move {
                    TeamRunResult {
                        team_id: team_id.clone(),
                        result: self.run_agent_loop(team_id, task, options).await,
                    }
                }
            });
            results.extend(futures::future::join_all(runs).await);
        }
        results
    }

    // =========================================================================
    // Read-only snapshots
    // =========================================================================

    /// Global safety snapshot.
    pub async fn world_status(&self) -> WorldStatus {
        self.supervision.read().await.world_status()
    }

    /// One team's control record.
    pub async fn team_status(&self, team_id: &str) -> Result<TeamControl> {
        self.supervision.read().await.team_status(team_id)
    }

    /// Every team's control record, in registry order.
    pub async fn all_team_statuses(&self) -> Vec<TeamControl> {
        self.supervision
            .read()
            .await
            .teams()
            .iter()
            .cloned()
            .collect()
    }

    /// Still-pending actions, oldest first.
    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.queue.lock().await.pending()
    }

    /// Most recent control-log entries, oldest first.
    pub async fn control_log(&self, limit: usize) -> Vec<ControlLogEntry> {
        self.log.lock().await.tail(limit)
    }

    /// Append one control-log entry. Callers hold the mutated aggregate's
    /// lock so entries land in acceptance order.
    async fn record_log(
        &self,
        action: &str,
        actor: &str,
        success: bool,
        detail: serde_json::Value,
    ) -> Result<()> {
        self.log.lock().await.record(action, actor, success, detail)?;
        Ok(())
    }
}
