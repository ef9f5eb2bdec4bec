//! Ephemeral session state for one agent loop invocation.
//!
//! A session is created per invocation, accumulates structured outputs and
//! usage while the loop runs, and is discarded after `StateSync` consumes
//! it. Whatever was produced before a failure or exhaustion stays in the
//! session; partial results are returned, never discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::CreditStatus;
use crate::provider::ToolCall;

/// Terminal state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The model called `mark_complete`.
    Completed,
    /// The iteration cap was reached before completion.
    Exhausted,
    /// An unrecoverable provider error ended the session.
    Failed,
    /// The cancel flag was observed at an iteration boundary.
    Cancelled,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A task the agent created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub team_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A decision the agent recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub team_id: String,
    pub title: String,
    pub options: Vec<String>,
    pub recommendation: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message the agent sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub team_id: String,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Accumulated provider usage for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub api_calls: u32,
}

/// Snapshot of real-world constraints included in the system prompt so the
/// model reasons about them instead of hallucinating headroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateContext {
    pub credit: CreditStatus,
    pub open_tasks: u64,
    pub pending_approvals: u64,
}

impl StateContext {
    /// Render the snapshot as a compact prompt section.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Current constraints:\n\
             - Budget: ${:.2} of ${:.2} spent today (status: {})\n\
             - Open tasks: {}\n\
             - Actions awaiting human approval: {}\n\
             Work within these constraints. Call mark_complete with a summary \
             when the task is done.",
            self.credit.daily_spend,
            self.credit.daily_limit,
            self.credit.state,
            self.open_tasks,
            self.pending_approvals,
        )
    }
}

/// Everything one agent loop invocation produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopSession {
    pub session_id: Uuid,
    pub team_id: String,
    pub task: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCall>,
    pub tasks_created: Vec<TaskRecord>,
    pub decisions_created: Vec<DecisionRecord>,
    pub messages_sent: Vec<MessageRecord>,
    pub text_responses: Vec<String>,
    pub completed: bool,
    pub completion_summary: Option<String>,
    pub usage: SessionUsage,
    /// Present when `status == Failed`.
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentLoopSession {
    /// Start a fresh session.
    #[must_use]
    pub fn new(team_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            team_id: team_id.into(),
            task: task.into(),
            status: SessionStatus::Exhausted,
            iterations: 0,
            tool_calls: Vec::new(),
            tasks_created: Vec::new(),
            decisions_created: Vec::new(),
            messages_sent: Vec::new(),
            text_responses: Vec::new(),
            completed: false,
            completion_summary: None,
            usage: SessionUsage::default(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Seal the session with its terminal status.
    pub fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Total structured outputs produced.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.tasks_created.len() + self.decisions_created.len() + self.messages_sent.len()
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} session for '{}': {} iteration(s), {} task(s), {} decision(s), {} message(s), {} API call(s)",
            self.status,
            self.team_id,
            self.iterations,
            self.tasks_created.len(),
            self.decisions_created.len(),
            self.messages_sent.len(),
            self.usage.api_calls,
        )
    }
}
