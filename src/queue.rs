//! Pending actions awaiting human approval.
//!
//! Queueing is the deliberate "ask a human" path, distinct from attempting
//! an action and being denied. A [`PendingAction`] transitions exactly once
//! out of `Pending`; approving or rejecting an already-resolved id is
//! refused without re-applying anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};

/// Lifecycle of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A queued request for human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub team_id: String,
    pub action_type: String,
    pub parameters: serde_json::Value,
    pub requires_approval: bool,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    /// Free-text note attached at resolution (rejection reason, etc.).
    pub resolution_note: Option<String>,
}

/// In-memory store of pending actions, in arrival order.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Vec<PendingAction>,
}

impl ActionQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally queue an action for approval.
    pub fn queue_action(
        &mut self,
        team_id: impl Into<String>,
        action_type: impl Into<String>,
        parameters: serde_json::Value,
        requires_approval: bool,
    ) -> PendingAction {
        let action = PendingAction {
            id: Uuid::new_v4(),
            team_id: team_id.into(),
            action_type: action_type.into(),
            parameters,
            requires_approval,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
        };
        self.actions.push(action.clone());
        action
    }

    /// Look up an action by id, pending or resolved.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&PendingAction> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Resolve a pending action exactly once.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the id is unknown *or* the action has already
    /// been resolved; the effect is never double-applied.
    pub fn resolve(
        &mut self,
        id: Uuid,
        status: ActionStatus,
        resolved_by: impl Into<String>,
        note: Option<String>,
    ) -> Result<PendingAction> {
        debug_assert_ne!(status, ActionStatus::Pending);
        let action = self
            .actions
            .iter_mut()
            .find(|a| a.id == id && a.status == ActionStatus::Pending)
            .ok_or_else(|| WardenError::not_found("pending action", id.to_string()))?;

        action.status = status;
        action.resolved_at = Some(Utc::now());
        action.resolved_by = Some(resolved_by.into());
        action.resolution_note = note;
        Ok(action.clone())
    }

    /// Reject every still-pending action in one sweep.
    ///
    /// Used by the emergency stop so no approval can fire into a stopped
    /// world. Returns the ids that were rejected.
    pub fn reject_all_pending(
        &mut self,
        resolved_by: impl Into<String>,
        note: impl Into<String>,
    ) -> Vec<Uuid> {
        let resolved_by = resolved_by.into();
        let note = note.into();
        let now = Utc::now();
        let mut rejected = Vec::new();
        for action in &mut self.actions {
            if action.status == ActionStatus::Pending {
                action.status = ActionStatus::Rejected;
                action.resolved_at = Some(now);
                action.resolved_by = Some(resolved_by.clone());
                action.resolution_note = Some(note.clone());
                rejected.push(action.id);
            }
        }
        rejected
    }

    /// All still-pending actions, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingAction> {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect()
    }

    /// Every action ever queued, oldest first.
    #[must_use]
    pub fn all(&self) -> &[PendingAction] {
        &self.actions
    }
}
