//! Merging agent loop output back into the team state store.
//!
//! `StateSync` commits whatever a session actually produced into the
//! external [`TeamStateStore`] and updates the team's run bookkeeping.
//! Partial, exhausted, and failed sessions commit exactly what they have;
//! nothing is ever rolled back or discarded. Replays are idempotent: every
//! record carries a stable id and a session is only counted once.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::control::Supervision;
use crate::engine::session::{AgentLoopSession, DecisionRecord, MessageRecord, TaskRecord};
use crate::error::Result;

/// External store for tasks, decisions, and messages a UI reads.
///
/// Append methods return `false` when the record id was already present,
/// so replaying a sync cannot double-insert.
#[async_trait]
pub trait TeamStateStore: Send + Sync {
    async fn append_task(&self, task: &TaskRecord) -> Result<bool>;
    async fn append_decision(&self, decision: &DecisionRecord) -> Result<bool>;
    async fn append_message(&self, message: &MessageRecord) -> Result<bool>;

    /// How many tasks a team currently has, for the state-context snapshot.
    async fn open_task_count(&self, team_id: &str) -> Result<u64>;
}

/// In-memory reference implementation of [`TeamStateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tasks: Vec<TaskRecord>,
    decisions: Vec<DecisionRecord>,
    messages: Vec<MessageRecord>,
    seen: HashSet<Uuid>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks stored for a team.
    pub async fn tasks_for(&self, team_id: &str) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id)
            .cloned()
            .collect()
    }

    /// Decisions stored for a team.
    pub async fn decisions_for(&self, team_id: &str) -> Vec<DecisionRecord> {
        self.inner
            .lock()
            .await
            .decisions
            .iter()
            .filter(|d| d.team_id == team_id)
            .cloned()
            .collect()
    }

    /// Messages stored for a team.
    pub async fn messages_for(&self, team_id: &str) -> Vec<MessageRecord> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect()
    }

    /// Total records across all teams.
    pub async fn record_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.tasks.len() + inner.decisions.len() + inner.messages.len()
    }
}

#[async_trait]
impl TeamStateStore for InMemoryStateStore {
    async fn append_task(&self, task: &TaskRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(task.id) {
            return Ok(false);
        }
        inner.tasks.push(task.clone());
        Ok(true)
    }

    async fn append_decision(&self, decision: &DecisionRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(decision.id) {
            return Ok(false);
        }
        inner.decisions.push(decision.clone());
        Ok(true)
    }

    async fn append_message(&self, message: &MessageRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.seen.insert(message.id) {
            return Ok(false);
        }
        inner.messages.push(message.clone());
        Ok(true)
    }

    async fn open_task_count(&self, team_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id)
            .count() as u64)
    }
}

/// What one sync pass committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub tasks_added: usize,
    pub decisions_added: usize,
    pub messages_added: usize,
    pub duplicates_skipped: usize,
    /// Whether the team's last_run/run_count were updated this pass.
    pub team_run_recorded: bool,
}

/// Commits session results into the store and team bookkeeping.
pub struct StateSync {
    supervision: Arc<RwLock<Supervision>>,
    store: Arc<dyn TeamStateStore>,
    synced_sessions: Mutex<HashSet<Uuid>>,
}

impl StateSync {
    /// Create a sync worker over the given supervision state and store.
    #[must_use]
    pub fn new(supervision: Arc<RwLock<Supervision>>, store: Arc<dyn TeamStateStore>) -> Self {
        Self {
            supervision,
            store,
            synced_sessions: Mutex::new(HashSet::new()),
        }
    }

    /// Merge one session's output.
    ///
    /// Tolerates partial/exhausted/failed sessions by committing exactly
    /// what was produced. Re-syncing the same session is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates store failures; records committed before the failure stay
    /// committed.
    pub async fn sync_from_agent_loop(&self, session: &AgentLoopSession) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let first_sync = self
            .synced_sessions
            .lock()
            .await
            .insert(session.session_id);
        if !first_sync {
            debug!(
                "Session {} already synced, skipping",
                session.session_id
            );
            return Ok(report);
        }

        for task in &session.tasks_created {
            if self.store.append_task(task).await? {
                report.tasks_added += 1;
            } else {
                report.duplicates_skipped += 1;
            }
        }
        for decision in &session.decisions_created {
            if self.store.append_decision(decision).await? {
                report.decisions_added += 1;
            } else {
                report.duplicates_skipped += 1;
            }
        }
        for message in &session.messages_sent {
            if self.store.append_message(message).await? {
                report.messages_added += 1;
            } else {
                report.duplicates_skipped += 1;
            }
        }

        let run_at = session.finished_at.unwrap_or(session.started_at);
        let mut supervision = self.supervision.write().await;
        match supervision.teams_mut().get_mut(&session.team_id) {
            Some(team) => {
                team.record_run(run_at);
                report.team_run_recorded = true;
            }
            None => {
                warn!(
                    "Synced session for unknown team '{}'; run not recorded",
                    session.team_id
                );
            }
        }

        debug!(
            "Synced session {}: +{} tasks, +{} decisions, +{} messages",
            session.session_id, report.tasks_added, report.decisions_added, report.messages_added
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::engine::session::SessionStatus;
    use chrono::Utc;

    fn session_with_outputs(team_id: &str) -> AgentLoopSession {
        let mut session = AgentLoopSession::new(team_id, "task");
        session.tasks_created.push(TaskRecord {
            id: Uuid::new_v4(),
            team_id: team_id.to_string(),
            title: "Write docs".to_string(),
            description: None,
            priority: None,
            created_at: Utc::now(),
        });
        session.decisions_created.push(DecisionRecord {
            id: Uuid::new_v4(),
            team_id: team_id.to_string(),
            title: "Choose stack".to_string(),
            options: vec!["a".into(), "b".into()],
            recommendation: Some("a".into()),
            created_at: Utc::now(),
        });
        session.messages_sent.push(MessageRecord {
            id: Uuid::new_v4(),
            team_id: team_id.to_string(),
            to: Some("ops".into()),
            subject: None,
            body: "heads up".to_string(),
            created_at: Utc::now(),
        });
        session.finish(SessionStatus::Completed);
        session
    }

    fn sync_fixture() -> (StateSync, Arc<RwLock<Supervision>>, Arc<InMemoryStateStore>) {
        let supervision = Arc::new(RwLock::new(Supervision::new(
            &WardenConfig::default().teams,
            "CODE",
        )));
        let store = Arc::new(InMemoryStateStore::new());
        let sync = StateSync::new(supervision.clone(), store.clone());
        (sync, supervision, store)
    }

    #[tokio::test]
    async fn test_sync_commits_all_outputs() {
        let (sync, supervision, store) = sync_fixture();
        let session = session_with_outputs("developer");

        let report = sync.sync_from_agent_loop(&session).await.unwrap();
        assert_eq!(report.tasks_added, 1);
        assert_eq!(report.decisions_added, 1);
        assert_eq!(report.messages_added, 1);
        assert!(report.team_run_recorded);

        assert_eq!(store.tasks_for("developer").await.len(), 1);
        assert_eq!(store.decisions_for("developer").await.len(), 1);
        assert_eq!(store.messages_for("developer").await.len(), 1);

        let team = supervision.read().await.team_status("developer").unwrap();
        assert_eq!(team.run_count, 1);
        assert!(team.last_run.is_some());
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let (sync, supervision, store) = sync_fixture();
        let session = session_with_outputs("developer");

        sync.sync_from_agent_loop(&session).await.unwrap();
        let second = sync.sync_from_agent_loop(&session).await.unwrap();

        assert_eq!(second, SyncReport::default());
        assert_eq!(store.record_count().await, 3);
        let team = supervision.read().await.team_status("developer").unwrap();
        assert_eq!(team.run_count, 1);
    }

    #[tokio::test]
    async fn test_partial_failed_session_commits_what_exists() {
        let (sync, _, store) = sync_fixture();
        let mut session = AgentLoopSession::new("sales", "task");
        session.tasks_created.push(TaskRecord {
            id: Uuid::new_v4(),
            team_id: "sales".to_string(),
            title: "partial".to_string(),
            description: None,
            priority: None,
            created_at: Utc::now(),
        });
        session.failure = Some("provider exploded".to_string());
        session.finish(SessionStatus::Failed);

        let report = sync.sync_from_agent_loop(&session).await.unwrap();
        assert_eq!(report.tasks_added, 1);
        assert_eq!(store.tasks_for("sales").await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_dedups_by_record_id() {
        let store = InMemoryStateStore::new();
        let task = TaskRecord {
            id: Uuid::new_v4(),
            team_id: "x".into(),
            title: "t".into(),
            description: None,
            priority: None,
            created_at: Utc::now(),
        };
        assert!(store.append_task(&task).await.unwrap());
        assert!(!store.append_task(&task).await.unwrap());
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_team_tolerated() {
        let (sync, _, store) = sync_fixture();
        let session = session_with_outputs("ghost");

        let report = sync.sync_from_agent_loop(&session).await.unwrap();
        assert!(!report.team_run_recorded);
        // Outputs are still committed.
        assert_eq!(store.tasks_for("ghost").await.len(), 1);
    }
}
