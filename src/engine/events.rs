//! Live event timeline for agent loop sessions.
//!
//! The engine emits one event per sub-step so an observer never sees
//! silence during long-running work. Events flow into a caller-supplied
//! [`EventSink`]; emission order is the order things happened and every
//! sink implementation must preserve it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::session::{DecisionRecord, MessageRecord, SessionStatus, TaskRecord};
use crate::provider::{TokenUsage, ToolCall};

/// One timeline event from a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    SessionStarted {
        team_id: String,
        task: String,
    },
    IterationStarted {
        iteration: u32,
    },
    ToolCall {
        iteration: u32,
        call: ToolCall,
    },
    ToolResult {
        iteration: u32,
        call_id: String,
        ok: bool,
        detail: String,
    },
    TaskCreated {
        task: TaskRecord,
    },
    DecisionCreated {
        decision: DecisionRecord,
    },
    MessageSent {
        message: MessageRecord,
    },
    IterationCompleted {
        iteration: u32,
        usage: TokenUsage,
    },
    SessionFinished {
        status: SessionStatus,
        iterations: u32,
    },
}

impl LoopEvent {
    /// Short name for logging and filtering.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::IterationStarted { .. } => "iteration_started",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::TaskCreated { .. } => "task_created",
            Self::DecisionCreated { .. } => "decision_created",
            Self::MessageSent { .. } => "message_sent",
            Self::IterationCompleted { .. } => "iteration_completed",
            Self::SessionFinished { .. } => "session_finished",
        }
    }
}

/// Destination for session events.
///
/// `emit` is synchronous and must not block the loop; a sink bridging to a
/// slow consumer should buffer internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LoopEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LoopEvent) {}
}

/// Collects events in memory, preserving order. Primarily for tests and
/// post-hoc inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LoopEvent>>,
}

impl CollectingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<LoopEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event kinds in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(LoopEvent::kind).collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: LoopEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Forwards events into a bounded tokio channel for a transport consumer.
///
/// Events delivered keep their order; if the consumer falls so far behind
/// that the channel fills, the event is dropped with a warning rather than
/// stalling the loop.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: tokio::sync::mpsc::Sender<LoopEvent>,
}

impl ChannelSink {
    /// Wrap a bounded sender.
    #[must_use]
    pub fn new(sender: tokio::sync::mpsc::Sender<LoopEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LoopEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Event sink channel full or closed, dropping event: {}", e);
        }
    }
}
