//! Warden - Orchestration Control Plane for Agent Teams
//!
//! Warden decides **when and how** autonomous LLM-backed agent teams are
//! permitted to act, and runs the bounded tool-use loop that carries out one
//! unit of delegated work under that decision.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`control`] - Global world state machine, emergency stop, team
//!   controls, and the append-only control log
//! - [`credit`] - Spend tracking and the budget admission gate
//! - [`queue`] - Actions queued for human approval
//! - [`schedule`] - Time windows gating unattended execution
//! - [`plane`] - The facade composing admission, execution paths, and loops
//! - [`engine`] - The iteration-bounded, cancellable agent loop
//! - [`provider`] - Normalized multi-provider LLM adapters
//! - [`sync`] - Merging loop output into the team state store
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error taxonomy separating policy denials from failures
//!
//! # Example
//!
//! ```rust,ignore
//! use warden::config::WardenConfig;
//! use warden::plane::{ActionSource, ControlPlane, RunOptions};
//! use warden::control::WorldState;
//!
//! let plane = ControlPlane::new(WardenConfig::load("warden.toml")?)?;
//! plane.set_world_state(WorldState::SemiAuto, "operator").await?;
//!
//! let decision = plane
//!     .can_execute_action("developer", "deploy", ActionSource::Scheduled)
//!     .await?;
//! if decision.is_allowed() {
//!     let session = plane
//!         .run_agent_loop("developer", "Prepare the release", RunOptions::default())
//!         .await?;
//!     println!("{}", session.summary());
//! }
//! ```

pub mod config;
pub mod control;
pub mod credit;
pub mod engine;
pub mod error;
pub mod plane;
pub mod provider;
pub mod queue;
pub mod schedule;
pub mod sync;

// Re-export commonly used types
pub use error::{DenialReason, Result, WardenError};

pub use config::{LlmConfig, TeamConfig, WardenConfig};

pub use control::{
    AutomationLevel, ControlLog, ControlLogEntry, EmergencyStop, Supervision, TeamCascade,
    TeamControl, TeamStatus, WorldState, WorldStatus, WorldTransition,
};

pub use credit::{BudgetState, CreditLedger, CreditStatus, SpendRecord};

pub use queue::{ActionQueue, ActionStatus, PendingAction};

pub use schedule::{AutomationScheduler, AutomationWindow};

pub use plane::{
    ActionOutcome, ActionSource, AdmissionDecision, ControlPlane, ExecutionReceipt, RunOptions,
    TeamRunResult,
};

pub use engine::{
    AgentLoopEngine, AgentLoopSession, CancelHandle, ChannelSink, CollectingSink, EventSink,
    LoopEvent, NullSink, SessionStatus, StateContext, MAX_ITERATION_CEILING,
};

pub use provider::{
    create_provider, AnthropicProvider, CompletionRequest, LlmProvider, MockProvider,
    OpenAiProvider, ProviderError, ProviderReply, TokenUsage, ToolCall, ToolSpec,
};

pub use sync::{InMemoryStateStore, StateSync, SyncReport, TeamStateStore};
