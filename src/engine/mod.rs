//! The bounded, cancellable agent loop.
//!
//! One invocation of [`AgentLoopEngine::run`] performs a single unit of
//! delegated work for one team: it iterates against the provider with the
//! team's role prompt, the running transcript, a state-context snapshot,
//! and the declared tool schema, applying each returned tool call locally
//! and feeding the result back into the transcript so the next iteration
//! observes the outcome.
//!
//! # Session lifecycle
//!
//! ```text
//! STARTED ──► ITERATING ──► ITERATING ──► ... ──► COMPLETED  (mark_complete)
//!                │                                EXHAUSTED  (iteration cap)
//!                │                                FAILED     (provider error)
//!                └── cancel flag at iteration top ─► CANCELLED
//! ```
//!
//! Partial results survive every terminal state. The engine enforces a hard
//! iteration ceiling regardless of what the caller asks for, bounding the
//! cost of any single session.

pub mod events;
pub mod session;

pub use events::{ChannelSink, CollectingSink, EventSink, LoopEvent, NullSink};
pub use session::{
    AgentLoopSession, DecisionRecord, MessageRecord, SessionStatus, SessionUsage, StateContext,
    TaskRecord,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TeamConfig;
use crate::provider::{
    send_with_retry, ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolSpec,
};

/// Hard cap on iterations per session, applied over any caller request.
pub const MAX_ITERATION_CEILING: u32 = 25;

/// Output budget per provider call.
const MAX_TOKENS_PER_CALL: u32 = 1024;

/// Cooperative cancellation flag for a running session.
///
/// Cancellation is observed at the top of each iteration; an in-flight
/// provider call is never interrupted mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an un-cancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The tool schema declared to the model on every iteration.
#[must_use]
pub fn tool_schema() -> Vec<ToolSpec> {
    let object = |properties: serde_json::Value, required: &[&str]| {
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    };

    vec![
        ToolSpec {
            name: "create_task".to_string(),
            description: "Create a task on the team's board.".to_string(),
            parameters: object(
                json!({
                    "title": {"type": "string", "description": "Short task title"},
                    "description": {"type": "string"},
                    "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                }),
                &["title"],
            ),
        },
        ToolSpec {
            name: "create_decision".to_string(),
            description: "Record a decision that needs to be made, with options.".to_string(),
            parameters: object(
                json!({
                    "title": {"type": "string", "description": "What needs deciding"},
                    "options": {"type": "array", "items": {"type": "string"}},
                    "recommendation": {"type": "string"},
                }),
                &["title"],
            ),
        },
        ToolSpec {
            name: "send_message".to_string(),
            description: "Send a message to a person or another team.".to_string(),
            parameters: object(
                json!({
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                }),
                &["body"],
            ),
        },
        ToolSpec {
            name: "mark_complete".to_string(),
            description: "Mark the delegated task as finished with a summary of what was done."
                .to_string(),
            parameters: object(
                json!({
                    "summary": {"type": "string"},
                }),
                &["summary"],
            ),
        },
    ]
}

/// Runs one bounded tool-use session against a provider.
pub struct AgentLoopEngine {
    provider: Arc<dyn LlmProvider>,
    max_iterations: u32,
    max_retries: u32,
}

impl AgentLoopEngine {
    /// Create an engine for the given provider.
    ///
    /// `max_iterations` is clamped to [`MAX_ITERATION_CEILING`].
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, max_iterations: u32, max_retries: u32) -> Self {
        Self {
            provider,
            max_iterations: max_iterations.min(MAX_ITERATION_CEILING),
            max_retries,
        }
    }

    /// The effective iteration cap after clamping.
    #[must_use]
    pub fn iteration_cap(&self) -> u32 {
        self.max_iterations
    }

    /// Run one session to a terminal state.
    ///
    /// Never returns an error: provider failures, exhaustion, and
    /// cancellation all land in the returned session's `status`, with
    /// whatever partial results accumulated before the end.
    pub async fn run(
        &self,
        team: &TeamConfig,
        task: &str,
        context: &StateContext,
        sink: &dyn EventSink,
        cancel: &CancelHandle,
    ) -> AgentLoopSession {
        let mut session = AgentLoopSession::new(team.id.clone(), task);
        sink.emit(LoopEvent::SessionStarted {
            team_id: team.id.clone(),
            task: task.to_string(),
        });
        info!(
            "Agent loop started: team={} cap={} provider={}",
            team.id,
            self.max_iterations,
            self.provider.name()
        );

        let system_prompt = format!("{}\n\n{}", team.role_prompt, context.render());
        let tools = tool_schema();
        let mut transcript = vec![ChatMessage::user(format!("Task: {task}"))];

        let status = loop {
            if cancel.is_cancelled() {
                info!("Agent loop cancelled: team={}", team.id);
                break SessionStatus::Cancelled;
            }
            if session.iterations >= self.max_iterations {
                break if session.completed {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Exhausted
                };
            }

            let iteration = session.iterations + 1;
            sink.emit(LoopEvent::IterationStarted { iteration });

            let request = CompletionRequest {
                system_prompt: system_prompt.clone(),
                messages: transcript.clone(),
                tools: tools.clone(),
                max_tokens: MAX_TOKENS_PER_CALL,
            };

            let reply = match send_with_retry(self.provider.as_ref(), &request, self.max_retries)
                .await
            {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("Agent loop failed: team={} error={}", team.id, err);
                    session.failure = Some(err.to_string());
                    break SessionStatus::Failed;
                }
            };

            session.usage.api_calls += 1;
            session.usage.input_tokens += reply.usage.input_tokens;
            session.usage.output_tokens += reply.usage.output_tokens;

            if let Some(text) = reply.text.clone() {
                transcript.push(ChatMessage::assistant(text.clone()));
                session.text_responses.push(text);
            }

            let had_tool_calls = !reply.tool_calls.is_empty();
            // Tool calls apply strictly in provider-returned order.
            for call in reply.tool_calls {
                sink.emit(LoopEvent::ToolCall {
                    iteration,
                    call: call.clone(),
                });

                let outcome = apply_tool_call(&mut session, &call, sink);
                let (ok, detail) = match outcome {
                    Ok(detail) => (true, detail),
                    Err(detail) => (false, detail),
                };
                debug!(
                    "Tool call {} ({}) -> ok={} {}",
                    call.name, call.id, ok, detail
                );
                transcript.push(ChatMessage::tool_result(call.id.clone(), detail.clone()));
                sink.emit(LoopEvent::ToolResult {
                    iteration,
                    call_id: call.id.clone(),
                    ok,
                    detail,
                });
                session.tool_calls.push(call);
            }

            session.iterations = iteration;
            sink.emit(LoopEvent::IterationCompleted {
                iteration,
                usage: reply.usage,
            });

            if session.completed {
                break SessionStatus::Completed;
            }
            if !had_tool_calls {
                // Text-only turn: nudge toward tools so the transcript moves.
                transcript.push(ChatMessage::user(
                    "Continue with the task. Use the provided tools; call \
                     mark_complete when finished."
                        .to_string(),
                ));
            }
        };

        session.finish(status);
        sink.emit(LoopEvent::SessionFinished {
            status,
            iterations: session.iterations,
        });
        info!("{}", session.summary());
        session
    }
}

/// Validate and apply one tool call's local effect.
///
/// Returns the tool result text fed back to the model: `Ok` for applied
/// effects, `Err` for validation failures (which do not end the session).
fn apply_tool_call(
    session: &mut AgentLoopSession,
    call: &ToolCall,
    sink: &dyn EventSink,
) -> Result<String, String> {
    let str_arg = |key: &str| -> Option<String> {
        call.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };

    match call.name.as_str() {
        "create_task" => {
            let title = str_arg("title").ok_or("create_task requires a non-empty 'title'")?;
            let task = TaskRecord {
                id: Uuid::new_v4(),
                team_id: session.team_id.clone(),
                title,
                description: str_arg("description"),
                priority: str_arg("priority"),
                created_at: Utc::now(),
            };
            let id = task.id;
            sink.emit(LoopEvent::TaskCreated { task: task.clone() });
            session.tasks_created.push(task);
            Ok(format!("Created task {id}"))
        }
        "create_decision" => {
            let title = str_arg("title").ok_or("create_decision requires a non-empty 'title'")?;
            let options = call
                .arguments
                .get("options")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(ToString::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let decision = DecisionRecord {
                id: Uuid::new_v4(),
                team_id: session.team_id.clone(),
                title,
                options,
                recommendation: str_arg("recommendation"),
                created_at: Utc::now(),
            };
            let id = decision.id;
            sink.emit(LoopEvent::DecisionCreated {
                decision: decision.clone(),
            });
            session.decisions_created.push(decision);
            Ok(format!("Recorded decision {id}"))
        }
        "send_message" => {
            let body = str_arg("body").ok_or("send_message requires a non-empty 'body'")?;
            let message = MessageRecord {
                id: Uuid::new_v4(),
                team_id: session.team_id.clone(),
                to: str_arg("to"),
                subject: str_arg("subject"),
                body,
                created_at: Utc::now(),
            };
            let id = message.id;
            sink.emit(LoopEvent::MessageSent {
                message: message.clone(),
            });
            session.messages_sent.push(message);
            Ok(format!("Sent message {id}"))
        }
        "mark_complete" => {
            let summary = str_arg("summary").unwrap_or_else(|| "completed".to_string());
            session.completed = true;
            session.completion_summary = Some(summary);
            Ok("Task marked complete".to_string())
        }
        other => Err(format!("unknown tool '{other}'")),
    }
}
