//! Custom error types for Warden.
//!
//! This module provides structured error types that separate routine policy
//! denials from real failures, so callers can react to a "no" without
//! treating it as an exception.

use thiserror::Error;

use crate::provider::ProviderError;

/// Machine-readable reason an admission check denied execution.
///
/// Denials are the expected, high-frequency outcome of admission control.
/// Every variant carries enough information for the caller to decide whether
/// to queue the action for approval, wait, or give up.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// The emergency stop interlock is engaged.
    #[error("emergency stop is active")]
    EmergencyStop,

    /// The global world state is PAUSED.
    #[error("world is paused")]
    WorldPaused,

    /// The team itself is paused.
    #[error("team '{team}' is paused")]
    TeamPaused { team: String },

    /// Resume refused because the global pause takes precedence.
    #[error("blocked by global pause")]
    BlockedByGlobalPause,

    /// Daily or monthly spend limit reached.
    #[error("credit limit exceeded")]
    CreditExceeded,

    /// The team's automation level does not permit unattended execution.
    #[error("team '{team}' requires approval (automation level: {level})")]
    RequiresApproval { team: String, level: String },

    /// The action type is not in the team's allowed-action set.
    #[error("action '{action}' is not allowed for team '{team}'")]
    ActionNotAllowed { team: String, action: String },

    /// The current time falls outside every matching automation window.
    #[error("outside automation window")]
    OutsideWindow,

    /// A session for this team is already in flight.
    #[error("team '{team}' already has a running session")]
    TeamBusy { team: String },
}

impl DenialReason {
    /// Check whether queueing the action for human approval is a sensible
    /// next step for the caller.
    ///
    /// Safety interlocks (emergency stop, global pause) should not be worked
    /// around by queueing; policy denials can be.
    #[must_use]
    pub fn can_queue_for_approval(&self) -> bool {
        matches!(
            self,
            Self::RequiresApproval { .. } | Self::OutsideWindow | Self::ActionNotAllowed { .. }
        )
    }

    /// Check whether this denial is transient and may clear on its own
    /// (budget rollover, window opening, session finishing).
    #[must_use]
    pub fn may_clear_without_intervention(&self) -> bool {
        matches!(
            self,
            Self::CreditExceeded | Self::OutsideWindow | Self::TeamBusy { .. }
        )
    }
}

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Input rejected before any mutation took place.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Referenced entity does not exist (or is no longer resolvable).
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    // =========================================================================
    // Policy Denials
    // =========================================================================
    /// Admission control said no. Routine, not exceptional.
    #[error("denied: {0}")]
    Denied(DenialReason),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// The LLM provider call failed in a way the session cannot recover from.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load or validate configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check whether this error is a policy denial rather than a failure.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    /// Check whether the input was at fault (no state changed).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Config { .. }
        )
    }
}

/// Type alias for Warden results.
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_display() {
        let reason = DenialReason::TeamPaused {
            team: "developer".into(),
        };
        assert!(reason.to_string().contains("developer"));
        assert!(WardenError::Denied(reason).to_string().contains("denied"));
    }

    #[test]
    fn test_denial_can_queue() {
        assert!(DenialReason::OutsideWindow.can_queue_for_approval());
        assert!(DenialReason::RequiresApproval {
            team: "sales".into(),
            level: "manual".into()
        }
        .can_queue_for_approval());
        assert!(!DenialReason::EmergencyStop.can_queue_for_approval());
        assert!(!DenialReason::WorldPaused.can_queue_for_approval());
    }

    #[test]
    fn test_denial_may_clear() {
        assert!(DenialReason::CreditExceeded.may_clear_without_intervention());
        assert!(DenialReason::TeamBusy {
            team: "support".into()
        }
        .may_clear_without_intervention());
        assert!(!DenialReason::EmergencyStop.may_clear_without_intervention());
    }

    #[test]
    fn test_denial_serializes_with_kind_tag() {
        let json = serde_json::to_string(&DenialReason::CreditExceeded).unwrap();
        assert!(json.contains("credit_exceeded"));

        let json = serde_json::to_string(&DenialReason::ActionNotAllowed {
            team: "developer".into(),
            action: "deploy".into(),
        })
        .unwrap();
        assert!(json.contains("action_not_allowed"));
        assert!(json.contains("deploy"));
    }

    #[test]
    fn test_is_denial() {
        assert!(WardenError::Denied(DenialReason::WorldPaused).is_denial());
        assert!(!WardenError::validation("amount", "must be positive").is_denial());
    }

    #[test]
    fn test_is_client_error() {
        assert!(WardenError::validation("state", "unknown").is_client_error());
        assert!(WardenError::not_found("team", "ghost").is_client_error());
        assert!(!WardenError::Denied(DenialReason::WorldPaused).is_client_error());
    }

    #[test]
    fn test_not_found_display() {
        let err = WardenError::not_found("pending action", "1234");
        assert_eq!(err.to_string(), "pending action not found: 1234");
    }
}
