//! Credit ledger: the monetary admission gate.
//!
//! The ledger tracks daily and monthly spend against configured limits. It
//! is a pure data structure with no internal clock; period rollover is
//! driven by an external timer calling [`CreditLedger::reset_daily_spend`]
//! and [`CreditLedger::reset_monthly_spend`], which keeps it deterministic
//! under test.
//!
//! Spend is usually known only after a provider call completes, so
//! [`CreditLedger::check_credit_limits`] is a necessary-but-not-sufficient
//! gate: sessions admitted concurrently before their cost lands can push
//! spend past a limit by at most the cost of the in-flight sessions. That
//! transient overshoot is bounded by the global session cap and accepted;
//! serializing admissions on provider latency would stall unrelated teams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

/// Fraction of a limit at which status degrades from Ok to Warning.
const WARNING_THRESHOLD: f64 = 0.8;

/// One recorded spend event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    /// Amount in USD. Always positive and finite.
    pub amount: f64,
    /// What spent it, e.g. a team id or `"agent_loop:developer"`.
    pub source: String,
    /// When the spend was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Coarse budget state for status displays and admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Ok,
    Warning,
    Blocked,
}

impl std::fmt::Display for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Snapshot returned by [`CreditLedger::check_credit_limits`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditStatus {
    pub can_proceed: bool,
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub state: BudgetState,
}

/// Tracks spend and enforces budget limits.
#[derive(Debug, Clone)]
pub struct CreditLedger {
    daily_spend: f64,
    monthly_spend: f64,
    daily_limit: f64,
    monthly_limit: f64,
    history: Vec<SpendRecord>,
}

impl CreditLedger {
    /// Create a ledger with the given limits.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-positive or non-finite limits.
    pub fn new(daily_limit: f64, monthly_limit: f64) -> Result<Self> {
        validate_limit("daily_limit", daily_limit)?;
        validate_limit("monthly_limit", monthly_limit)?;
        Ok(Self {
            daily_spend: 0.0,
            monthly_spend: 0.0,
            daily_limit,
            monthly_limit,
            history: Vec::new(),
        })
    }

    /// Pure read of budget state. Never mutates.
    #[must_use]
    pub fn check_credit_limits(&self) -> CreditStatus {
        let blocked =
            self.daily_spend >= self.daily_limit || self.monthly_spend >= self.monthly_limit;
        let warning = self.daily_spend >= self.daily_limit * WARNING_THRESHOLD
            || self.monthly_spend >= self.monthly_limit * WARNING_THRESHOLD;

        let state = if blocked {
            BudgetState::Blocked
        } else if warning {
            BudgetState::Warning
        } else {
            BudgetState::Ok
        };

        CreditStatus {
            can_proceed: !blocked,
            daily_spend: self.daily_spend,
            monthly_spend: self.monthly_spend,
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            state,
        }
    }

    /// Record actual spend, incrementing both period counters.
    ///
    /// Spend counters only move up within a period; there is no compensating
    /// entry. Recording past a limit is legal (the cost of an
    /// already-admitted session is real) and simply flips the ledger to
    /// blocked for subsequent admissions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-positive or non-finite amounts;
    /// nothing is mutated in that case.
    pub fn record_spend(&mut self, amount: f64, source: impl Into<String>) -> Result<SpendRecord> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(WardenError::validation(
                "amount",
                format!("must be positive and finite, got {amount}"),
            ));
        }

        let record = SpendRecord {
            amount,
            source: source.into(),
            recorded_at: Utc::now(),
        };
        self.daily_spend += amount;
        self.monthly_spend += amount;
        self.history.push(record.clone());
        Ok(record)
    }

    /// Replace the limits. Does not retroactively cancel admitted sessions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-positive or non-finite values.
    pub fn set_credit_limits(&mut self, daily_limit: f64, monthly_limit: f64) -> Result<()> {
        validate_limit("daily_limit", daily_limit)?;
        validate_limit("monthly_limit", monthly_limit)?;
        self.daily_limit = daily_limit;
        self.monthly_limit = monthly_limit;
        Ok(())
    }

    /// Zero the daily counter. Called by the external period timer.
    pub fn reset_daily_spend(&mut self) {
        self.daily_spend = 0.0;
    }

    /// Zero the monthly counter. Called by the external period timer.
    pub fn reset_monthly_spend(&mut self) {
        self.monthly_spend = 0.0;
    }

    /// Full spend history since startup.
    #[must_use]
    pub fn history(&self) -> &[SpendRecord] {
        &self.history
    }
}

fn validate_limit(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(WardenError::validation(
            field,
            format!("must be positive and finite, got {value}"),
        ));
    }
    Ok(())
}
