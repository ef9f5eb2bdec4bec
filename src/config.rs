//! Configuration loading and validation.
//!
//! Warden reads a single `warden.toml` describing the fixed team registry,
//! credit limits, the automation schedule, provider selection, and loop
//! bounds. Every section has working defaults so the control plane can come
//! up with no file at all.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::control::teams::AutomationLevel;
use crate::error::{Result, WardenError};

/// One fixed team in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Stable identifier, used as registry key and in every API call.
    pub id: String,
    /// Display name for status output.
    pub name: String,
    /// The role prompt the agent loop runs this team under.
    pub role_prompt: String,
    /// Action types the team may perform.
    #[serde(default)]
    pub allowed_actions: BTreeSet<String>,
    /// Startup automation level.
    #[serde(default)]
    pub automation_level: AutomationLevel,
}

/// Budget limits for the credit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Maximum spend (USD) per day.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: f64,
    /// Maximum spend (USD) per month.
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: f64,
}

fn default_daily_limit() -> f64 {
    50.0
}

fn default_monthly_limit() -> f64 {
    500.0
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            monthly_limit: default_monthly_limit(),
        }
    }
}

/// One configured automation window ("HH:MM" local to the schedule offset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub teams: BTreeSet<String>,
    #[serde(default)]
    pub actions: BTreeSet<String>,
}

/// Schedule section: windows plus the timezone they are evaluated in.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    /// Master switch: when false, every in-window check returns false.
    #[serde(default)]
    pub enabled: bool,
    /// Timezone as a UTC offset, e.g. `-300` for US Eastern standard time.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub windows: Vec<WindowConfig>,
}

/// Provider selection and options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// The provider backend: "anthropic", "openai", or "mock".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier passed through to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl LlmConfig {
    /// Validate provider selection.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let valid = ["anthropic", "openai", "mock"];
        if !valid.contains(&self.provider.as_str()) {
            return Err(format!(
                "Invalid provider '{}'. Valid options: {}",
                self.provider,
                valid.join(", ")
            ));
        }
        if self.model.trim().is_empty() {
            return Err("Model must not be empty".to_string());
        }
        Ok(())
    }
}

/// Bounds on the agent loop and its provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Requested iterations per session (clamped to the engine ceiling).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Per-request provider timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry budget for transient provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_iterations() -> u32 {
    8
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Bounds on concurrent sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Global cap on in-flight sessions.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Delay between batches when running all teams.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_max_concurrent_sessions() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    250
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_teams")]
    pub teams: Vec<TeamConfig>,
    #[serde(default)]
    pub credit: CreditConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default, rename = "loop")]
    pub loop_bounds: LoopConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Code required to clear the emergency stop.
    #[serde(default = "default_confirmation_code")]
    pub estop_confirmation_code: String,
    /// Optional JSONL file mirroring every control-log entry for an
    /// external audit consumer.
    #[serde(default)]
    pub control_log_path: Option<std::path::PathBuf>,
}

fn default_confirmation_code() -> String {
    "CONFIRM-RESET".to_string()
}

/// The built-in team registry, used when no config file overrides it.
fn default_teams() -> Vec<TeamConfig> {
    let team = |id: &str, name: &str, role_prompt: &str, actions: &[&str]| TeamConfig {
        id: id.to_string(),
        name: name.to_string(),
        role_prompt: role_prompt.to_string(),
        allowed_actions: actions.iter().map(|a| (*a).to_string()).collect(),
        automation_level: AutomationLevel::Manual,
    };

    vec![
        team(
            "developer",
            "Developer Team",
            "You are the developer team lead. You review engineering work, plan \
             implementation tasks, and make technical decisions for the product.",
            &["code_review", "plan_sprint", "deploy"],
        ),
        team(
            "marketing",
            "Marketing Team",
            "You are the marketing team lead. You plan campaigns, draft content \
             briefs, and track launch readiness.",
            &["draft_campaign", "schedule_post", "outreach"],
        ),
        team(
            "sales",
            "Sales Team",
            "You are the sales team lead. You qualify leads, plan outreach, and \
             prepare follow-ups for prospects.",
            &["outreach", "qualify_lead", "follow_up"],
        ),
        team(
            "support",
            "Support Team",
            "You are the support team lead. You triage incoming issues, draft \
             responses, and escalate anything that needs engineering.",
            &["triage_ticket", "draft_response", "escalate"],
        ),
    ]
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            teams: default_teams(),
            credit: CreditConfig::default(),
            schedule: ScheduleConfig::default(),
            llm: LlmConfig::default(),
            loop_bounds: LoopConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            estop_confirmation_code: default_confirmation_code(),
            control_log_path: None,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| WardenError::config(format!("{}: {}", path.display(), e)))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.teams.is_empty() {
            return Err(WardenError::config("at least one team must be configured"));
        }
        let mut seen = BTreeSet::new();
        for team in &self.teams {
            if team.id.trim().is_empty() {
                return Err(WardenError::config("team id must not be empty"));
            }
            if !seen.insert(team.id.as_str()) {
                return Err(WardenError::config(format!(
                    "duplicate team id '{}'",
                    team.id
                )));
            }
        }
        if !(self.credit.daily_limit.is_finite() && self.credit.daily_limit > 0.0) {
            return Err(WardenError::config("credit.daily_limit must be positive"));
        }
        if !(self.credit.monthly_limit.is_finite() && self.credit.monthly_limit > 0.0) {
            return Err(WardenError::config("credit.monthly_limit must be positive"));
        }
        if self.concurrency.max_concurrent_sessions == 0 {
            return Err(WardenError::config(
                "concurrency.max_concurrent_sessions must be at least 1",
            ));
        }
        if self.estop_confirmation_code.trim().is_empty() {
            return Err(WardenError::config(
                "estop_confirmation_code must not be empty",
            ));
        }
        self.llm
            .validate()
            .map_err(WardenError::config)?;
        Ok(())
    }

    /// Find a team's config by id.
    #[must_use]
    pub fn team(&self, team_id: &str) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.id == team_id)
    }
}
