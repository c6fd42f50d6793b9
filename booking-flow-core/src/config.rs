//! Flow Configuration
//!
//! Tunables for routing, dispatch, guards and the atomic turn planner.
//! Every field has a serde default so a partial YAML file (or none at all)
//! yields a working configuration.
//!
//! ```yaml
//! routing:
//!   caller_policy: stack          # or single_slot
//! dispatch:
//!   max_iterations: 6
//!   skip_resolved_detours: true
//! planner:
//!   max_verifiable_per_turn: 1    # legacy deployments used 3
//!   combo_enabled: true
//!   question_priority: [time, availability, site_visit, offer_hil,
//!                       budget, billing, date_choice, product_followup]
//! guards:
//!   candidate_date_count: 3
//! choice:
//!   ttl_turns: 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;
use crate::planner::intents::NeedsInputKind;

/// Environment variable naming the YAML config file
pub const CONFIG_PATH_ENV: &str = "BOOKING_FLOW_CONFIG";

/// Per-turn cap the planner used before the single-intent default
pub const LEGACY_MAX_VERIFIABLE_PER_TURN: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub routing: RoutingConfig,
    pub dispatch: DispatchConfig,
    pub planner: PlannerConfig,
    pub guards: GuardConfig,
    pub choice: ChoiceConfig,
}

/// How detour return addresses are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerPolicy {
    /// Nested detours push; control returns to the most recent interrupter
    #[default]
    Stack,
    /// One slot; the outermost caller wins and inner ones are dropped
    SingleSlot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub caller_policy: CallerPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on handler invocations per turn
    pub max_iterations: usize,
    /// Return straight to the caller when a detour stage's guard says
    /// nothing needs clarifying
    pub skip_resolved_detours: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            skip_resolved_detours: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_verifiable_per_turn: usize,
    pub combo_enabled: bool,
    /// First matching needs-input kind picks the follow-up question
    pub question_priority: Vec<NeedsInputKind>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_verifiable_per_turn: 1,
            combo_enabled: true,
            question_priority: NeedsInputKind::DEFAULT_PRIORITY.to_vec(),
        }
    }
}

impl PlannerConfig {
    /// Settings matching the older multi-intent behaviour
    pub fn legacy() -> Self {
        Self {
            max_verifiable_per_turn: LEGACY_MAX_VERIFIABLE_PER_TURN,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub candidate_date_count: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            candidate_date_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoiceConfig {
    pub ttl_turns: u8,
}

impl Default for ChoiceConfig {
    fn default() -> Self {
        Self { ttl_turns: 2 }
    }
}

impl FlowConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading flow configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load from the file named by `BOOKING_FLOW_CONFIG`, or defaults if unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.planner.max_verifiable_per_turn == 0 {
            return Err(ConfigError::Invalid(
                "planner.max_verifiable_per_turn must be at least 1".to_string(),
            ));
        }
        if self.choice.ttl_turns == 0 {
            return Err(ConfigError::Invalid(
                "choice.ttl_turns must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
