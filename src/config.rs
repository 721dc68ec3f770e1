//! Runtime configuration
//!
//! Read once from the environment at startup; every field has a default
//! so tests can use `AgentConfig::default()`.

use crate::error::AgentError;
use crate::verification::ConfidenceModel;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Extra attempts allowed after the first one fails verification
    pub max_retries: u32,
    /// Reasoning/tool steps per attempt
    pub max_steps: u32,
    /// Wall-clock budget for one attempt
    pub attempt_timeout: Duration,
    /// Relative drift tolerated by the accuracy verifier
    pub accuracy_tolerance: f64,
    pub confidence_model: ConfidenceModel,
    pub daily_budget_usd: f64,
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
    /// Amount reserved against the daily budget before a turn starts
    pub budget_reservation_usd: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_steps: 3,
            attempt_timeout: Duration::from_secs(25),
            accuracy_tolerance: 0.01,
            confidence_model: ConfidenceModel::Reference,
            daily_budget_usd: 10.0,
            prompt_cost_per_1k: 0.000_1,
            completion_cost_per_1k: 0.000_4,
            budget_reservation_usd: 0.05,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            max_retries: env_or("AGENT_MAX_RETRIES", defaults.max_retries)?,
            max_steps: env_or("AGENT_MAX_STEPS", defaults.max_steps)?.max(1),
            attempt_timeout: Duration::from_secs(env_or(
                "AGENT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )?),
            accuracy_tolerance: env_or("AGENT_ACCURACY_TOLERANCE", defaults.accuracy_tolerance)?,
            confidence_model: env_or("AGENT_CONFIDENCE_MODEL", defaults.confidence_model)?,
            daily_budget_usd: env_or("AGENT_DAILY_BUDGET_USD", defaults.daily_budget_usd)?,
            prompt_cost_per_1k: env_or("AGENT_PROMPT_COST_PER_1K", defaults.prompt_cost_per_1k)?,
            completion_cost_per_1k: env_or(
                "AGENT_COMPLETION_COST_PER_1K",
                defaults.completion_cost_per_1k,
            )?,
            budget_reservation_usd: env_or(
                "AGENT_BUDGET_RESERVATION_USD",
                defaults.budget_reservation_usd,
            )?,
        })
    }

    /// Price a token count in USD
    pub fn cost_of(&self, usage: &crate::models::TokenUsage) -> f64 {
        usage.prompt_tokens as f64 / 1000.0 * self.prompt_cost_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.completion_cost_per_1k
    }
}

/// Listening port for the API server, `PORT` or 8080
pub fn server_port() -> Result<u16> {
    env_or("PORT", DEFAULT_PORT)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| {
            AgentError::ValidationError(format!("Invalid value for {}: {}", key, e))
        }),
        _ => Ok(default),
    }
}
