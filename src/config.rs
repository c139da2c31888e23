use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_MODEL_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL_NAME: &str = "llama3.1:8b";

/// Local text-generation endpoint settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

/// How long each tier gets before the request widens.
#[derive(Debug, Clone, Copy)]
pub struct EscalationTimeouts {
    pub buddy: chrono::Duration,
    pub community: chrono::Duration,
    pub global: chrono::Duration,
}

impl Default for EscalationTimeouts {
    fn default() -> Self {
        Self {
            buddy: chrono::Duration::minutes(30),
            community: chrono::Duration::minutes(60),
            global: chrono::Duration::minutes(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub recent_window_days: u32,
    /// None analyses the full history when establishing a baseline.
    pub baseline_cap_days: Option<u32>,
    pub timeouts: EscalationTimeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                url: DEFAULT_MODEL_URL.to_string(),
                model: DEFAULT_MODEL_NAME.to_string(),
                temperature: 0.2,
                timeout: Duration::from_secs(120),
            },
            recent_window_days: 3,
            baseline_cap_days: None,
            timeouts: EscalationTimeouts::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            model: ModelConfig {
                url: std::env::var("MODEL_URL").unwrap_or(defaults.model.url),
                model: std::env::var("MODEL_NAME").unwrap_or(defaults.model.model),
                temperature: env_parse("MODEL_TEMPERATURE")?
                    .unwrap_or(defaults.model.temperature),
                timeout: env_parse("MODEL_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.model.timeout),
            },
            recent_window_days: env_parse("RECENT_WINDOW_DAYS")?
                .unwrap_or(defaults.recent_window_days)
                .max(1),
            baseline_cap_days: env_parse::<u32>("BASELINE_CAP_DAYS")?.filter(|days| *days > 0),
            timeouts: EscalationTimeouts {
                buddy: env_minutes("BUDDY_TIMEOUT_MINUTES")?.unwrap_or(defaults.timeouts.buddy),
                community: env_minutes("COMMUNITY_TIMEOUT_MINUTES")?
                    .unwrap_or(defaults.timeouts.community),
                global: env_minutes("GLOBAL_TIMEOUT_MINUTES")?
                    .unwrap_or(defaults.timeouts.global),
            },
        })
    }
}

pub fn database_max_connections() -> Result<u32> {
    Ok(env_parse("DB_MAX_CONNECTIONS")?.unwrap_or(5))
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn env_minutes(name: &str) -> Result<Option<chrono::Duration>> {
    Ok(env_parse::<i64>(name)?.map(chrono::Duration::minutes))
}
