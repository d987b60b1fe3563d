//! Layered settings for the `kana` binary.
//!
//! 1. Compiled defaults ([`Settings::default`])
//! 2. User file, `~/.kana/settings.json`, deep-merged over the defaults
//! 3. `KANA_*` environment variables

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use kana_engine::{GaugeConfig, OrchestratorConfig, SessionConfig};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub budget: BudgetSettings,
    pub memory: MemorySettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    /// Name of the env var holding the admin key used for billing.
    pub admin_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: kana_llm::openai::DEFAULT_BASE_URL.to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            admin_key_env: "OPENAI_ADMIN_KEY".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub greeting_threshold: usize,
    pub tool_timeout_secs: u64,
    pub persona: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            greeting_threshold: 20,
            tool_timeout_secs: 120,
            persona: None,
            working_directory: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub session_token_limit: u64,
    pub daily_budget: f64,
    pub cost_refresh_secs: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            session_token_limit: 100_000,
            daily_budget: 1.0,
            cost_refresh_secs: 300,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub recent_summary_ttl_hours: i64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            recent_summary_ttl_hours: 24,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: kana_telemetry::kana_home().join("database/kana.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json: false,
            log_to_sqlite: true,
            log_db_path: kana_telemetry::kana_home().join("database/logs.db"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn settings_path() -> PathBuf {
    kana_telemetry::kana_home().join("settings.json")
}

/// Merge `overlay` into `base`. Objects merge per key, anything else in the
/// overlay replaces the base value, and overlay nulls are skipped.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Defaults, overlaid with `path` if it exists, then the process environment.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    load_layers(path, |key| std::env::var(key).ok())
}

fn load_layers(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings, SettingsError> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, user)
    } else {
        defaults
    };
    let mut settings: Settings = serde_json::from_value(merged)?;
    settings.apply_env_overrides(env);
    Ok(settings)
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring invalid environment override");
            None
        }
    }
}

impl Settings {
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("KANA_MODEL").filter(|s| !s.trim().is_empty()) {
            self.llm.model = model;
        }
        if let Some(url) = lookup("KANA_BASE_URL").filter(|s| !s.trim().is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(n) = parse_env::<u32>(&lookup, "KANA_MAX_ITERATIONS").filter(|n| *n > 0) {
            self.agent.max_iterations = n;
        }
        if let Some(b) = parse_env::<f64>(&lookup, "KANA_DAILY_BUDGET").filter(|b| b.is_finite()) {
            self.budget.daily_budget = b;
        }
        if let Some(t) = parse_env::<u64>(&lookup, "KANA_TOKEN_LIMIT") {
            self.budget.session_token_limit = t;
        }
        if let Some(p) = lookup("KANA_DB_PATH").filter(|s| !s.trim().is_empty()) {
            self.storage.database_path = PathBuf::from(p);
        }
        if let Some(level) = lookup("KANA_LOG_LEVEL").filter(|s| !s.trim().is_empty()) {
            self.telemetry.log_level = level;
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            recent_summary_ttl: chrono::Duration::hours(self.memory.recent_summary_ttl_hours.max(0)),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            max_iterations: self.agent.max_iterations,
            greeting_threshold: self.agent.greeting_threshold,
            persona: self.agent.persona.clone().unwrap_or(defaults.persona),
            session: self.session_config(),
        }
    }

    pub fn gauge_config(&self) -> GaugeConfig {
        GaugeConfig {
            token_limit: self.budget.session_token_limit,
            daily_budget: self.budget.daily_budget,
            cost_refresh_interval: Duration::from_secs(self.budget.cost_refresh_secs.max(1)),
        }
    }

    pub fn telemetry_config(&self) -> kana_telemetry::TelemetryConfig {
        let log_level = self.telemetry.log_level.parse().unwrap_or_else(|_| {
            warn!(level = %self.telemetry.log_level, "unknown log level, using warn");
            tracing::Level::WARN
        });
        kana_telemetry::TelemetryConfig {
            log_level,
            json: self.telemetry.json,
            log_to_sqlite: self.telemetry.log_to_sqlite,
            log_db_path: self.telemetry.log_db_path.clone(),
            ..Default::default()
        }
    }
}
