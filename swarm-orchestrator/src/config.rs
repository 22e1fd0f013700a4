//! Orchestrator configuration with documented floors

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Minimum poll interval; anything lower hammers the remote service
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
/// Minimum staleness timeout; lower values would reclaim healthy sessions
pub const MIN_STALE_TIMEOUT_MS: u64 = 60_000;
/// Minimum progress timeout; same floor rationale as staleness
pub const MIN_PROGRESS_TIMEOUT_MS: u64 = 60_000;

fn default_concurrency() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_stale_timeout_ms() -> u64 {
    120_000
}

fn default_progress_timeout_ms() -> u64 {
    180_000
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".swarm-orchestrator").join("workflows"))
        .unwrap_or_else(|| PathBuf::from(".swarm-orchestrator/workflows"))
}

fn default_session_service_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

/// Configuration for the orchestrator, loaded from YAML with env overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-provider concurrency ceiling when no explicit override exists
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Explicit per-provider concurrency overrides
    #[serde(default)]
    pub provider_concurrency: HashMap<String, usize>,
    /// Interval between dispatcher polls (floor 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Idle time after which a session with no progress ever is stale (floor 60000)
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
    /// Idle time after which a previously-progressing session is stuck (floor 60000)
    #[serde(default = "default_progress_timeout_ms")]
    pub progress_timeout_ms: u64,
    /// Directory holding workflow state records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Base URL of the remote agent-session service
    #[serde(default = "default_session_service_url")]
    pub session_service_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            provider_concurrency: HashMap::new(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
            progress_timeout_ms: default_progress_timeout_ms(),
            state_dir: default_state_dir(),
            session_service_url: default_session_service_url(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file and apply env overrides and floors
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config.apply_env().normalize())
    }

    /// Build configuration from defaults plus env overrides
    pub fn from_env() -> Self {
        Self::default().apply_env().normalize()
    }

    /// Apply environment variable overrides
    fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("SWARM_SESSION_SERVICE_URL") {
            if !url.is_empty() {
                self.session_service_url = url;
            }
        }
        if let Ok(dir) = std::env::var("SWARM_STATE_DIR") {
            if !dir.is_empty() {
                self.state_dir = PathBuf::from(dir);
            }
        }
        if let Ok(n) = std::env::var("SWARM_DEFAULT_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.default_concurrency = n;
            }
        }
        self
    }

    /// Clamp misconfigured values to their floors
    pub fn normalize(mut self) -> Self {
        self.default_concurrency = self.default_concurrency.max(1);
        for limit in self.provider_concurrency.values_mut() {
            *limit = (*limit).max(1);
        }
        self.poll_interval_ms = self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        self.stale_timeout_ms = self.stale_timeout_ms.max(MIN_STALE_TIMEOUT_MS);
        self.progress_timeout_ms = self.progress_timeout_ms.max(MIN_PROGRESS_TIMEOUT_MS);
        self
    }

    /// Concurrency ceiling for a provider (explicit override or default)
    pub fn provider_limit(&self, provider: &str) -> usize {
        self.provider_concurrency
            .get(provider)
            .copied()
            .unwrap_or(self.default_concurrency)
    }
}
