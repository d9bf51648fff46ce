//! Runtime configuration, loaded from `palaver.toml`.
//!
//! Every section has serde defaults so an empty file (or no file) is a
//! valid development configuration. `Config::validate` reports issues
//! with severities; the server refuses to start on errors.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Parse a TOML document into a config.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validate the configuration, returning issues by severity.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agent.max_depth == 0 {
            issues.push(ConfigIssue::error("agent.max_depth must be at least 1"));
        }
        if self.agent.max_depth > 100 {
            issues.push(ConfigIssue::warning(
                "agent.max_depth above 100 risks runaway tool loops",
            ));
        }
        if self.buffer.grace_secs == 0 {
            issues.push(ConfigIssue::warning(
                "buffer.grace_secs of 0 disables the resume window",
            ));
        }
        if self.queue.known_agents.is_empty() {
            issues.push(ConfigIssue::warning(
                "queue.known_agents is empty — every bus message will dead-letter",
            ));
        }
        if self.queue.retry_attempts == 0 {
            issues.push(ConfigIssue::error(
                "queue.retry_attempts must be at least 1",
            ));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Upper bound on concurrently served HTTP requests.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum LLM/tool iterations per turn.
    #[serde(default = "d_max_depth")]
    pub max_depth: usize,
    /// Sampling temperature passed to the model.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Tool signature patterns that run without approval.
    #[serde(default)]
    pub whitelist_patterns: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_depth: d_max_depth(),
            temperature: None,
            whitelist_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Seconds a completed stream buffer survives before eviction, so
    /// an immediately reconnecting client can still resume.
    #[serde(default = "d_grace_secs")]
    pub grace_secs: u64,
    /// Per-read timeout on the prompt intake channel, for graceful
    /// shutdown.
    #[serde(default = "d_intake_timeout_secs")]
    pub intake_timeout_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            grace_secs: d_grace_secs(),
            intake_timeout_secs: d_intake_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Agent ids the queue transport accepts; anything else
    /// dead-letters with `InvalidAgentId`.
    #[serde(default)]
    pub known_agents: HashSet<String>,
    /// Response-write retry attempts on transient transport errors.
    #[serde(default = "d_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for exponential backoff, in seconds (2 → 2, 4, 8).
    #[serde(default = "d_retry_base_secs")]
    pub retry_base_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            known_agents: HashSet::new(),
            retry_attempts: d_retry_attempts(),
            retry_base_secs: d_retry_base_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3400
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_max_concurrent() -> usize {
    256
}
fn d_max_depth() -> usize {
    8
}
fn d_grace_secs() -> u64 {
    10
}
fn d_intake_timeout_secs() -> u64 {
    1
}
fn d_retry_attempts() -> u32 {
    3
}
fn d_retry_base_secs() -> u64 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
