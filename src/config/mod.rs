//! Configuration system (layered: defaults > TOML file > env).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::permission::PolicyVerdict;

const DEFAULT_PERMISSION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;
const DEFAULT_MAX_ITERATIONS: usize = 50;
const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Top-level runtime configuration.
///
/// Resolution order (later wins):
/// 1. Built-in defaults
/// 2. TOML file (`~/.warden/config.toml` unless a path is given)
/// 3. `WARDEN_*` environment variables (a `.env` file is loaded first)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WardenConfig {
    pub permission: PermissionConfig,
    pub hub: HubConfig,
    pub agent_loop: LoopConfig,
}

/// Permission arbitration settings.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PermissionConfig {
    /// How long a pending request waits for a human decision.
    #[builder(default = DEFAULT_PERMISSION_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Interval of the safety-net sweep over stale requests.
    #[builder(default = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,
    /// Verdict used when nothing is stored for a (session, tool) pair.
    #[builder(default = PolicyVerdict::Ask)]
    pub default_verdict: PolicyVerdict,
    /// Per-tool verdicts that override `default_verdict`.
    #[builder(default)]
    pub tool_defaults: HashMap<String, PolicyVerdict>,
    /// Lifetime of a remembered choice; `None` keeps it for the session.
    pub remember_ttl_secs: Option<u64>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PermissionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn remember_ttl(&self) -> Option<Duration> {
        self.remember_ttl_secs.map(Duration::from_secs)
    }
}

/// Event hub settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Bounded queue size of every subscriber.
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Conversation loop settings.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    #[builder(default = DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,
    /// `0` disables the idle timeout.
    #[builder(default = DEFAULT_STREAM_IDLE_TIMEOUT_MS)]
    pub stream_idle_timeout_ms: u64,
    pub system_prompt: Option<String>,
    /// Execute the tool calls of one turn as a concurrent batch.
    #[builder(default)]
    pub concurrent_tools: bool,
    #[builder(default)]
    pub retry: RetryConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Retry settings for opening a provider stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl WardenConfig {
    /// Load defaults, then the default config file if present, then env.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load defaults, then `path` if it exists, then env.
    pub fn load_from(path: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match Self::from_file(path) {
            Ok(config) => config,
            Err(WardenError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(err) => return Err(err),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file without env overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `WARDEN_*` overrides using the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WARDEN_PERMISSION_TIMEOUT_SECS") {
            self.permission.timeout_secs = parse_env("WARDEN_PERMISSION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("WARDEN_SWEEP_INTERVAL_SECS") {
            self.permission.sweep_interval_secs =
                parse_env("WARDEN_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("WARDEN_SUBSCRIBER_CAPACITY") {
            self.hub.subscriber_capacity = parse_env("WARDEN_SUBSCRIBER_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("WARDEN_MAX_ITERATIONS") {
            self.agent_loop.max_iterations = parse_env("WARDEN_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = lookup("WARDEN_STREAM_IDLE_TIMEOUT_MS") {
            self.agent_loop.stream_idle_timeout_ms =
                parse_env("WARDEN_STREAM_IDLE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("WARDEN_CONCURRENT_TOOLS") {
            self.agent_loop.concurrent_tools = parse_env("WARDEN_CONCURRENT_TOOLS", &value)?;
        }
        Ok(())
    }

    /// Reject values that would make the runtime stall or spin.
    pub fn validate(&self) -> Result<()> {
        if self.permission.timeout_secs == 0 {
            return Err(WardenError::Configuration(
                "permission.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.permission.sweep_interval_secs == 0 {
            return Err(WardenError::Configuration(
                "permission.sweep_interval_secs must be greater than zero".into(),
            ));
        }
        if self.hub.subscriber_capacity == 0 {
            return Err(WardenError::Configuration(
                "hub.subscriber_capacity must be greater than zero".into(),
            ));
        }
        if self.agent_loop.max_iterations == 0 {
            return Err(WardenError::Configuration(
                "agent_loop.max_iterations must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| WardenError::Configuration(format!("invalid value for {key}: '{value}'")))
}

/// `~/.warden/config.toml`, falling back to a relative `.warden` directory.
pub fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".warden"))
        .unwrap_or_else(|| PathBuf::from(".warden"))
        .join("config.toml")
}
