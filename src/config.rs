//! Runtime settings and configuration validation.
//!
//! Validates settings up front so misconfigured deployments fail early
//! instead of mid-run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Settings shared by the provisioner and both agent flavors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Idle timeout for shared sandboxes; registry records carry the same TTL.
    #[serde(default = "default_sandbox_idle_ttl")]
    pub sandbox_idle_ttl: Duration,

    /// TTL on the creation lock covering the race window.
    #[serde(default = "default_sandbox_lock_ttl")]
    pub sandbox_lock_ttl: Duration,

    /// First delay of the contention backoff.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: Duration,

    /// Cap on a single backoff delay.
    #[serde(default = "default_backoff_max")]
    pub backoff_max: Duration,

    /// Retry ceiling for the contention loop.
    #[serde(default = "default_backoff_attempts")]
    pub backoff_attempts: u32,

    /// Step ceiling for one agent run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Byte ceiling for a single tool result shown to the model.
    #[serde(default = "default_tool_output_limit")]
    pub tool_output_limit: usize,

    /// Virtual CPUs requested for new sandboxes.
    #[serde(default = "default_sandbox_vcpus")]
    pub sandbox_vcpus: u32,

    /// Base URL repositories are cloned from.
    #[serde(default = "default_git_remote_base")]
    pub git_remote_base: String,
}

fn default_sandbox_idle_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_sandbox_lock_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_base() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_attempts() -> u32 {
    10
}

fn default_max_steps() -> u32 {
    100
}

fn default_tool_output_limit() -> usize {
    16 * 1024
}

fn default_sandbox_vcpus() -> u32 {
    2
}

fn default_git_remote_base() -> String {
    "https://github.com".to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            sandbox_idle_ttl: default_sandbox_idle_ttl(),
            sandbox_lock_ttl: default_sandbox_lock_ttl(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            backoff_attempts: default_backoff_attempts(),
            max_steps: default_max_steps(),
            tool_output_limit: default_tool_output_limit(),
            sandbox_vcpus: default_sandbox_vcpus(),
            git_remote_base: default_git_remote_base(),
        }
    }
}

impl AgentSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses settings from TOML, filling omitted fields with defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(format!("invalid settings: {e}")))
    }

    pub fn with_sandbox_idle_ttl(mut self, ttl: Duration) -> Self {
        self.sandbox_idle_ttl = ttl;
        self
    }

    pub fn with_sandbox_lock_ttl(mut self, ttl: Duration) -> Self {
        self.sandbox_lock_ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration, attempts: u32) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self.backoff_attempts = attempts;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_git_remote_base(mut self, base: impl Into<String>) -> Self {
        self.git_remote_base = base.into();
        self
    }
}

/// Everything a validation pass found, errors and warnings together.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Fatal problems; the settings must not be used.
    pub errors: Vec<String>,
    /// Suspect but usable settings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// True when no errors were found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Fails with a config error when any error was recorded; otherwise
    /// yields the warnings for the caller to log.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Settings types that can check themselves before use.
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

impl Validate for AgentSettings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.backoff_attempts == 0 {
            result.add_error("backoff_attempts must be at least 1");
        }
        if self.backoff_base.is_zero() {
            result.add_error("backoff_base must be non-zero");
        }
        if self.backoff_max < self.backoff_base {
            result.add_error("backoff_max must be at least backoff_base");
        }
        if self.max_steps == 0 {
            result.add_error("max_steps must be at least 1");
        }
        if self.sandbox_lock_ttl.is_zero() {
            result.add_error("sandbox_lock_ttl must be non-zero");
        }
        if self.sandbox_vcpus == 0 {
            result.add_error("sandbox_vcpus must be at least 1");
        }
        if self.git_remote_base.trim().is_empty() {
            result.add_error("git_remote_base cannot be empty");
        }

        if self.sandbox_lock_ttl >= self.sandbox_idle_ttl {
            result.add_warning("sandbox_lock_ttl >= sandbox_idle_ttl; a dead creator can outlive its sandbox record");
        }
        if self.backoff_base > Duration::from_secs(1) {
            result.add_warning("backoff_base over 1 second makes contention waits very long");
        }
        if self.max_steps > 500 {
            result.add_warning("max_steps over 500 may allow runaway model usage");
        }
        if self.tool_output_limit < 1024 {
            result.add_warning("tool_output_limit under 1KB will truncate most tool results");
        }

        result
    }
}
