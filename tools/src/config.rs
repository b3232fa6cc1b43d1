//! netprobe configuration loading and parsing

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audit::{AuditLog, DEFAULT_CAPACITY, DEFAULT_PREVIEW_LEN};
use crate::capabilities::RolePolicy;
use crate::runner::{RunnerLimits, DEFAULT_KILL_GRACE, DEFAULT_MAX_OUTPUT_BYTES};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/netprobe/config.toml";
pub const CONFIG_ENV: &str = "NETPROBE_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NetprobeConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra or replacement roles, keyed by role name
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: default_max_output_bytes(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,
    #[serde(default = "default_preview_len")]
    pub parameter_preview_len: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
            parameter_preview_len: default_preview_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// One JSON object per line instead of the compact text format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_max_output_bytes() -> usize { DEFAULT_MAX_OUTPUT_BYTES }
fn default_kill_grace_ms() -> u64 { DEFAULT_KILL_GRACE.as_millis() as u64 }
fn default_audit_capacity() -> usize { DEFAULT_CAPACITY }
fn default_preview_len() -> usize { DEFAULT_PREVIEW_LEN }
fn default_log_level() -> String { "info".into() }

impl NetprobeConfig {
    pub fn runner_limits(&self) -> RunnerLimits {
        RunnerLimits {
            max_output_bytes: self.runner.max_output_bytes.max(1),
            kill_grace: Duration::from_millis(self.runner.kill_grace_ms),
        }
    }

    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(self.audit.capacity, self.audit.parameter_preview_len)
    }

    /// Built-in roles with the configured ones layered on top.
    pub fn role_policy(&self) -> RolePolicy {
        RolePolicy::builtin().with_roles(
            self.roles
                .iter()
                .map(|(name, role)| (name.clone(), role.permissions.clone())),
        )
    }
}

/// Load configuration from `path`, or from `$NETPROBE_CONFIG`, or from the
/// default location. A missing file yields defaults; a malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<NetprobeConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var(CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
            .into(),
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        parse_config(&content)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))
    } else {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            config_path.display()
        );
        Ok(NetprobeConfig::default())
    }
}

pub fn parse_config(content: &str) -> Result<NetprobeConfig> {
    Ok(toml::from_str(content)?)
}
