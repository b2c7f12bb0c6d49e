//! Provisioner settings.
//!
//! Settings are read once at startup from a YAML file and never change for
//! the lifetime of the process. Keys are camelCase; the snake_case names used
//! by older configuration files are accepted as aliases.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::steps::StepFlags;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/provisioner/provisioner.yaml";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings YAML.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The settings parsed but are not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete settings for one provisioner process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Which nodes to look for.
    pub target: TargetSettings,
    /// How to pick a master.
    #[serde(default)]
    pub master: MasterSettings,
    /// Which provisioning steps run.
    #[serde(default)]
    pub steps: StepFlags,
    /// Pause between polling cycles.
    #[serde(default = "default_sleep_seconds", alias = "sleeptime")]
    pub sleep_seconds: u64,
    /// Log verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    #[serde(default = "default_log_level", alias = "loglevel")]
    pub log_level: String,
    /// Opt-in behaviours beyond the plain step sequence.
    #[serde(default)]
    pub policy: PolicySettings,
    /// Notification delivery.
    #[serde(default)]
    pub notify: NotifySettings,
    /// Remote command backend.
    #[serde(default)]
    pub mco: McoSettings,
}

/// Node discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSettings {
    /// Agent every candidate node must run.
    pub agent: String,
    /// Opaque discovery filter passed through to the inventory layer.
    #[serde(default)]
    pub filter: String,
    /// Fact holding the node's address.
    #[serde(default = "default_ipaddress_fact", alias = "ipaddress_fact")]
    pub ipaddress_fact: String,
}

/// Master selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterSettings {
    /// Facts compared between node and master, in order; later criteria win.
    #[serde(default)]
    pub criteria: Vec<String>,
    /// Fact holding the master's address.
    #[serde(default = "default_ipaddress_fact", alias = "ipaddress_fact")]
    pub ipaddress_fact: String,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            criteria: vec![],
            ipaddress_fact: default_ipaddress_fact(),
        }
    }
}

/// Opt-in policies. All default off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Release a lock taken in this attempt when a later step fails.
    pub unlock_on_failure: bool,
    /// Also notify when a discovered node already has a certificate.
    pub notify_already_provisioned: bool,
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    /// Slack webhook; falls back to `SLACK_WEBHOOK_URL` when unset.
    pub slack_webhook_url: Option<String>,
}

/// Settings for the `mco` command backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McoSettings {
    /// Executable to run.
    pub binary: String,
    /// Client configuration file passed with `--config`.
    pub config: Option<PathBuf>,
    /// Agent implementing node-side provisioning actions.
    pub node_agent: String,
    /// Agent implementing certificate actions on masters.
    pub master_agent: String,
    /// Extra discovery filter narrowing down masters.
    pub master_filter: String,
    /// Timeout for ordinary actions.
    pub timeout_secs: u64,
    /// Timeout for the blocking final run.
    pub run_timeout_secs: u64,
}

impl Default for McoSettings {
    fn default() -> Self {
        Self {
            binary: "mco".to_string(),
            config: None,
            node_agent: "provision".to_string(),
            master_agent: "puppetca".to_string(),
            master_filter: String::new(),
            timeout_secs: 60,
            run_timeout_secs: 1800,
        }
    }
}

fn default_sleep_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ipaddress_fact() -> String {
    "ipaddress".to_string()
}

impl Settings {
    /// Load and validate settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Self =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string without touching the filesystem.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.agent.trim().is_empty() {
            return Err(ConfigError::Invalid("target.agent must not be empty".into()));
        }
        if self.sleep_seconds == 0 {
            return Err(ConfigError::Invalid("sleepSeconds must be at least 1".into()));
        }
        if self.target.ipaddress_fact.is_empty() || self.master.ipaddress_fact.is_empty() {
            return Err(ConfigError::Invalid("ipaddressFact must not be empty".into()));
        }
        Ok(())
    }

    /// Usable but suspicious settings, for logging once a subscriber is
    /// installed.
    #[must_use]
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = vec![];
        if self.steps.lock && !self.steps.unlock {
            warnings.push(
                "steps.lock is enabled without steps.unlock; nodes stay locked after provisioning",
            );
        }
        warnings
    }

    /// Pause between polling cycles.
    #[must_use]
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds)
    }
}
