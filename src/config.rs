//! Configuration for the kubepulse CLI
//!
//! Read from ~/.kubepulse/config.toml unless `--config` points elsewhere.
//! Every section and key is optional.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use kubepulse_events::DEFAULT_QUERY_TIMEOUT;
use kubepulse_k8s::OperatorSettings;
use kubepulse_types::{DEFAULT_PROBE_TIMEOUT, DEFAULT_REFRESH_INTERVAL};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connectivity: ConnectivityConfig,
    pub query: QueryConfig,
    pub refresh: RefreshConfig,
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Per-probe deadline
    pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Deadline for namespace and event queries
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
        }
    }
}

/// Location of the in-cluster operator CLI and the contexts that run it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub kubectl: String,
    pub namespace: String,
    pub target: String,
    pub binary: String,
    /// Contexts whose clusters run the operator
    pub contexts: Vec<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let settings = OperatorSettings::default();
        Self {
            kubectl: settings.kubectl,
            namespace: settings.namespace,
            target: settings.target,
            binary: settings.binary,
            contexts: Vec::new(),
        }
    }
}

impl Config {
    /// Load `path`, or the default location when `None`.
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// ~/.kubepulse/config.toml
    pub fn default_path() -> Result<PathBuf> {
        Ok(kubepulse_prefs::base_dir()?.join("config.toml"))
    }

    pub fn probe_timeout(&self) -> Duration {
        secs_at_least_one(self.connectivity.timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        secs_at_least_one(self.query.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        secs_at_least_one(self.refresh.interval_secs)
    }

    pub fn operator_settings(&self) -> OperatorSettings {
        OperatorSettings {
            kubectl: self.operator.kubectl.clone(),
            namespace: self.operator.namespace.clone(),
            target: self.operator.target.clone(),
            binary: self.operator.binary.clone(),
        }
    }

    pub fn operated_contexts(&self) -> HashSet<String> {
        self.operator.contexts.iter().cloned().collect()
    }
}

fn secs_at_least_one(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
