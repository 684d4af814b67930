// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend configuration.

use crate::BackendError;
use serde::{Deserialize, Serialize};

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote if its client feature is compiled in and the server is
    /// reachable, otherwise lite
    #[default]
    Auto,
    Lite,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Auto => write!(f, "auto"),
            BackendKind::Lite => write!(f, "lite"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Configuration for the in-process lite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiteConfig {
    /// Journal path, or `:memory:` for a volatile store
    pub db_path: String,
    pub poll_interval_seconds: f64,
    pub scheduler_interval_seconds: f64,
}

impl Default for LiteConfig {
    fn default() -> Self {
        Self {
            db_path: ".dazzle/processes.db".to_string(),
            poll_interval_seconds: 1.0,
            scheduler_interval_seconds: 60.0,
        }
    }
}

/// Configuration for the remote durable-workflow backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub namespace: String,
    pub task_queue: String,
    pub connect_timeout_seconds: f64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7233,
            namespace: "default".to_string(),
            task_queue: "dazzle".to_string(),
            connect_timeout_seconds: 5.0,
        }
    }
}

/// Top-level process execution configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub backend: BackendKind,
    pub lite: LiteConfig,
    pub remote: RemoteConfig,
}

impl ProcessConfig {
    /// Parse a configuration from TOML.
    pub fn from_toml(source: &str) -> Result<Self, BackendError> {
        toml::from_str(source).map_err(|e| BackendError::Config(e.to_string()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
