// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend selection.
//!
//! `auto` selects the remote backend iff its client feature is compiled in
//! and the configured server answers a TCP connect within the timeout;
//! otherwise the lite backend is used.

use crate::{BackendError, BackendKind, LiteBackend, ProcessBackend, ProcessConfig, RemoteConfig};
use dzl_core::Bag;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;

/// True when the remote service answers a TCP connect.
pub async fn remote_reachable(config: &RemoteConfig) -> bool {
    let addr = format!("{}:{}", config.host, config.port);
    let timeout = Duration::from_secs_f64(config.connect_timeout_seconds);
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(addr, error = %e, "remote connection failed");
            false
        }
        Err(_) => {
            tracing::debug!(addr, "remote connection timed out");
            false
        }
    }
}

async fn detect_backend(config: &ProcessConfig) -> BackendKind {
    if !cfg!(feature = "remote") {
        tracing::debug!("remote client feature not compiled in, using lite backend");
        return BackendKind::Lite;
    }
    if remote_reachable(&config.remote).await {
        tracing::debug!(
            host = %config.remote.host,
            port = config.remote.port,
            "remote server reachable",
        );
        BackendKind::Remote
    } else {
        tracing::debug!("remote server not reachable, using lite backend");
        BackendKind::Lite
    }
}

/// Create the appropriate backend for the configuration.
///
/// The returned backend is not yet initialized.
pub async fn create_backend(
    config: &ProcessConfig,
) -> Result<Box<dyn ProcessBackend>, BackendError> {
    let kind = match config.backend {
        BackendKind::Auto => {
            let detected = detect_backend(config).await;
            tracing::info!(backend = %detected, "auto-detected process backend");
            detected
        }
        explicit => explicit,
    };

    match kind {
        BackendKind::Lite | BackendKind::Auto => {
            Ok(Box::new(LiteBackend::new(&config.lite)?))
        }
        BackendKind::Remote => {
            #[cfg(feature = "remote")]
            {
                if !remote_reachable(&config.remote).await {
                    return Err(BackendError::Unavailable(format!(
                        "remote server not reachable at {}:{}",
                        config.remote.host, config.remote.port,
                    )));
                }
                Ok(Box::new(crate::RemoteBackend::new(&config.remote)))
            }
            #[cfg(not(feature = "remote"))]
            {
                Err(BackendError::Unavailable(
                    "remote backend requested but the `remote` feature is not enabled".to_string(),
                ))
            }
        }
    }
}

/// Availability and configuration diagnostics.
pub async fn backend_info(config: &ProcessConfig) -> Bag {
    let mut info = Bag::new();
    info.insert(
        "configured_backend".to_string(),
        Value::String(config.backend.to_string()),
    );
    info.insert("lite_available".to_string(), Value::Bool(true));
    info.insert(
        "remote_client_available".to_string(),
        Value::Bool(cfg!(feature = "remote")),
    );
    if cfg!(feature = "remote") {
        info.insert(
            "remote_server_reachable".to_string(),
            Value::Bool(remote_reachable(&config.remote).await),
        );
        info.insert(
            "remote_host".to_string(),
            Value::String(format!("{}:{}", config.remote.host, config.remote.port)),
        );
    }
    info
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
