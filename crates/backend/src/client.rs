// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON client for the remote durable-workflow service.
//!
//! Each request is a single JSON object on one line; the service answers
//! with one line carrying `{"ok": true, ...}` or `{"ok": false, "error"}`.
//! Connections are per-request, so the client itself holds no state beyond
//! the address.

use crate::{BackendError, RemoteConfig};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Stateless request client for the durable-workflow service.
#[derive(Debug, Clone)]
pub struct DurableClient {
    addr: String,
    namespace: String,
    timeout: Duration,
}

impl DurableClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            namespace: config.namespace.clone(),
            timeout: Duration::from_secs_f64(config.connect_timeout_seconds),
        }
    }

    /// Issue one request. `payload` must be a JSON object; the client adds
    /// the `op` and `namespace` fields.
    pub async fn request(&self, op: &str, mut payload: Value) -> Result<Value, BackendError> {
        let Some(fields) = payload.as_object_mut() else {
            return Err(BackendError::Protocol("payload must be an object".to_string()));
        };
        fields.insert("op".to_string(), Value::String(op.to_string()));
        fields.insert(
            "namespace".to_string(),
            Value::String(self.namespace.clone()),
        );

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                BackendError::Unavailable(format!("connect to {} timed out", self.addr))
            })??;

        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_string(&payload)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        let read = tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .map_err(|_| {
                BackendError::Unavailable(format!("response from {} timed out", self.addr))
            })??;
        if read == 0 {
            return Err(BackendError::Protocol(
                "connection closed before response".to_string(),
            ));
        }

        let response: Value = serde_json::from_str(response_line.trim())
            .map_err(|e| BackendError::Protocol(format!("bad response: {e}")))?;

        if response.get("ok").and_then(Value::as_bool) != Some(true) {
            let message = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown remote error");
            return Err(BackendError::Protocol(message.to_string()));
        }

        Ok(response)
    }
}
