// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler registries for external collaborators.
//!
//! Service, send, event, and effect handlers are injected at boot and read
//! during execution. Handlers are async closures behind `Arc` so in-flight
//! runs can hold them across await points.

use dzl_core::{Bag, EffectAction, StepEffect};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a registered handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Async service call: inputs bag in, outputs bag out.
pub type ServiceHandler = Arc<dyn Fn(Bag) -> BoxFuture<Result<Bag, HandlerError>> + Send + Sync>;

/// Async message send: `(channel, message, inputs)`.
pub type SendHandler =
    Arc<dyn Fn(String, String, Bag) -> BoxFuture<Result<(), HandlerError>> + Send + Sync>;

/// Async lifecycle event sink: `(schema_name, payload)`.
pub type EventHandler =
    Arc<dyn Fn(String, Bag) -> BoxFuture<Result<(), HandlerError>> + Send + Sync>;

/// Async effect executor: applies declared entity effects after a step.
pub type EffectExecutor =
    Arc<dyn Fn(Vec<StepEffect>, EffectContext) -> BoxFuture<Vec<EffectResult>> + Send + Sync>;

/// Context handed to the effect executor.
#[derive(Debug, Clone, Default)]
pub struct EffectContext {
    pub trigger_entity: Bag,
    pub process_inputs: Bag,
    pub step_outputs: Bag,
}

/// Result of one applied effect.
#[derive(Debug, Clone)]
pub struct EffectResult {
    pub action: EffectAction,
    pub entity_name: String,
    pub success: bool,
    pub affected: u64,
    pub error: Option<String>,
}

impl EffectResult {
    /// Bag shape stored under the step's reserved `_effects` key.
    pub fn to_bag(&self) -> Bag {
        let mut bag = Bag::new();
        bag.insert(
            "action".to_string(),
            serde_json::to_value(self.action).unwrap_or(Value::Null),
        );
        bag.insert("entity".to_string(), Value::String(self.entity_name.clone()));
        bag.insert("success".to_string(), Value::Bool(self.success));
        bag.insert("affected".to_string(), Value::Number(self.affected.into()));
        bag.insert(
            "error".to_string(),
            self.error.clone().map_or(Value::Null, Value::String),
        );
        bag
    }
}

/// Registries for all pluggable collaborators.
#[derive(Default)]
pub struct HandlerRegistry {
    services: Mutex<HashMap<String, ServiceHandler>>,
    send: Mutex<Option<SendHandler>>,
    events: Mutex<Option<EventHandler>>,
    effects: Mutex<Option<EffectExecutor>>,
}

impl HandlerRegistry {
    /// Register a handler for a service call.
    pub fn register_service(&self, name: impl Into<String>, handler: ServiceHandler) {
        self.services.lock().insert(name.into(), handler);
    }

    /// Register a service from an async closure.
    pub fn service_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Bag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bag, HandlerError>> + Send + 'static,
    {
        self.register_service(name, Arc::new(move |inputs| Box::pin(f(inputs))));
    }

    /// Register the handler for `send` steps.
    pub fn set_send_handler(&self, handler: SendHandler) {
        *self.send.lock() = Some(handler);
    }

    /// Register the lifecycle event sink.
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.events.lock() = Some(handler);
    }

    /// Register the lifecycle event sink from an async closure.
    pub fn event_fn<F, Fut>(&self, f: F)
    where
        F: Fn(String, Bag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.set_event_handler(Arc::new(move |schema, data| Box::pin(f(schema, data))));
    }

    /// Register the effect executor. If absent, effects are silently skipped.
    pub fn set_effect_executor(&self, executor: EffectExecutor) {
        *self.effects.lock() = Some(executor);
    }

    pub(crate) fn service(&self, name: &str) -> Option<ServiceHandler> {
        self.services.lock().get(name).cloned()
    }

    pub(crate) fn send_handler(&self) -> Option<SendHandler> {
        self.send.lock().clone()
    }

    pub(crate) fn event_handler(&self) -> Option<EventHandler> {
        self.events.lock().clone()
    }

    pub(crate) fn effect_executor(&self) -> Option<EffectExecutor> {
        self.effects.lock().clone()
    }
}
