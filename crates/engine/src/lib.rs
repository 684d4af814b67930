// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dzl-engine: Workflow execution core for the DAZZLE process engine.
//!
//! The [`Engine`] drives registered [`ProcessSpec`]s to completion: it owns
//! the handler registries, the map of in-flight runs, the background
//! scheduler, and the version manager's store access. Everything is a field
//! of the engine so tests can instantiate independent engines.

mod cron;
mod error;
mod human;
mod process;
mod registry;
mod run;
mod scheduler;
mod step;
mod tasks;
#[cfg(test)]
mod test_helpers;
mod version;

pub use cron::cron_due;
pub use error::EngineError;
pub use registry::{
    EffectContext, EffectExecutor, EffectResult, EventHandler, HandlerError, HandlerRegistry,
    SendHandler, ServiceHandler,
};
pub use version::{DrainWatcher, DrainWatcherConfig, VersionManager};

use dzl_core::{Clock, IdGen, ProcessSpec, ScheduleSpec, SystemClock, UuidIdGen};
use dzl_storage::ProcessStore;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between signal/task/subprocess polls
    pub poll_interval: Duration,
    /// Interval between scheduler ticks
    pub scheduler_interval: Duration,
    /// DSL version stamped on runs that do not specify one
    pub default_dsl_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            scheduler_interval: Duration::from_secs(60),
            default_dsl_version: "0.1".to_string(),
        }
    }
}

/// Options for starting a run.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Deduplication key: starting twice with the same key returns the
    /// first run's id
    pub idempotency_key: Option<String>,
    /// DSL version to bind the run to (defaults to the engine's)
    pub dsl_version: Option<String>,
}

/// Why an in-flight run was asked to stop.
#[derive(Debug, Clone)]
pub(crate) enum StopSignal {
    /// External cancellation: compensate, then terminate as `cancelled`
    Cancel { reason: String },
    /// Graceful shutdown or explicit suspend: persist `suspended`, no
    /// compensation, resumable on the next initialize
    Suspend,
}

/// Concurrency handle for one in-flight run.
pub(crate) struct RunHandle {
    pub(crate) join: JoinHandle<()>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stop: Arc<Mutex<Option<StopSignal>>>,
}

/// The workflow execution core.
pub struct Engine<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    pub(crate) store: Arc<ProcessStore>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) processes: Mutex<HashMap<String, Arc<ProcessSpec>>>,
    pub(crate) schedules: Mutex<IndexMap<String, Arc<ScheduleSpec>>>,
    pub(crate) running: Mutex<HashMap<String, RunHandle>>,
    pub(crate) scheduler_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) clock: C,
    pub(crate) id_gen: G,
    pub(crate) config: EngineConfig,
}

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Create a new engine over the given store.
    pub fn new(store: Arc<ProcessStore>, clock: C, id_gen: G, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry: HandlerRegistry::default(),
            processes: Mutex::new(HashMap::new()),
            schedules: Mutex::new(IndexMap::new()),
            running: Mutex::new(HashMap::new()),
            scheduler_task: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            clock,
            id_gen,
            config,
        })
    }

    /// Handler registries (write-mostly at boot, read-only during execution).
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The shared persistence layer.
    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    /// Get a reference to the clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Register a process definition.
    pub fn register_process(&self, spec: ProcessSpec) {
        tracing::debug!(process = %spec.name, "registered process");
        self.processes.lock().insert(spec.name.clone(), Arc::new(spec));
    }

    /// Register a scheduled job.
    ///
    /// The schedule's steps are registered as a process of the same name
    /// (unless one already exists) so a fire is a plain `start_process`.
    /// Also seeds the schedule's bookkeeping row.
    pub fn register_schedule(&self, spec: ScheduleSpec) -> Result<(), EngineError> {
        {
            let mut processes = self.processes.lock();
            if !processes.contains_key(&spec.name) {
                processes.insert(spec.name.clone(), Arc::new(spec.to_process_spec()));
            }
        }
        self.store.register_schedule(&spec.name, self.clock.now_utc())?;
        tracing::debug!(schedule = %spec.name, "registered schedule");
        self.schedules.lock().insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Look up a registered process spec.
    pub(crate) fn process_spec(&self, name: &str) -> Option<Arc<ProcessSpec>> {
        self.processes.lock().get(name).cloned()
    }
}

/// An engine with production clock and id generation.
pub type SystemEngine = Engine<SystemClock, UuidIdGen>;
