// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process lifecycle: start, cancel, suspend, resume, signal, shutdown.

use crate::{Engine, EngineError, RunHandle, StartOptions, StopSignal};
use dzl_core::{
    Bag, Clock, Context, EventRecord, IdGen, LifecycleEvent, OverlapPolicy, RunRecord, RunStatus,
    SignalRecord,
};
use dzl_storage::RunFilter;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Start background work and resume runs left suspended by the last
    /// shutdown.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let mut guard = self.scheduler_task.lock();
            if guard.is_none() {
                *guard = Some(self.spawn_scheduler());
            }
        }

        let suspended = self.store.list_runs(&RunFilter::status(RunStatus::Suspended));
        for run in suspended {
            if let Err(e) = self.resume_process(&run.run_id).await {
                tracing::error!(run_id = %run.run_id, error = %e, "failed to resume suspended run");
            }
        }

        tracing::info!("engine initialized");
        Ok(())
    }

    /// Graceful shutdown: stop the scheduler, suspend every in-flight run,
    /// and checkpoint the store so the next initialize can resume them.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(handle) = self.scheduler_task.lock().take() {
            handle.abort();
        }

        let handles: Vec<(String, RunHandle)> = self.running.lock().drain().collect();
        for (run_id, handle) in handles {
            *handle.stop.lock() = Some(StopSignal::Suspend);
            handle.cancel.cancel();
            if handle.join.await.is_err() {
                // Task aborted or panicked; persist the suspension ourselves
                let _ = self.store.set_run_status(
                    &run_id,
                    RunStatus::Suspended,
                    None,
                    self.clock.now_utc(),
                );
            }
        }

        if let Err(e) = self.store.checkpoint() {
            tracing::warn!(error = %e, "store checkpoint failed during shutdown");
        }

        tracing::info!("engine shutdown complete");
    }

    /// Start a process instance. Returns the run id.
    ///
    /// Honors the idempotency key (an existing run with the same key is
    /// returned as-is) and the spec's overlap policy.
    pub async fn start_process(
        self: &Arc<Self>,
        process_name: &str,
        inputs: Bag,
        options: StartOptions,
    ) -> Result<String, EngineError> {
        self.start_run(process_name, inputs, options, Vec::new()).await
    }

    /// Start a run, carrying the subprocess ancestry for cycle detection.
    pub(crate) async fn start_run(
        self: &Arc<Self>,
        process_name: &str,
        inputs: Bag,
        options: StartOptions,
        mut lineage: Vec<String>,
    ) -> Result<String, EngineError> {
        let spec = self
            .process_spec(process_name)
            .ok_or_else(|| EngineError::UnknownProcess(process_name.to_string()))?;

        // Check idempotency
        if let Some(key) = options.idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_run_by_idempotency_key(key) {
                tracing::debug!(key, run_id = %existing.run_id, "returning existing run for idempotency key");
                return Ok(existing.run_id);
            }
        }

        // Check overlap policy
        if spec.overlap_policy != OverlapPolicy::Allow {
            let running = self.store.list_runs(&RunFilter {
                process_name: Some(process_name.to_string()),
                status: Some(RunStatus::Running),
                limit: 1,
                ..RunFilter::default()
            });
            if let Some(previous) = running.into_iter().next() {
                match spec.overlap_policy {
                    OverlapPolicy::Skip => {
                        tracing::debug!(process = process_name, "skipping start: already running");
                        return Ok(previous.run_id);
                    }
                    OverlapPolicy::CancelPrevious => {
                        self.cancel_process(&previous.run_id, "New instance started")
                            .await?;
                    }
                    OverlapPolicy::Allow => {}
                }
            }
        }

        let run_id = self.id_gen.next();
        let now = self.clock.now_utc();
        let dsl_version = options
            .dsl_version
            .unwrap_or_else(|| self.config.default_dsl_version.clone());
        let run = RunRecord::new(
            run_id.clone(),
            process_name,
            dsl_version,
            inputs.clone(),
            options.idempotency_key.clone(),
            now,
        );

        match self.store.insert_run(run) {
            Ok(()) => {}
            // Lost the check-and-insert race: someone else holds the key
            Err(dzl_storage::StoreError::IdempotencyConflict { run_id, .. }) => return Ok(run_id),
            Err(e) => return Err(e.into()),
        }

        lineage.push(process_name.to_string());
        let context = Context::new(inputs, now);
        self.spawn_run(run_id.clone(), spec, context, None, lineage);

        tracing::info!(process = process_name, run_id = %run_id, "started process");
        Ok(run_id)
    }

    /// Spawn the driving task for a run and track its handle.
    fn spawn_run(
        self: &Arc<Self>,
        run_id: String,
        spec: Arc<dzl_core::ProcessSpec>,
        context: Context,
        resume_from: Option<String>,
        lineage: Vec<String>,
    ) {
        let cancel = CancellationToken::new();
        let stop: Arc<Mutex<Option<StopSignal>>> = Arc::new(Mutex::new(None));
        let engine = Arc::clone(self);

        // Hold the map lock across spawn + insert: the run's finalizer
        // removes its own entry, and must not observe the map before the
        // handle lands in it.
        let mut running = self.running.lock();
        let join = tokio::spawn(engine.execute_run(
            run_id.clone(),
            spec,
            context,
            resume_from,
            cancel.clone(),
            Arc::clone(&stop),
            Arc::new(lineage),
        ));
        running.insert(run_id, RunHandle { join, cancel, stop });
    }

    /// Get a process run by ID.
    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.store.get_run(run_id)
    }

    /// List process runs with optional filters.
    pub fn list_runs(&self, filter: &RunFilter) -> Vec<RunRecord> {
        self.store.list_runs(filter)
    }

    /// List runs bound to a DSL version.
    pub fn list_runs_by_version(
        &self,
        dsl_version: &str,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Vec<RunRecord> {
        self.store.list_runs(&RunFilter {
            dsl_version: Some(dsl_version.to_string()),
            status,
            limit,
            ..RunFilter::default()
        })
    }

    /// Count active (non-terminal) runs for a DSL version.
    pub fn count_active_runs_by_version(&self, dsl_version: &str) -> u64 {
        self.store.count_active_runs_by_version(dsl_version)
    }

    /// Cancel a running process.
    ///
    /// Stops the driving task if the run is in-process; compensation runs
    /// before the run terminates as `cancelled`. Terminal runs are no-ops.
    pub async fn cancel_process(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
        let handle = self.running.lock().remove(run_id);
        if let Some(handle) = handle {
            *handle.stop.lock() = Some(StopSignal::Cancel {
                reason: reason.to_string(),
            });
            handle.cancel.cancel();
            let _ = handle.join.await;
            tracing::info!(run_id, reason, "cancelled process");
            return Ok(());
        }

        // Not in-process (pending, suspended, or owned by a previous
        // incarnation): transition the record directly.
        let run = self
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status.is_terminal() {
            return Ok(());
        }
        self.store.set_run_status(
            run_id,
            RunStatus::Cancelled,
            Some(reason.to_string()),
            self.clock.now_utc(),
        )?;
        self.emit(LifecycleEvent::ProcessCancelled {
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        })
        .await;
        tracing::info!(run_id, reason, "cancelled process");
        Ok(())
    }

    /// Suspend a running process so a later initialize can resume it.
    pub async fn suspend_process(&self, run_id: &str) -> Result<(), EngineError> {
        let handle = self.running.lock().remove(run_id);
        if let Some(handle) = handle {
            *handle.stop.lock() = Some(StopSignal::Suspend);
            handle.cancel.cancel();
            let _ = handle.join.await;
            return Ok(());
        }

        let run = self
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status.is_terminal() || run.status == RunStatus::Suspended {
            return Ok(());
        }
        self.store
            .set_run_status(run_id, RunStatus::Suspended, None, self.clock.now_utc())?;
        Ok(())
    }

    /// Resume a suspended process from its persisted step and context.
    ///
    /// Non-suspended runs are no-ops.
    pub async fn resume_process(self: &Arc<Self>, run_id: &str) -> Result<(), EngineError> {
        let run = self
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Suspended {
            return Ok(());
        }

        let spec = self
            .process_spec(&run.process_name)
            .ok_or_else(|| EngineError::UnknownProcess(run.process_name.clone()))?;

        let context = if run.context.is_empty() {
            Context::new(run.inputs.clone(), self.clock.now_utc())
        } else {
            Context::from_bag(run.context.clone(), self.clock.now_utc())
        };

        tracing::info!(run_id, step = run.current_step.as_deref().unwrap_or("<start>"), "resuming process");
        self.spawn_run(
            run_id.to_string(),
            spec,
            context,
            run.current_step.clone(),
            vec![run.process_name.clone()],
        );
        Ok(())
    }

    /// Send a signal to a run. Only a `wait` step for that signal name
    /// will consume it.
    pub fn signal_process(
        &self,
        run_id: &str,
        signal_name: &str,
        payload: Bag,
    ) -> Result<(), EngineError> {
        self.store.insert_signal(SignalRecord::new(
            self.id_gen.next(),
            run_id,
            signal_name,
            payload,
        ))?;
        tracing::debug!(run_id, signal = signal_name, "signal sent");
        Ok(())
    }

    /// Persist a lifecycle event and deliver it to the event handler.
    pub(crate) async fn emit(&self, event: LifecycleEvent) {
        let at = self.clock.now_utc();
        let payload = event.payload(at);

        let record = EventRecord {
            event_id: self.id_gen.next(),
            run_id: event.run_id().to_string(),
            process_name: event.process_name().unwrap_or_default().to_string(),
            schema_name: event.schema_name().to_string(),
            event_data: payload.clone(),
            created_at: at,
        };
        if let Err(e) = self.store.record_event(record) {
            tracing::warn!(schema = event.schema_name(), error = %e, "failed to persist event");
        }

        if let Some(handler) = self.registry.event_handler() {
            if let Err(e) = handler(event.schema_name().to_string(), payload).await {
                tracing::error!(schema = event.schema_name(), error = %e, "event handler error");
            }
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
