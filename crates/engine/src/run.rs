// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run executor: drives a single run through its step list.

use crate::{Engine, EngineError, StopSignal};
use dzl_core::{
    Clock, CompensationSpec, Context, ExecutionStatus, IdGen, LifecycleEvent, ProcessSpec,
    RunStatus, StepExecutionRecord, StepKind,
};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the stop cell asked the run to do, as an error.
pub(crate) fn stop_error(stop: &Mutex<Option<StopSignal>>) -> EngineError {
    match stop.lock().clone() {
        Some(StopSignal::Cancel { reason }) => EngineError::Cancelled(reason),
        // A bare token fire (no recorded reason) is treated as a suspend
        Some(StopSignal::Suspend) | None => EngineError::Suspended,
    }
}

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Drive one run to a terminal (or suspended) state.
    ///
    /// This is the body of the spawned per-run task; every failure mode is
    /// handled here and never escapes.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn execute_run(
        self: Arc<Self>,
        run_id: String,
        spec: Arc<ProcessSpec>,
        mut context: Context,
        resume_from: Option<String>,
        cancel: CancellationToken,
        stop: Arc<Mutex<Option<StopSignal>>>,
        lineage: Arc<Vec<String>>,
    ) {
        let mut completed_steps: Vec<String> = Vec::new();

        if let Err(e) =
            self.store
                .set_run_status(&run_id, RunStatus::Running, None, self.clock.now_utc())
        {
            tracing::error!(run_id = %run_id, error = %e, "failed to mark run running");
        }

        if resume_from.is_none() {
            self.emit(LifecycleEvent::ProcessStarted {
                run_id: run_id.clone(),
                process_name: spec.name.clone(),
            })
            .await;
        }

        let outcome = self
            .drive(
                &run_id,
                &spec,
                &mut context,
                &mut completed_steps,
                resume_from,
                &cancel,
                &stop,
                &lineage,
            )
            .await;

        let now = self.clock.now_utc();
        match outcome {
            Ok(()) => {
                let outputs = context.outputs();
                if let Err(e) = self.store.complete_run(&run_id, outputs.clone(), now) {
                    tracing::error!(run_id = %run_id, error = %e, "failed to mark run completed");
                }
                self.emit(LifecycleEvent::ProcessCompleted {
                    run_id: run_id.clone(),
                    process_name: spec.name.clone(),
                    outputs,
                })
                .await;
                tracing::info!(run_id = %run_id, "process completed");
            }

            Err(EngineError::Suspended) => {
                if let Err(e) =
                    self.store
                        .set_run_status(&run_id, RunStatus::Suspended, None, now)
                {
                    tracing::error!(run_id = %run_id, error = %e, "failed to mark run suspended");
                }
                tracing::info!(run_id = %run_id, "process suspended");
            }

            Err(EngineError::Cancelled(reason)) => {
                self.run_compensations(&run_id, &spec, &completed_steps, &context)
                    .await;
                if let Err(e) = self.store.set_run_status(
                    &run_id,
                    RunStatus::Cancelled,
                    Some(reason.clone()),
                    self.clock.now_utc(),
                ) {
                    tracing::error!(run_id = %run_id, error = %e, "failed to mark run cancelled");
                }
                self.emit(LifecycleEvent::ProcessCancelled {
                    run_id: run_id.clone(),
                    reason,
                })
                .await;
            }

            Err(error) => {
                let message = error.to_string();
                tracing::error!(run_id = %run_id, error = %message, "process failed");
                self.run_compensations(&run_id, &spec, &completed_steps, &context)
                    .await;
                if let Err(e) = self.store.fail_run(&run_id, &message, self.clock.now_utc()) {
                    tracing::error!(run_id = %run_id, error = %e, "failed to mark run failed");
                }
                self.emit(LifecycleEvent::ProcessFailed {
                    run_id: run_id.clone(),
                    process_name: spec.name.clone(),
                    error: message,
                })
                .await;
            }
        }

        self.running.lock().remove(&run_id);
    }

    /// The main step loop.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        self: &Arc<Self>,
        run_id: &str,
        spec: &Arc<ProcessSpec>,
        context: &mut Context,
        completed_steps: &mut Vec<String>,
        resume_from: Option<String>,
        cancel: &CancellationToken,
        stop: &Arc<Mutex<Option<StopSignal>>>,
        lineage: &Arc<Vec<String>>,
    ) -> Result<(), EngineError> {
        let steps = &spec.steps;
        let mut i = resume_from
            .as_deref()
            .and_then(|name| spec.step_index(name))
            .unwrap_or(0);

        while i < steps.len() {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(EngineError::Suspended);
            }
            if cancel.is_cancelled() {
                return Err(stop_error(stop));
            }

            let step = &steps[i];

            // Condition steps branch without producing a result bag
            if step.kind == StepKind::Condition {
                let taken = step
                    .condition
                    .as_deref()
                    .is_none_or(|c| context.evaluate_condition(c));
                let next = if taken { &step.on_true } else { &step.on_false };

                match next.as_deref() {
                    Some("complete") => break,
                    Some("fail") => {
                        return Err(EngineError::step_failed(
                            &step.name,
                            "Condition branch to fail",
                        ))
                    }
                    Some(target) => {
                        i = spec.step_index(target).ok_or_else(|| {
                            EngineError::step_failed(&step.name, format!("Unknown step: {target}"))
                        })?;
                    }
                    None => i += 1,
                }
                continue;
            }

            context.set_current_step(Some(&step.name));
            self.store.set_run_step(
                run_id,
                Some(&step.name),
                context.to_bag(),
                self.clock.now_utc(),
            )?;

            // Signal waits and human tasks block on external input
            let blocking = step.kind == StepKind::HumanTask
                || (step.kind == StepKind::Wait && step.wait_for_signal.is_some());
            if blocking {
                self.store.set_run_status(
                    run_id,
                    RunStatus::Waiting,
                    None,
                    self.clock.now_utc(),
                )?;
            }

            let result = self
                .execute_step(run_id, step, context, cancel, stop, lineage)
                .await?;

            if blocking {
                self.store.set_run_status(
                    run_id,
                    RunStatus::Running,
                    None,
                    self.clock.now_utc(),
                )?;
            }

            completed_steps.push(step.name.clone());
            self.store.record_step_execution(StepExecutionRecord {
                execution_id: self.id_gen.next(),
                run_id: run_id.to_string(),
                step_name: step.name.clone(),
                step_kind: step.kind,
                attempt: 1,
                status: ExecutionStatus::Completed,
                outputs: Some(result.clone()),
                error: None,
                completed_at: self.clock.now_utc(),
            })?;
            context.update_step(&step.name, result);

            self.emit(LifecycleEvent::ProcessStepCompleted {
                run_id: run_id.to_string(),
                step_name: step.name.clone(),
                process_name: spec.name.clone(),
            })
            .await;

            // Flow control: explicit on_success routing, else fall through
            match step.on_success.as_deref() {
                Some("complete") => break,
                Some(target) => {
                    i = spec.step_index(target).ok_or_else(|| {
                        EngineError::step_failed(&step.name, format!("Unknown step: {target}"))
                    })?;
                }
                None => i += 1,
            }
        }

        Ok(())
    }

    /// Saga compensation: reverse order over completed steps that declare
    /// a `compensate_with` handler. A compensation failure is logged and
    /// does not stop subsequent compensations.
    pub(crate) async fn run_compensations(
        &self,
        run_id: &str,
        spec: &ProcessSpec,
        completed_steps: &[String],
        context: &Context,
    ) {
        if spec.compensations.is_empty() {
            return;
        }

        if let Err(e) = self.store.set_run_status(
            run_id,
            RunStatus::Compensating,
            None,
            self.clock.now_utc(),
        ) {
            tracing::error!(run_id, error = %e, "failed to mark run compensating");
        }

        for step_name in completed_steps.iter().rev() {
            let Some(step) = spec.get_step(step_name) else {
                continue;
            };
            let Some(comp_name) = step.compensate_with.as_deref() else {
                continue;
            };
            let Some(compensation) = spec.get_compensation(comp_name) else {
                continue;
            };
            if let Err(e) = self.run_compensation(compensation, context).await {
                tracing::error!(
                    run_id,
                    compensation = %compensation.name,
                    error = %e,
                    "compensation failed",
                );
            }
        }
    }

    /// Invoke one compensation's service handler under its timeout.
    async fn run_compensation(
        &self,
        compensation: &CompensationSpec,
        context: &Context,
    ) -> Result<(), EngineError> {
        let Some(service) = compensation.service.as_deref() else {
            return Ok(());
        };
        let Some(handler) = self.registry.service(service) else {
            return Ok(());
        };

        let inputs = context.build_step_inputs(&compensation.inputs);
        let timeout = Duration::from_secs_f64(compensation.timeout_seconds);
        match tokio::time::timeout(timeout, handler(inputs)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::step_failed(&compensation.name, e.to_string())),
            Err(_) => Err(EngineError::step_failed(
                &compensation.name,
                format!(
                    "compensation timed out after {}s",
                    compensation.timeout_seconds
                ),
            )),
        }
    }
}
