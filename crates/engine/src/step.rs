// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step executor: retry, timeout, backoff, and dispatch by kind.

use crate::run::stop_error;
use crate::{Engine, EngineError, StartOptions, StopSignal};
use dzl_core::{
    Bag, Clock, Context, ExecutionStatus, IdGen, ProcessStepSpec, RetryBackoff, RetryConfig,
    RunStatus, StepExecutionRecord, StepKind,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Step-local failure classification.
#[derive(Debug)]
pub(crate) enum StepError {
    /// No retry: propagates as the step's failure immediately
    Fatal(String),
    /// Counted as a failed attempt and retried per the retry policy
    Transient(String),
    /// The run is being cancelled or suspended
    Stopped,
}

/// Backoff delay before the next attempt (`attempt` is 0-based).
pub(crate) fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let seconds = match retry.backoff {
        RetryBackoff::Fixed => retry.initial_interval_seconds,
        RetryBackoff::Linear => retry.initial_interval_seconds * (attempt + 1) as f64,
        RetryBackoff::Exponential => {
            let delay = retry.initial_interval_seconds * retry.backoff_coefficient.powi(attempt as i32);
            delay.min(retry.max_interval_seconds)
        }
    };
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Sleep that wakes early when the run is asked to stop.
pub(crate) async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), StepError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(StepError::Stopped),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Execute one step to completion or to exhaustion of retries.
    ///
    /// Manually boxed (rather than `async fn`) because this function is
    /// mutually recursive with `parallel_step` (via `dispatch_inner`),
    /// which creates a self-referential opaque future type that defeats
    /// the compiler's `Send` auto-trait inference.
    pub(crate) fn execute_step<'a>(
        self: &'a Arc<Self>,
        run_id: &'a str,
        step: &'a ProcessStepSpec,
        context: &'a Context,
        cancel: &'a CancellationToken,
        stop: &'a Arc<Mutex<Option<StopSignal>>>,
        lineage: &'a Arc<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<Bag, EngineError>> + Send + 'a>> {
        Box::pin(self.execute_step_inner(run_id, step, context, cancel, stop, lineage))
    }

    async fn execute_step_inner(
        self: &Arc<Self>,
        run_id: &str,
        step: &ProcessStepSpec,
        context: &Context,
        cancel: &CancellationToken,
        stop: &Arc<Mutex<Option<StopSignal>>>,
        lineage: &Arc<Vec<String>>,
    ) -> Result<Bag, EngineError> {
        let retry = step.retry.clone().unwrap_or_default();
        let mut last_error: Option<String> = None;

        for attempt in 0..retry.max_attempts.max(1) {
            let result = self
                .dispatch_step(run_id, step, context, cancel, stop, lineage)
                .await;

            match result {
                Ok(mut outputs) => {
                    self.apply_step_effects(step, context, &mut outputs).await;
                    return Ok(outputs);
                }
                Err(StepError::Fatal(message)) => {
                    return Err(EngineError::step_failed(&step.name, message));
                }
                Err(StepError::Stopped) => return Err(stop_error(stop)),
                Err(StepError::Transient(message)) => last_error = Some(message),
            }

            // Record failed attempt
            if let Err(e) = self.store.record_step_execution(StepExecutionRecord {
                execution_id: self.id_gen.next(),
                run_id: run_id.to_string(),
                step_name: step.name.clone(),
                step_kind: step.kind,
                attempt: attempt + 1,
                status: ExecutionStatus::Failed,
                outputs: None,
                error: last_error.clone(),
                completed_at: self.clock.now_utc(),
            }) {
                tracing::error!(run_id, step = %step.name, error = %e, "failed to record step attempt");
            }

            if attempt + 1 < retry.max_attempts {
                let delay = backoff_delay(&retry, attempt);
                tracing::debug!(
                    step = %step.name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "step failed, retrying",
                );
                if sleep_cancellable(delay, cancel).await.is_err() {
                    return Err(stop_error(stop));
                }
            }
        }

        Err(EngineError::step_failed(
            &step.name,
            last_error.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    /// One attempt of a step: apply the deadline and dispatch by kind.
    ///
    /// Signal waits and human tasks pace themselves against the same
    /// timeout budget internally so their timeout errors stay specific;
    /// every other kind runs under an outer deadline.
    async fn dispatch_step(
        self: &Arc<Self>,
        run_id: &str,
        step: &ProcessStepSpec,
        context: &Context,
        cancel: &CancellationToken,
        stop: &Arc<Mutex<Option<StopSignal>>>,
        lineage: &Arc<Vec<String>>,
    ) -> Result<Bag, StepError> {
        match step.kind {
            StepKind::Wait if step.wait_for_signal.is_some() => {
                self.wait_for_signal_step(run_id, step, cancel).await
            }
            StepKind::HumanTask => self.human_task_step(run_id, step, context, cancel).await,
            _ => {
                let deadline = Duration::from_secs_f64(step.timeout_seconds);
                let body = self.dispatch_inner(run_id, step, context, cancel, stop, lineage);
                tokio::select! {
                    _ = cancel.cancelled() => Err(StepError::Stopped),
                    result = tokio::time::timeout(deadline, body) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(StepError::Transient(format!(
                            "step timed out after {}s",
                            step.timeout_seconds,
                        ))),
                    },
                }
            }
        }
    }

    /// Kind-specific dispatch for non-self-pacing kinds.
    async fn dispatch_inner(
        self: &Arc<Self>,
        run_id: &str,
        step: &ProcessStepSpec,
        context: &Context,
        cancel: &CancellationToken,
        stop: &Arc<Mutex<Option<StopSignal>>>,
        lineage: &Arc<Vec<String>>,
    ) -> Result<Bag, StepError> {
        let inputs = context.build_step_inputs(&step.inputs);

        match step.kind {
            StepKind::Service => self.service_step(step, inputs).await,
            StepKind::Send => self.send_step(step, inputs).await,
            StepKind::Wait => {
                // Duration wait (signal waits are routed before dispatch)
                match step.wait_duration_seconds {
                    Some(seconds) => {
                        sleep_cancellable(Duration::from_secs_f64(seconds), cancel).await?;
                        let mut outputs = Bag::new();
                        outputs.insert(
                            "waited_seconds".to_string(),
                            serde_json::Number::from_f64(seconds)
                                .map(Value::Number)
                                .unwrap_or(Value::Null),
                        );
                        Ok(outputs)
                    }
                    None => Ok(Bag::new()),
                }
            }
            StepKind::Subprocess => self.subprocess_step(run_id, step, inputs, cancel, lineage).await,
            StepKind::Parallel => {
                self.parallel_step(run_id, step, context, cancel, stop, lineage)
                    .await
            }
            // Condition steps are routed by the run executor
            StepKind::Condition | StepKind::HumanTask => Ok(Bag::new()),
        }
    }

    async fn service_step(&self, step: &ProcessStepSpec, inputs: Bag) -> Result<Bag, StepError> {
        let Some(service) = step.service.as_deref() else {
            return Err(StepError::Fatal("No service specified".to_string()));
        };

        let Some(handler) = self.registry.service(service) else {
            tracing::warn!(service, "no handler for service, using no-op");
            return Ok(Bag::new());
        };

        handler(inputs).await.map_err(|e| StepError::Transient(e.to_string()))
    }

    async fn send_step(&self, step: &ProcessStepSpec, inputs: Bag) -> Result<Bag, StepError> {
        let (Some(channel), Some(message)) = (step.channel.as_deref(), step.message.as_deref())
        else {
            return Err(StepError::Fatal("No channel or message specified".to_string()));
        };

        if let Some(handler) = self.registry.send_handler() {
            handler(channel.to_string(), message.to_string(), inputs)
                .await
                .map_err(|e| StepError::Transient(e.to_string()))?;
        }

        let mut outputs = Bag::new();
        outputs.insert("sent".to_string(), Value::Bool(true));
        outputs.insert("channel".to_string(), Value::String(channel.to_string()));
        outputs.insert("message".to_string(), Value::String(message.to_string()));
        Ok(outputs)
    }

    /// Poll for a signal until it arrives or the step's budget elapses.
    async fn wait_for_signal_step(
        &self,
        run_id: &str,
        step: &ProcessStepSpec,
        cancel: &CancellationToken,
    ) -> Result<Bag, StepError> {
        let Some(signal_name) = step.wait_for_signal.as_deref() else {
            return Ok(Bag::new());
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(step.timeout_seconds);
        loop {
            let consumed = self
                .store
                .consume_signal(run_id, signal_name, self.clock.now_utc())
                .map_err(|e| StepError::Transient(e.to_string()))?;
            if let Some(signal) = consumed {
                let mut outputs = Bag::new();
                outputs.insert("signal".to_string(), Value::String(signal_name.to_string()));
                outputs.insert("payload".to_string(), Value::Object(signal.payload));
                return Ok(outputs);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StepError::Fatal(format!(
                    "Timeout waiting for signal: {signal_name}",
                )));
            }
            let nap = self.config.poll_interval.min(deadline - now);
            sleep_cancellable(nap, cancel).await?;
        }
    }

    /// Start a child run and poll it to a terminal state.
    async fn subprocess_step(
        self: &Arc<Self>,
        run_id: &str,
        step: &ProcessStepSpec,
        inputs: Bag,
        cancel: &CancellationToken,
        lineage: &Arc<Vec<String>>,
    ) -> Result<Bag, StepError> {
        let Some(child_name) = step.subprocess.as_deref() else {
            return Err(StepError::Fatal("No subprocess specified".to_string()));
        };

        // A process must not be a direct or transitive sub-process of itself
        if lineage.iter().any(|ancestor| ancestor == child_name) {
            return Err(StepError::Fatal(format!(
                "Recursive subprocess: {child_name}",
            )));
        }

        let dsl_version = self.store.get_run(run_id).map(|r| r.dsl_version);
        let child_id = self
            .start_run(
                child_name,
                inputs,
                StartOptions {
                    idempotency_key: None,
                    dsl_version,
                },
                lineage.as_ref().clone(),
            )
            .await
            .map_err(|e| StepError::Fatal(e.to_string()))?;

        loop {
            let Some(child) = self.store.get_run(&child_id) else {
                return Err(StepError::Fatal("Subprocess not found".to_string()));
            };

            match child.status {
                RunStatus::Completed => {
                    let mut outputs = Bag::new();
                    outputs.insert(
                        "subprocess_run_id".to_string(),
                        Value::String(child_id.clone()),
                    );
                    outputs.insert(
                        "outputs".to_string(),
                        Value::Object(child.outputs.unwrap_or_default()),
                    );
                    return Ok(outputs);
                }
                RunStatus::Failed | RunStatus::Cancelled => {
                    return Err(StepError::Fatal(format!(
                        "Subprocess {}: {}",
                        child.status,
                        child.error.unwrap_or_default(),
                    )));
                }
                _ => sleep_cancellable(self.config.poll_interval, cancel).await?,
            }
        }
    }

    /// Launch inner steps concurrently and aggregate their results under
    /// each sibling's name.
    async fn parallel_step(
        self: &Arc<Self>,
        run_id: &str,
        step: &ProcessStepSpec,
        context: &Context,
        cancel: &CancellationToken,
        stop: &Arc<Mutex<Option<StopSignal>>>,
        lineage: &Arc<Vec<String>>,
    ) -> Result<Bag, StepError> {
        if step.parallel_steps.is_empty() {
            return Ok(Bag::new());
        }

        let total = step.parallel_steps.len();
        let (tx, mut rx) = mpsc::channel::<(usize, Result<Bag, EngineError>)>(total);
        let mut handles = Vec::with_capacity(total);

        for (idx, inner) in step.parallel_steps.iter().enumerate() {
            let tx = tx.clone();
            let engine = Arc::clone(self);
            let run_id = run_id.to_string();
            let inner = inner.clone();
            let context = context.clone();
            let child_cancel = cancel.child_token();
            let stop = Arc::clone(stop);
            let lineage = Arc::clone(lineage);

            handles.push(tokio::spawn(async move {
                let result = engine
                    .execute_step(&run_id, &inner, &context, &child_cancel, &stop, &lineage)
                    .await;
                let _ = tx.send((idx, result)).await;
            }));
        }
        drop(tx);

        let fail_fast = step.parallel_policy == dzl_core::ParallelPolicy::FailFast;
        let mut results: Vec<Option<Bag>> = vec![None; total];
        let mut errors: Vec<(usize, String)> = Vec::new();

        while let Some((idx, result)) = rx.recv().await {
            let name = &step.parallel_steps[idx].name;
            match result {
                Ok(outputs) => results[idx] = Some(outputs),
                Err(e) => {
                    errors.push((idx, format!("{name}: {e}")));
                    if fail_fast {
                        // Cancel still-running siblings; completed results
                        // received so far are kept
                        for handle in &handles {
                            handle.abort();
                        }
                        break;
                    }
                }
            }
        }

        if !errors.is_empty() {
            errors.sort_by_key(|(idx, _)| *idx);
            let joined: Vec<String> = errors.into_iter().map(|(_, msg)| msg).collect();
            return Err(StepError::Fatal(format!(
                "parallel failures: {}",
                joined.join("; "),
            )));
        }

        let mut aggregated = Bag::new();
        for (idx, outputs) in results.into_iter().enumerate() {
            if let Some(outputs) = outputs {
                aggregated.insert(
                    step.parallel_steps[idx].name.clone(),
                    Value::Object(outputs),
                );
            }
        }
        Ok(aggregated)
    }

    /// Run declared effects after a successful dispatch and attach the
    /// results under the reserved `_effects` key. Skipped silently when no
    /// effect executor is registered.
    async fn apply_step_effects(&self, step: &ProcessStepSpec, context: &Context, outputs: &mut Bag) {
        if step.effects.is_empty() {
            return;
        }
        let Some(executor) = self.registry.effect_executor() else {
            return;
        };

        let effect_ctx = crate::EffectContext {
            trigger_entity: context
                .get_variable("trigger_entity")
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            process_inputs: context.inputs.clone(),
            step_outputs: outputs.clone(),
        };

        let results = executor(step.effects.clone(), effect_ctx).await;
        let bags: Vec<Value> = results.iter().map(|r| Value::Object(r.to_bag())).collect();
        outputs.insert("_effects".to_string(), Value::Array(bags));
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
