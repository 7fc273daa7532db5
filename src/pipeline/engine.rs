use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use idmapper_core::{ErrorKind, MapperError, Result};

use super::context::ExecutionContext;
use super::params::{ParameterOverrides, ParameterResolver};
use super::registry::OperationRegistry;
use super::steps::{Operation, OperationServices};
use super::strategy::{StepDefinition, StrategyDefinition};
use crate::observability::{emit_counter, emit_histogram, MetricName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Loaded => "loaded",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cooperative abort signal, checked by the engine before each step.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PreparedStep {
    pub definition: StepDefinition,
    operation: Box<dyn Operation>,
}

/// A strategy that passed pre-flight: parameters resolved, every operation built.
pub struct PreparedRun {
    run_id: Uuid,
    strategy_name: String,
    parameters: Map<String, Value>,
    steps: Vec<PreparedStep>,
}

impl PreparedRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        RunState::Loaded
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter().map(|s| &s.definition)
    }
}

/// The step that ended a run, and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub operation: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of executing a complete pipeline
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub state: RunState,
    pub failure: Option<StepFailure>,
    pub steps_executed: usize,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn statistics(&self) -> &Map<String, Value> {
        self.context.statistics()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    /// Summary suitable for writing next to the outputs of a run
    pub fn summary(&self) -> Value {
        json!({
            "run_id": self.run_id.to_string(),
            "strategy": self.strategy,
            "state": self.state,
            "failure": self.failure,
            "steps_executed": self.steps_executed,
            "started_at": self.started_at.to_rfc3339(),
            "completed_at": self.completed_at.to_rfc3339(),
            "artifacts": self.context.artifacts(),
            "statistics": self.context.statistics(),
        })
    }
}

/// Executes strategies step by step against a single execution context
pub struct PipelineEngine {
    registry: Arc<OperationRegistry>,
    services: OperationServices,
    resolver: ParameterResolver,
}

impl PipelineEngine {
    pub fn new(registry: Arc<OperationRegistry>, services: OperationServices) -> Self {
        Self { registry, services, resolver: ParameterResolver::default() }
    }

    pub fn with_max_resolution_passes(mut self, passes: usize) -> Self {
        self.resolver = ParameterResolver::new(passes);
        self
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Pre-flight: validate the step list, resolve parameters, confirm every operation
    /// exists and build each one from its parameters. Nothing runs unless all of it passes.
    pub fn prepare(&self, strategy: &StrategyDefinition, overrides: &ParameterOverrides) -> Result<PreparedRun> {
        strategy.validate()?;

        let resolved = self.resolver.resolve(&strategy.steps, &strategy.parameters, overrides)?;

        for step in &resolved.steps {
            if !self.registry.contains(&step.operation) {
                return Err(MapperError::UnknownOperation(format!(
                    "'{}' referenced by step '{}' (known operations: {})",
                    step.operation,
                    step.name,
                    self.registry.names().join(", ")
                )));
            }
        }

        let mut steps = Vec::with_capacity(resolved.steps.len());
        for definition in resolved.steps {
            let factory = self.registry.dispatch(&definition.operation)?;
            let operation = factory(&definition.parameters, &self.services).map_err(|e| match e {
                MapperError::Configuration(message) => {
                    MapperError::Configuration(format!("step '{}': {}", definition.name, message))
                }
                other => other,
            })?;
            steps.push(PreparedStep { definition, operation });
        }

        Ok(PreparedRun {
            run_id: Uuid::new_v4(),
            strategy_name: strategy.name.clone(),
            parameters: resolved.parameters,
            steps,
        })
    }

    /// Pre-flight and execute. Pre-flight failures are returned as errors; step failures
    /// are reported through the [`RunReport`].
    pub async fn run(
        &self,
        strategy: &StrategyDefinition,
        overrides: &ParameterOverrides,
        cancel: &CancellationFlag,
    ) -> Result<RunReport> {
        let prepared = self.prepare(strategy, overrides)?;
        Ok(self.execute(prepared, cancel).await)
    }

    /// Run prepared steps in declared order.
    pub async fn execute(&self, prepared: PreparedRun, cancel: &CancellationFlag) -> RunReport {
        let PreparedRun { run_id, strategy_name, parameters, steps } = prepared;
        let started_at = Utc::now();
        let total = steps.len();
        let mut context = ExecutionContext::new(parameters);
        let mut state = RunState::Running;
        let mut failure: Option<StepFailure> = None;
        let mut steps_executed = 0;

        info!("🚀 Starting strategy '{}' (run {}, {} steps)", strategy_name, run_id, total);
        emit_counter(MetricName::RunsStarted, 1);

        for (index, step) in steps.iter().enumerate() {
            let definition = &step.definition;
            if cancel.is_cancelled() {
                warn!("⏹️ Run {} cancelled before step '{}'", run_id, definition.name);
                let err = MapperError::Cancelled(definition.name.clone());
                failure = Some(step_failure(definition, &err));
                state = RunState::Failed;
                break;
            }

            info!("🔄 Executing step {}/{}: {} ({})", index + 1, total, definition.name, definition.operation);
            let rows_before = context.total_rows();
            let started = Instant::now();
            let result = step.operation.execute(&context).await;
            let elapsed = started.elapsed();
            steps_executed += 1;
            emit_counter(MetricName::StepsExecuted, 1);
            emit_histogram(MetricName::StepDuration, elapsed.as_secs_f64());

            match result {
                Ok(output) => {
                    let written = context.apply(output);
                    let rows_after = context.total_rows();
                    let row_delta = rows_after as i64 - rows_before as i64;
                    context.record_step(
                        &definition.name,
                        json!({
                            "operation": definition.operation,
                            "status": "completed",
                            "duration_ms": elapsed.as_millis() as u64,
                            "rows_before": rows_before,
                            "rows_after": rows_after,
                            "row_delta": row_delta,
                            "datasets_written": written,
                        }),
                    );
                    info!("✅ Step '{}' completed in {}ms", definition.name, elapsed.as_millis());
                }
                Err(err) => {
                    emit_counter(MetricName::StepsFailed, 1);
                    let failed = step_failure(definition, &err);
                    let status = if definition.required { "failed" } else { "failed_tolerated" };
                    context.record_step(
                        &definition.name,
                        json!({
                            "operation": definition.operation,
                            "status": status,
                            "duration_ms": elapsed.as_millis() as u64,
                            "error_kind": failed.kind,
                            "error": failed.message,
                        }),
                    );
                    context.record_failure(json!({
                        "step": failed.step,
                        "operation": failed.operation,
                        "kind": failed.kind,
                        "message": failed.message,
                        "required": definition.required,
                    }));

                    if definition.required {
                        error!("❌ Required step '{}' failed ({}): {}", definition.name, failed.kind, err);
                        failure = Some(failed);
                        state = RunState::Failed;
                        break;
                    }
                    warn!("⚠️ Optional step '{}' failed ({}), continuing: {}", definition.name, failed.kind, err);
                }
            }
        }

        if state == RunState::Running {
            state = RunState::Completed;
        }

        match state {
            RunState::Completed => {
                emit_counter(MetricName::RunsCompleted, 1);
                info!("🎉 Strategy '{}' completed: {} steps executed", strategy_name, steps_executed);
            }
            _ => {
                emit_counter(MetricName::RunsFailed, 1);
                error!("💥 Strategy '{}' failed after {} of {} steps", strategy_name, steps_executed, total);
            }
        }

        RunReport {
            run_id,
            strategy: strategy_name,
            state,
            failure,
            steps_executed,
            context,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

fn step_failure(definition: &StepDefinition, err: &MapperError) -> StepFailure {
    StepFailure {
        step: definition.name.clone(),
        operation: definition.operation.clone(),
        kind: err.kind(),
        message: err.to_string(),
    }
}
