// Pipeline execution: strategies, parameters, registry, context, engine, and the
// identifier processing the built-in steps are made of

pub mod context;
pub mod engine;
pub mod params;
pub mod processing;
pub mod registry;
pub mod steps;
pub mod strategy;

pub use context::ExecutionContext;
pub use engine::{CancellationFlag, PipelineEngine, PreparedRun, RunReport, RunState, StepFailure};
pub use params::{ParameterOverrides, ParameterResolver};
pub use registry::{OperationFactory, OperationRegistry};
pub use steps::{Operation, OperationServices, StepOutput, StepParameters};
pub use strategy::{StepDefinition, StrategyDefinition};
