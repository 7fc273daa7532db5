pub mod config;
pub mod constants;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod resolver;

pub use config::AppConfig;
pub use idmapper_core::{ErrorKind, MapperError, Result};
pub use pipeline::{
    CancellationFlag, ExecutionContext, OperationRegistry, OperationServices, ParameterOverrides, PipelineEngine,
    RunReport, RunState, StrategyDefinition,
};
pub use resolver::{AuthorityService, ExternalResolverClient, ResolutionCache, ResolverSettings};
