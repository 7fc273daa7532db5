use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use idmapper_core::{MapperError, Result, Table};

use crate::constants;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::registry::OperationRegistry;
use crate::resolver::ExternalResolverClient;

pub mod export;
pub mod filter;
pub mod load;
pub mod matching;
pub mod merge;
pub mod normalize;
pub mod overlap;
pub mod reconcile;

pub type StepParameters = Map<String, Value>;

/// Common trait for all pipeline operations
///
/// An operation is built once per step from validated parameters, then executed
/// against a read-only view of the context. Everything it wants to keep goes into
/// the returned [`StepOutput`], which the engine merges after the step returns.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput>;
}

/// Datasets, statistics and artifacts produced by one step
#[derive(Debug, Default)]
pub struct StepOutput {
    pub datasets: Vec<(String, Table)>,
    pub statistics: Map<String, Value>,
    pub artifacts: Vec<PathBuf>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, key: impl Into<String>, table: Table) -> Self {
        self.datasets.push((key.into(), table));
        self
    }

    pub fn with_statistic(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statistics.insert(key.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifacts.push(path);
        self
    }
}

/// Shared collaborators handed to operation factories.
#[derive(Clone, Default)]
pub struct OperationServices {
    pub resolver: Option<Arc<ExternalResolverClient>>,
}

impl OperationServices {
    pub fn with_resolver(resolver: Arc<ExternalResolverClient>) -> Self {
        Self { resolver: Some(resolver) }
    }
}

/// Decode a step's parameters into the operation's typed configuration.
pub fn parse_params<P: DeserializeOwned>(operation: &str, parameters: &StepParameters) -> Result<P> {
    serde_json::from_value(Value::Object(parameters.clone()))
        .map_err(|e| MapperError::config(format!("Invalid parameters for operation '{}': {}", operation, e)))
}

/// Populate `registry` with every built-in operation.
pub fn register_builtin_operations(registry: &mut OperationRegistry) -> Result<()> {
    registry.register(constants::LOAD_DATASET, load::build)?;
    registry.register(constants::NORMALIZE_IDENTIFIERS, normalize::build)?;
    registry.register(constants::DIRECT_MATCH, matching::build_direct)?;
    registry.register(constants::COMPOSITE_MATCH, matching::build_composite)?;
    registry.register(constants::EXTERNAL_MATCH, matching::build_external)?;
    registry.register(constants::RECONCILE, reconcile::build)?;
    registry.register(constants::FILTER_DATASET, filter::build)?;
    registry.register(constants::MERGE_DATASETS, merge::build)?;
    registry.register(constants::CALCULATE_OVERLAP, overlap::build)?;
    registry.register(constants::EXPORT_DATASET, export::build)?;
    Ok(())
}

/// Step parameters from a JSON object literal.
#[cfg(test)]
pub(crate) fn params_from(value: Value) -> StepParameters {
    match value {
        Value::Object(map) => map,
        other => panic!("step parameters must be an object, got {}", other),
    }
}
