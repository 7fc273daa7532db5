use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use idmapper_core::{MapperError, Result, Table};

use super::steps::StepOutput;

/// The working set of one pipeline run.
///
/// Operations read from it; only the engine writes to it, between steps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    datasets: BTreeMap<String, Table>,
    statistics: Map<String, Value>,
    artifacts: Vec<PathBuf>,
    parameters: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(parameters: Map<String, Value>) -> Self {
        Self { parameters, ..Self::default() }
    }

    /// Fetch a dataset written by an earlier step.
    pub fn dataset(&self, key: &str) -> Result<&Table> {
        self.datasets.get(key).ok_or_else(|| MapperError::ContextKey {
            key: key.to_string(),
            available: self.dataset_keys().join(", "),
        })
    }

    pub fn has_dataset(&self, key: &str) -> bool {
        self.datasets.contains_key(key)
    }

    pub fn dataset_keys(&self) -> Vec<&str> {
        self.datasets.keys().map(|k| k.as_str()).collect()
    }

    pub fn datasets(&self) -> &BTreeMap<String, Table> {
        &self.datasets
    }

    pub fn insert_dataset(&mut self, key: impl Into<String>, table: Table) {
        self.datasets.insert(key.into(), table);
    }

    pub fn statistics(&self) -> &Map<String, Value> {
        &self.statistics
    }

    pub fn statistic(&self, key: &str) -> Option<&Value> {
        self.statistics.get(key)
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn total_rows(&self) -> usize {
        Table::total_rows(self.datasets.values())
    }

    /// Merge a step's output. Returns the dataset keys that were written.
    pub(crate) fn apply(&mut self, output: StepOutput) -> Vec<String> {
        let StepOutput { datasets, statistics, artifacts } = output;
        let mut written = Vec::with_capacity(datasets.len());
        for (key, table) in datasets {
            written.push(key.clone());
            self.datasets.insert(key, table);
        }
        for (key, value) in statistics {
            self.statistics.insert(key, value);
        }
        self.artifacts.extend(artifacts);
        written
    }

    /// Record engine bookkeeping for one step under `statistics.steps.<name>`.
    pub(crate) fn record_step(&mut self, step_name: &str, summary: Value) {
        let steps = self
            .statistics
            .entry(crate::constants::STATS_STEPS)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = steps {
            map.insert(step_name.to_string(), summary);
        }
    }

    /// Append to `statistics.failed_steps`.
    pub(crate) fn record_failure(&mut self, failure: Value) {
        let failed = self
            .statistics
            .entry(crate::constants::STATS_FAILED_STEPS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = failed {
            items.push(failure);
        }
    }
}
