use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

use idmapper_core::{value_to_text, MapperError, Result, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::MERGE_DATASETS;
use crate::pipeline::context::ExecutionContext;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MergeParams {
    input_keys: Vec<String>,
    output_key: String,
    /// Keep only the first row for each value of this column; null values are never merged
    #[serde(default)]
    dedupe_on: Option<String>,
}

pub struct MergeDatasets {
    params: MergeParams,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: MergeParams = parse_params(MERGE_DATASETS, parameters)?;
    if params.input_keys.is_empty() {
        return Err(MapperError::config("merge_datasets needs at least one entry in input_keys"));
    }
    Ok(Box::new(MergeDatasets { params }))
}

#[async_trait]
impl Operation for MergeDatasets {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let inputs = self
            .params
            .input_keys
            .iter()
            .map(|key| context.dataset(key))
            .collect::<Result<Vec<_>>>()?;

        let columns: Vec<&String> = inputs.iter().flat_map(|t| t.columns()).collect();
        let mut merged = Table::new(columns.into_iter().cloned());
        if let Some(column) = &self.params.dedupe_on {
            if !merged.has_column(column) {
                return Err(MapperError::data(format!("no input dataset has column '{}'", column)));
            }
        }

        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        for table in &inputs {
            for row in table.rows() {
                if let Some(column) = &self.params.dedupe_on {
                    if let Some(key) = row.get(column).and_then(value_to_text) {
                        if !seen.insert(key) {
                            duplicates += 1;
                            continue;
                        }
                    }
                }
                merged.push_row(row.clone())?;
            }
        }

        let input_rows = Table::total_rows(inputs.iter().copied());
        Ok(StepOutput::new()
            .with_statistic(
                self.params.output_key.clone(),
                json!({
                    "input_rows": input_rows,
                    "output_rows": merged.len(),
                    "duplicates_removed": duplicates,
                }),
            )
            .with_dataset(self.params.output_key.clone(), merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::params_from as params;
    use idmapper_core::Row;
    use serde_json::Value;

    fn table(columns: &[&str], rows: &[&[Value]]) -> Table {
        let mut table = Table::new(columns.iter().copied());
        for values in rows {
            let row: Row = columns.iter().map(|c| c.to_string()).zip(values.iter().cloned()).collect();
            table.push_row(row).unwrap();
        }
        table
    }

    fn context() -> ExecutionContext {
        let mut context = ExecutionContext::default();
        context.insert_dataset("a", table(&["id", "x"], &[&[json!("1"), json!("ax")], &[json!("2"), json!("ay")]]));
        context.insert_dataset("b", table(&["id", "y"], &[&[json!("2"), json!("by")], &[Value::Null, json!("bn")]]));
        context
    }

    #[tokio::test]
    async fn test_union_of_columns() {
        let op = build(&params(json!({"input_keys": ["a", "b"], "output_key": "m"})), &OperationServices::default())
            .unwrap();
        let output = op.execute(&context()).await.unwrap();
        let merged = &output.datasets[0].1;

        assert_eq!(merged.columns(), &["id", "x", "y"]);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.rows()[0]["y"], Value::Null);
    }

    #[tokio::test]
    async fn test_dedupe_keeps_first_and_all_nulls() {
        let op = build(
            &params(json!({"input_keys": ["a", "b"], "output_key": "m", "dedupe_on": "id"})),
            &OperationServices::default(),
        )
        .unwrap();
        let output = op.execute(&context()).await.unwrap();
        let merged = &output.datasets[0].1;

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.rows()[1]["x"], json!("ay"));
        assert_eq!(output.statistics["m"]["duplicates_removed"], json!(1));
    }

    #[tokio::test]
    async fn test_unknown_dedupe_column() {
        let op = build(
            &params(json!({"input_keys": ["a"], "output_key": "m", "dedupe_on": "y"})),
            &OperationServices::default(),
        )
        .unwrap();
        assert!(op.execute(&context()).await.is_err());
    }
}
