use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use idmapper_core::{MapperError, Result, Row, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::EXPORT_DATASET;
use crate::infra::{write_table, TableFormat};
use crate::pipeline::context::ExecutionContext;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExportParams {
    input_key: String,
    path: PathBuf,
    #[serde(default)]
    format: Option<String>,
    /// Write only these columns, in this order
    #[serde(default)]
    columns: Option<Vec<String>>,
}

/// Writes a dataset to disk and records the file as a run artifact
pub struct ExportDataset {
    input_key: String,
    path: PathBuf,
    format: TableFormat,
    columns: Option<Vec<String>>,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: ExportParams = parse_params(EXPORT_DATASET, parameters)?;
    let format = match &params.format {
        Some(name) => TableFormat::from_name(name)?,
        None => TableFormat::from_path(&params.path)?,
    };
    Ok(Box::new(ExportDataset {
        input_key: params.input_key,
        path: params.path,
        format,
        columns: params.columns,
    }))
}

fn project(table: &Table, columns: &[String]) -> Result<Table> {
    if let Some(missing) = columns.iter().find(|c| !table.has_column(c)) {
        return Err(MapperError::data(format!(
            "cannot export column '{}': not present (columns: {})",
            missing,
            table.columns().join(", ")
        )));
    }
    let mut projected = Table::new(columns.iter().cloned());
    for row in table.rows() {
        let kept: Row = columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        projected.push_row(kept)?;
    }
    Ok(projected)
}

#[async_trait]
impl Operation for ExportDataset {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let table = context.dataset(&self.input_key)?;
        match &self.columns {
            Some(columns) => write_table(&project(table, columns)?, &self.path, self.format).await?,
            None => write_table(table, &self.path, self.format).await?,
        }

        info!("💾 Exported {} rows of '{}' to {}", table.len(), self.input_key, self.path.display());
        Ok(StepOutput::new()
            .with_statistic(
                format!("{}_export", self.input_key),
                json!({"path": self.path.display().to_string(), "rows": table.len()}),
            )
            .with_artifact(self.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::params_from as params;
    use serde_json::Value;

    fn context() -> ExecutionContext {
        let mut table = Table::new(["source_id", "target_id", "confidence"]);
        let mut row = Row::new();
        row.insert("source_id".to_string(), json!("X1"));
        row.insert("target_id".to_string(), Value::Null);
        row.insert("confidence".to_string(), json!(0.9));
        table.push_row(row).unwrap();

        let mut context = ExecutionContext::default();
        context.insert_dataset("mapping", table);
        context
    }

    #[tokio::test]
    async fn test_export_projected_tsv_registers_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/mapping.tsv");
        let op = build(
            &params(json!({"input_key": "mapping", "path": path, "columns": ["target_id", "source_id"]})),
            &OperationServices::default(),
        )
        .unwrap();

        let output = op.execute(&context()).await.unwrap();

        assert_eq!(output.artifacts, vec![path.clone()]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "target_id\tsource_id\n\tX1\n");
        assert_eq!(output.statistics["mapping_export"]["rows"], json!(1));
    }

    #[tokio::test]
    async fn test_export_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        let op = build(&params(json!({"input_key": "mapping", "path": path})), &OperationServices::default()).unwrap();

        op.execute(&context()).await.unwrap();

        let written: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["confidence"], json!(0.9));
    }

    #[tokio::test]
    async fn test_unknown_export_column() {
        let dir = tempfile::tempdir().unwrap();
        let op = build(
            &params(json!({"input_key": "mapping", "path": dir.path().join("m.csv"), "columns": ["nope"]})),
            &OperationServices::default(),
        )
        .unwrap();
        assert!(op.execute(&context()).await.is_err());
    }
}
