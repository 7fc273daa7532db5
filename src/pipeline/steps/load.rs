use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use idmapper_core::{value_to_text, MapperError, Result};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::LOAD_DATASET;
use crate::infra::{read_table, TableFormat};
use crate::pipeline::context::ExecutionContext;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadParams {
    path: PathBuf,
    output_key: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    identifier_column: Option<String>,
    #[serde(default)]
    drop_empty: bool,
}

/// Reads a csv, tsv or JSON file into a dataset
pub struct LoadDataset {
    path: PathBuf,
    format: TableFormat,
    output_key: String,
    identifier_column: Option<String>,
    drop_empty: bool,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: LoadParams = parse_params(LOAD_DATASET, parameters)?;
    let format = match &params.format {
        Some(name) => TableFormat::from_name(name)?,
        None => TableFormat::from_path(&params.path)?,
    };
    if params.drop_empty && params.identifier_column.is_none() {
        return Err(MapperError::config("drop_empty requires identifier_column"));
    }
    Ok(Box::new(LoadDataset {
        path: params.path,
        format,
        output_key: params.output_key,
        identifier_column: params.identifier_column,
        drop_empty: params.drop_empty,
    }))
}

#[async_trait]
impl Operation for LoadDataset {
    async fn execute(&self, _context: &ExecutionContext) -> Result<StepOutput> {
        let mut table = read_table(&self.path, self.format).await?;
        let loaded = table.len();

        if let Some(column) = &self.identifier_column {
            if !table.has_column(column) {
                return Err(MapperError::data(format!(
                    "{} has no column '{}' (columns: {})",
                    self.path.display(),
                    column,
                    table.columns().join(", ")
                )));
            }
            if self.drop_empty {
                table.retain(|row| row.get(column).and_then(value_to_text).map_or(false, |s| !s.trim().is_empty()));
            }
        }

        let dropped = loaded - table.len();
        info!("📥 Loaded {} rows from {} into '{}'", table.len(), self.path.display(), self.output_key);
        Ok(StepOutput::new()
            .with_statistic(
                self.output_key.clone(),
                json!({
                    "path": self.path.display().to_string(),
                    "rows_loaded": loaded,
                    "rows_dropped": dropped,
                    "rows": table.len(),
                }),
            )
            .with_dataset(self.output_key.clone(), table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idmapper_core::ErrorKind;
    use crate::pipeline::steps::params_from as params;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_csv_dropping_blank_identifiers() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(file, "uniprot,gene\nP12345,ABC\n,XYZ\n  ,QRS\nQ99999,DEF\n").unwrap();

        let op = build(
            &params(json!({
                "path": file.path(),
                "output_key": "source",
                "identifier_column": "uniprot",
                "drop_empty": true,
            })),
            &OperationServices::default(),
        )
        .unwrap();
        let output = op.execute(&ExecutionContext::default()).await.unwrap();

        let (key, table) = &output.datasets[0];
        assert_eq!(key, "source");
        assert_eq!(table.len(), 2);
        assert_eq!(output.statistics["source"]["rows_dropped"], json!(2));
    }

    #[tokio::test]
    async fn test_missing_identifier_column_is_data_error() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        write!(file, "id\tname\nA\tB\n").unwrap();

        let op = build(
            &params(json!({"path": file.path(), "output_key": "t", "identifier_column": "uniprot"})),
            &OperationServices::default(),
        )
        .unwrap();
        let err = op.execute(&ExecutionContext::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_unknown_format_fails_at_build() {
        let err = build(&params(json!({"path": "data.xlsx", "output_key": "t"})), &OperationServices::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_parameter_fails_at_build() {
        let result = build(
            &params(json!({"path": "data.csv", "output_key": "t", "colum": "x"})),
            &OperationServices::default(),
        );
        assert!(result.is_err());
    }
}
