use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use idmapper_core::{value_to_text, IdentifierRecord, Result, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::NORMALIZE_IDENTIFIERS;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::processing::normalize::{IdentifierNormalizer, NormalizationRules};

const DISCARDED_SAMPLE: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NormalizeParams {
    input_key: String,
    column: String,
    output_key: String,
    #[serde(default)]
    rules: NormalizationRules,
}

/// Turns one column of a dataset into a table of identifier records
pub struct NormalizeIdentifiers {
    input_key: String,
    column: String,
    output_key: String,
    normalizer: IdentifierNormalizer,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: NormalizeParams = parse_params(NORMALIZE_IDENTIFIERS, parameters)?;
    Ok(Box::new(NormalizeIdentifiers {
        input_key: params.input_key,
        column: params.column,
        output_key: params.output_key,
        normalizer: IdentifierNormalizer::new(params.rules),
    }))
}

#[async_trait]
impl Operation for NormalizeIdentifiers {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let input = context.dataset(&self.input_key)?;
        let raw: Vec<String> = input.column_values(&self.column)?.into_iter().filter_map(value_to_text).collect();

        let batch = self.normalizer.normalize_batch(raw.iter().map(String::as_str));
        let records: Vec<IdentifierRecord> = batch.records;
        if !batch.discarded.is_empty() {
            warn!(
                "⚠️ {} value(s) in '{}.{}' normalized to an empty identifier: {:?}",
                batch.discarded.len(),
                self.input_key,
                self.column,
                batch.discarded.iter().take(DISCARDED_SAMPLE).collect::<Vec<_>>()
            );
        }
        let composites = records.iter().filter(|r| r.is_composite).count();
        let table = Table::from_records(&records)?;

        info!(
            "🧹 Normalized {} identifiers from '{}.{}' ({} composite)",
            records.len(),
            self.input_key,
            self.column,
            composites
        );
        Ok(StepOutput::new()
            .with_statistic(
                self.output_key.clone(),
                json!({
                    "input_rows": input.len(),
                    "non_blank_values": raw.len(),
                    "records": records.len(),
                    "composite": composites,
                    "discarded": batch.discarded.len(),
                    "discarded_values": batch.discarded.iter().take(DISCARDED_SAMPLE).collect::<Vec<_>>(),
                }),
            )
            .with_dataset(self.output_key.clone(), table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::params_from as params;
    use idmapper_core::{ErrorKind, Row};
    use serde_json::Value;

    fn context_with(column: &str, values: &[Value]) -> ExecutionContext {
        let mut table = Table::new([column]);
        for value in values {
            let mut row = Row::new();
            row.insert(column.to_string(), value.clone());
            table.push_row(row).unwrap();
        }
        let mut context = ExecutionContext::default();
        context.insert_dataset("raw", table);
        context
    }

    #[tokio::test]
    async fn test_normalizes_column_into_identifier_records() {
        let context = context_with(
            "uniprot",
            &[json!("UniProtKB:p12345-2"), Value::Null, json!("P001_P002"), json!("UniProtKB:p12345-2")],
        );
        let op = build(
            &params(json!({
                "input_key": "raw",
                "column": "uniprot",
                "output_key": "source_ids",
                "rules": {"strip_prefixes": ["UniProtKB:"], "strip_isoform": true},
            })),
            &OperationServices::default(),
        )
        .unwrap();

        let output = op.execute(&context).await.unwrap();
        let records: Vec<IdentifierRecord> = output.datasets[0].1.to_records().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].normalized_id, "P12345");
        assert!(records[1].is_composite);
        assert_eq!(records[1].components, vec!["P001", "P002"]);
        assert_eq!(output.statistics["source_ids"]["composite"], json!(1));
        assert_eq!(output.statistics["source_ids"]["discarded"], json!(0));
    }

    #[tokio::test]
    async fn test_counts_values_that_normalize_to_nothing() {
        let context = context_with("uniprot", &[json!("UniProtKB:"), json!("_"), json!("P12345"), json!("")]);
        let op = build(
            &params(json!({
                "input_key": "raw",
                "column": "uniprot",
                "output_key": "source_ids",
                "rules": {"strip_prefixes": ["UniProtKB:"]},
            })),
            &OperationServices::default(),
        )
        .unwrap();

        let output = op.execute(&context).await.unwrap();
        let stats = &output.statistics["source_ids"];
        assert_eq!(stats["records"], json!(1));
        assert_eq!(stats["discarded"], json!(2));
        assert_eq!(stats["discarded_values"], json!(["UniProtKB:", "_"]));
    }

    #[tokio::test]
    async fn test_missing_input_dataset() {
        let op = build(
            &params(json!({"input_key": "nope", "column": "id", "output_key": "out"})),
            &OperationServices::default(),
        )
        .unwrap();
        let err = op.execute(&ExecutionContext::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ContextKey);
    }
}
