use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;

use idmapper_core::{value_to_text, Result, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::CALCULATE_OVERLAP;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::processing::normalize::{IdentifierNormalizer, NormalizationRules};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverlapParams {
    source_key: String,
    source_column: String,
    target_key: String,
    target_column: String,
    output_key: String,
    /// Compare normalized values instead of raw text
    #[serde(default)]
    rules: Option<NormalizationRules>,
}

/// Overlap statistics between two identifier columns
pub struct CalculateOverlap {
    params: OverlapParams,
    normalizer: Option<IdentifierNormalizer>,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: OverlapParams = parse_params(CALCULATE_OVERLAP, parameters)?;
    let normalizer = params.rules.clone().map(IdentifierNormalizer::new);
    Ok(Box::new(CalculateOverlap { params, normalizer }))
}

impl CalculateOverlap {
    fn distinct(&self, table: &Table, column: &str) -> Result<BTreeSet<String>> {
        Ok(table
            .column_values(column)?
            .into_iter()
            .filter_map(value_to_text)
            .filter_map(|text| match &self.normalizer {
                Some(normalizer) => normalizer.normalize_value(&text),
                None => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            })
            .collect())
    }
}

#[async_trait]
impl Operation for CalculateOverlap {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let p = &self.params;
        let source = self.distinct(context.dataset(&p.source_key)?, &p.source_column)?;
        let target = self.distinct(context.dataset(&p.target_key)?, &p.target_column)?;

        let shared = source.intersection(&target).count();
        let union = source.union(&target).count();
        let jaccard = if union == 0 { 0.0 } else { shared as f64 / union as f64 };

        Ok(StepOutput::new().with_statistic(
            p.output_key.clone(),
            json!({
                "source_unique": source.len(),
                "target_unique": target.len(),
                "shared": shared,
                "source_only": source.len() - shared,
                "target_only": target.len() - shared,
                "jaccard": jaccard,
            }),
        ))
    }
}
