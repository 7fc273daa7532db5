use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use idmapper_core::{IdentifierRecord, MapperError, Result, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::{COMPOSITE_MATCH, DIRECT_MATCH, EXTERNAL_MATCH};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::processing::matching::{
    CompositeMatchStage, DirectMatchStage, ExternalMatchStage, MatchStage, TargetIndex,
};
use crate::pipeline::processing::normalize::{IdentifierNormalizer, NormalizationRules};

/// Parameters shared by every matching stage
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageParams {
    /// Identifier records still to be matched
    source_key: String,
    target_key: String,
    target_column: String,
    matched_key: String,
    unmatched_key: String,
    #[serde(default)]
    target_rules: NormalizationRules,
}

/// Runs one matching stage against a target dataset column
pub struct MatchOperation {
    params: StageParams,
    stage: Box<dyn MatchStage>,
}

fn build_stage(
    operation: &str,
    parameters: &StepParameters,
    stage: Box<dyn MatchStage>,
) -> Result<Box<dyn Operation>> {
    let params: StageParams = parse_params(operation, parameters)?;
    if params.matched_key == params.unmatched_key {
        return Err(MapperError::config(format!(
            "{}: matched_key and unmatched_key must differ (both '{}')",
            operation, params.matched_key
        )));
    }
    Ok(Box::new(MatchOperation { params, stage }))
}

pub fn build_direct(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    build_stage(DIRECT_MATCH, parameters, Box::new(DirectMatchStage))
}

pub fn build_composite(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    build_stage(COMPOSITE_MATCH, parameters, Box::new(CompositeMatchStage))
}

pub fn build_external(parameters: &StepParameters, services: &OperationServices) -> Result<Box<dyn Operation>> {
    let resolver = services.resolver.as_ref().map(Arc::clone).ok_or_else(|| {
        MapperError::config(format!(
            "{} needs an authority service; set resolver.base_url or IDMAPPER_AUTHORITY_URL",
            EXTERNAL_MATCH
        ))
    })?;
    build_stage(EXTERNAL_MATCH, parameters, Box::new(ExternalMatchStage::new(resolver)))
}

#[async_trait]
impl Operation for MatchOperation {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let p = &self.params;
        let source: Vec<IdentifierRecord> = context.dataset(&p.source_key)?.to_records()?;
        let target = context.dataset(&p.target_key)?;
        let index = TargetIndex::from_table(target, &p.target_column, IdentifierNormalizer::new(p.target_rules.clone()))?;

        let input = source.len();
        let outcome = self.stage.run(source, &index).await?;
        let matched_sources = outcome.matched_sources().len();

        info!(
            "🔗 {} match: {} of {} identifiers matched ({} records), {} remain",
            self.stage.name(),
            matched_sources,
            input,
            outcome.matched.len(),
            outcome.unmatched.len()
        );

        let statistics = json!({
            "stage": self.stage.name(),
            "input": input,
            "matched_sources": matched_sources,
            "match_records": outcome.matched.len(),
            "unmatched": outcome.unmatched.len(),
            "target_keys": index.key_count(),
        });
        Ok(StepOutput::new()
            .with_dataset(p.matched_key.clone(), Table::from_records(&outcome.matched)?)
            .with_dataset(p.unmatched_key.clone(), Table::from_records(&outcome.unmatched)?)
            .with_statistic(p.matched_key.clone(), statistics))
    }
}
