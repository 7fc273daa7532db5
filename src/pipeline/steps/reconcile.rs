use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use idmapper_core::{IdentifierRecord, MapperError, MatchRecord, Result, Table};

use super::{parse_params, Operation, OperationServices, StepOutput, StepParameters};
use crate::constants::RECONCILE;
use crate::observability::{emit_counter, MetricName};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::processing::reconcile;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReconcileParams {
    match_keys: Vec<String>,
    #[serde(default)]
    unmatched_key: Option<String>,
    output_key: String,
}

/// Gathers the output of every matching stage into one classified mapping table
pub struct Reconcile {
    params: ReconcileParams,
}

pub fn build(parameters: &StepParameters, _services: &OperationServices) -> Result<Box<dyn Operation>> {
    let params: ReconcileParams = parse_params(RECONCILE, parameters)?;
    if params.match_keys.is_empty() {
        return Err(MapperError::config("reconcile needs at least one entry in match_keys"));
    }
    Ok(Box::new(Reconcile { params }))
}

#[async_trait]
impl Operation for Reconcile {
    async fn execute(&self, context: &ExecutionContext) -> Result<StepOutput> {
        let mut records: Vec<MatchRecord> = Vec::new();
        for key in &self.params.match_keys {
            records.extend(context.dataset(key)?.to_records::<MatchRecord>()?);
        }
        if let Some(key) = &self.params.unmatched_key {
            let leftovers: Vec<IdentifierRecord> = context.dataset(key)?.to_records()?;
            records.extend(leftovers.into_iter().map(|r| MatchRecord::unmatched(r.raw_id)));
        }

        let reconciled = reconcile(&records)?;
        let canonical = reconciled.iter().filter(|r| r.is_canonical).count();
        let one_to_many_source = reconciled.iter().filter(|r| r.is_one_to_many_source).count();
        let one_to_many_target = reconciled.iter().filter(|r| r.is_one_to_many_target).count();
        let unmatched = reconciled.iter().filter(|r| r.record.target_id.is_none()).count();

        emit_counter(MetricName::RecordsUnmatched, unmatched as u64);
        info!(
            "🧮 Reconciled {} records: {} canonical, {} one-to-many source, {} one-to-many target, {} unmatched",
            reconciled.len(),
            canonical,
            one_to_many_source,
            one_to_many_target,
            unmatched
        );

        Ok(StepOutput::new()
            .with_statistic(
                self.params.output_key.clone(),
                json!({
                    "records": reconciled.len(),
                    "canonical": canonical,
                    "one_to_many_source": one_to_many_source,
                    "one_to_many_target": one_to_many_target,
                    "unmatched": unmatched,
                }),
            )
            .with_dataset(self.params.output_key.clone(), Table::from_records(&reconciled)?))
    }
}
