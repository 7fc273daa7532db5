use async_trait::async_trait;

use idmapper_core::{IdentifierRecord, MatchRecord, MatchType, Result};

use super::{MatchStage, StageOutcome, TargetIndex};
use crate::constants::DIRECT_CONFIDENCE;
use crate::observability::{emit_counter, MetricName};

/// Exact equality between a normalized source id and a target index key
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectMatchStage;

#[async_trait]
impl MatchStage for DirectMatchStage {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn run(&self, unmatched: Vec<IdentifierRecord>, index: &TargetIndex) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        for record in unmatched {
            let targets = index.lookup(&record.normalized_id);
            if targets.is_empty() {
                outcome.unmatched.push(record);
                continue;
            }
            for target in targets {
                outcome.matched.push(MatchRecord::matched(
                    record.raw_id.clone(),
                    target.clone(),
                    MatchType::Direct,
                    DIRECT_CONFIDENCE,
                    None,
                ));
            }
        }
        emit_counter(MetricName::MatchesDirect, outcome.matched.len() as u64);
        Ok(outcome)
    }
}
