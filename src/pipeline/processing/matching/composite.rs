use async_trait::async_trait;
use serde_json::json;

use idmapper_core::{IdentifierRecord, MatchRecord, MatchType, Result};

use super::{MatchStage, StageOutcome, TargetIndex};
use crate::constants::{COMPOSITE_MAX_CONFIDENCE, COMPOSITE_MIN_CONFIDENCE};
use crate::observability::{emit_counter, MetricName};

/// Confidence for a composite id where `matched` of `total` components hit the index.
///
/// One matching component scores the minimum; all of them score the maximum.
pub fn composite_confidence(matched: usize, total: usize) -> f64 {
    if matched == 0 || total <= 1 {
        return COMPOSITE_MIN_CONFIDENCE;
    }
    let matched = matched.min(total);
    let span = COMPOSITE_MAX_CONFIDENCE - COMPOSITE_MIN_CONFIDENCE;
    COMPOSITE_MIN_CONFIDENCE + span * (matched - 1) as f64 / (total - 1) as f64
}

/// Splits composite ids and matches each component on its own.
///
/// Every distinct target reached through any component becomes its own match
/// record; non-composite ids pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeMatchStage;

#[async_trait]
impl MatchStage for CompositeMatchStage {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn run(&self, unmatched: Vec<IdentifierRecord>, index: &TargetIndex) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        for record in unmatched {
            if !record.is_composite || record.components.is_empty() {
                outcome.unmatched.push(record);
                continue;
            }

            let mut matched_components = Vec::new();
            let mut targets: Vec<(String, String)> = Vec::new();
            for component in &record.components {
                let hits = index.lookup(component);
                if hits.is_empty() {
                    continue;
                }
                if !matched_components.contains(component) {
                    matched_components.push(component.clone());
                }
                for target in hits {
                    if !targets.iter().any(|(t, _)| t == target) {
                        targets.push((target.clone(), component.clone()));
                    }
                }
            }

            if targets.is_empty() {
                outcome.unmatched.push(record);
                continue;
            }

            let confidence = composite_confidence(matched_components.len(), record.components.len());
            for (target, component) in targets {
                let detail = json!({
                    "matched_component": component,
                    "matched_components": matched_components,
                    "component_count": record.components.len(),
                });
                outcome.matched.push(MatchRecord::matched(
                    record.raw_id.clone(),
                    target,
                    MatchType::Composite,
                    confidence,
                    Some(detail),
                ));
            }
        }
        emit_counter(MetricName::MatchesComposite, outcome.matched.len() as u64);
        Ok(outcome)
    }
}
