use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use idmapper_core::{IdentifierRecord, MatchRecord, MatchType, ResolutionCacheEntry, ResolutionType, Result};

use super::{MatchStage, StageOutcome, TargetIndex};
use crate::constants::{
    HISTORICAL_RESOLUTION_CONFIDENCE, PRIMARY_RESOLUTION_CONFIDENCE, SECONDARY_RESOLUTION_CONFIDENCE,
};
use crate::observability::{emit_counter, MetricName};
use crate::resolver::ExternalResolverClient;

/// Confidence for a match reached through the authority, or `None` when the
/// resolution cannot produce a match at all.
pub fn resolution_confidence(entry: &ResolutionCacheEntry) -> Option<f64> {
    entry.resolved_id.as_ref()?;
    match entry.resolution_type {
        ResolutionType::Primary => Some(PRIMARY_RESOLUTION_CONFIDENCE),
        ResolutionType::Secondary => Some(SECONDARY_RESOLUTION_CONFIDENCE),
        ResolutionType::Merged | ResolutionType::Demerged | ResolutionType::Obsolete => {
            Some(HISTORICAL_RESOLUTION_CONFIDENCE)
        }
        ResolutionType::Unresolved => None,
    }
}

/// Looks unmatched ids up in the authority service and retries the direct match
/// with whatever current id it returns.
pub struct ExternalMatchStage {
    resolver: Arc<ExternalResolverClient>,
}

impl ExternalMatchStage {
    pub fn new(resolver: Arc<ExternalResolverClient>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl MatchStage for ExternalMatchStage {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn run(&self, unmatched: Vec<IdentifierRecord>, index: &TargetIndex) -> Result<StageOutcome> {
        if unmatched.is_empty() {
            return Ok(StageOutcome::default());
        }

        let queries: Vec<String> = unmatched.iter().map(|r| r.normalized_id.clone()).collect();
        let resolutions = self.resolver.resolve_batch(&queries).await;

        let mut outcome = StageOutcome::default();
        for record in unmatched {
            let Some(entry) = resolutions.get(record.normalized_id.trim()) else {
                outcome.unmatched.push(record);
                continue;
            };
            let (Some(confidence), Some(resolved_id)) = (resolution_confidence(entry), entry.resolved_id.as_deref())
            else {
                outcome.unmatched.push(record);
                continue;
            };

            let targets = index.lookup_raw(resolved_id);
            if targets.is_empty() {
                outcome.unmatched.push(record);
                continue;
            }

            let detail = json!({
                "query_id": entry.query_id,
                "resolved_id": resolved_id,
                "resolution_type": entry.resolution_type,
            });
            for target in targets {
                outcome.matched.push(MatchRecord::matched(
                    record.raw_id.clone(),
                    target.clone(),
                    MatchType::ExternalResolved,
                    confidence,
                    Some(detail.clone()),
                ));
            }
        }
        emit_counter(MetricName::MatchesExternal, outcome.matched.len() as u64);
        Ok(outcome)
    }
}
