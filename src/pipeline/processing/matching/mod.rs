//! Staged identifier matching.
//!
//! Each stage takes the identifiers still unmatched after the previous stage and
//! splits them into match records and a new unmatched remainder. A source that a
//! stage places is never handed to the next one.

pub mod composite;
pub mod direct;
pub mod external;
pub mod index;

use async_trait::async_trait;
use std::collections::BTreeSet;

use idmapper_core::{IdentifierRecord, MatchRecord, Result};

pub use composite::{composite_confidence, CompositeMatchStage};
pub use direct::DirectMatchStage;
pub use external::{resolution_confidence, ExternalMatchStage};
pub use index::TargetIndex;

/// What one stage produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    pub matched: Vec<MatchRecord>,
    pub unmatched: Vec<IdentifierRecord>,
}

impl StageOutcome {
    /// Distinct source ids that received at least one match
    pub fn matched_sources(&self) -> BTreeSet<&str> {
        self.matched.iter().filter_map(|m| m.source_id.as_deref()).collect()
    }

    fn absorb(&mut self, other: StageOutcome) {
        self.matched.extend(other.matched);
        self.unmatched = other.unmatched;
    }
}

#[async_trait]
pub trait MatchStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, unmatched: Vec<IdentifierRecord>, index: &TargetIndex) -> Result<StageOutcome>;
}

/// Chain stages, feeding each one the previous stage's unmatched remainder.
pub async fn run_stages(
    stages: &[&dyn MatchStage],
    input: Vec<IdentifierRecord>,
    index: &TargetIndex,
) -> Result<StageOutcome> {
    let mut combined = StageOutcome { matched: Vec::new(), unmatched: input };
    for stage in stages {
        let remaining = std::mem::take(&mut combined.unmatched);
        let outcome = stage.run(remaining, index).await?;
        tracing::debug!(
            "{} stage matched {} records, {} left unmatched",
            stage.name(),
            outcome.matched.len(),
            outcome.unmatched.len()
        );
        combined.absorb(outcome);
    }
    Ok(combined)
}
