// Identifier processing: normalization, staged matching and reconciliation

pub mod matching;
pub mod normalize;
pub mod reconcile;

pub use normalize::{IdentifierNormalizer, NormalizationRules, NormalizedBatch};
pub use reconcile::reconcile;
