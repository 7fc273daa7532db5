/// Operation names as they appear in strategy files.
/// The registry is populated from these, so a strategy and the code agree on spelling.

// Dataset I/O
pub const LOAD_DATASET: &str = "load_dataset";
pub const EXPORT_DATASET: &str = "export_dataset";

// Dataset shaping
pub const NORMALIZE_IDENTIFIERS: &str = "normalize_identifiers";
pub const FILTER_DATASET: &str = "filter_dataset";
pub const MERGE_DATASETS: &str = "merge_datasets";
pub const CALCULATE_OVERLAP: &str = "calculate_overlap";

// Matching stages
pub const DIRECT_MATCH: &str = "direct_match";
pub const COMPOSITE_MATCH: &str = "composite_match";
pub const EXTERNAL_MATCH: &str = "external_match";

// Classification
pub const RECONCILE: &str = "reconcile";

/// Separator joining the parts of a composite identifier unless a step overrides it
pub const DEFAULT_COMPOSITE_SEPARATOR: &str = "_";

// Stage confidences
pub const DIRECT_CONFIDENCE: f64 = 1.0;
pub const COMPOSITE_MIN_CONFIDENCE: f64 = 0.85;
pub const COMPOSITE_MAX_CONFIDENCE: f64 = 0.95;
pub const PRIMARY_RESOLUTION_CONFIDENCE: f64 = 0.95;
pub const SECONDARY_RESOLUTION_CONFIDENCE: f64 = 0.90;
pub const HISTORICAL_RESOLUTION_CONFIDENCE: f64 = 0.75;

/// Statistics keys written by the engine
pub const STATS_STEPS: &str = "steps";
pub const STATS_FAILED_STEPS: &str = "failed_steps";

/// Get all built-in operation names
pub fn builtin_operations() -> Vec<&'static str> {
    vec![
        LOAD_DATASET,
        NORMALIZE_IDENTIFIERS,
        DIRECT_MATCH,
        COMPOSITE_MATCH,
        EXTERNAL_MATCH,
        RECONCILE,
        FILTER_DATASET,
        MERGE_DATASETS,
        CALCULATE_OVERLAP,
        EXPORT_DATASET,
    ]
}
