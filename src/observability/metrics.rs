//! Metrics for pipeline runs and identifier resolution.
//!
//! Recording goes through the `metrics` facade and is a no-op until a recorder is
//! installed (see [`install_prometheus`]).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Engine
    RunsStarted,
    RunsCompleted,
    RunsFailed,
    StepsExecuted,
    StepsFailed,
    StepDuration,

    // Matching
    MatchesDirect,
    MatchesComposite,
    MatchesExternal,
    RecordsUnmatched,

    // Resolver
    ResolverRequests,
    ResolverIdsRequested,
    ResolverCacheHits,
    ResolverRetries,
    ResolverUnresolved,
    ResolverBatchDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "idmapper_runs_started_total",
            MetricName::RunsCompleted => "idmapper_runs_completed_total",
            MetricName::RunsFailed => "idmapper_runs_failed_total",
            MetricName::StepsExecuted => "idmapper_steps_executed_total",
            MetricName::StepsFailed => "idmapper_steps_failed_total",
            MetricName::StepDuration => "idmapper_step_duration_seconds",

            MetricName::MatchesDirect => "idmapper_matches_direct_total",
            MetricName::MatchesComposite => "idmapper_matches_composite_total",
            MetricName::MatchesExternal => "idmapper_matches_external_total",
            MetricName::RecordsUnmatched => "idmapper_records_unmatched_total",

            MetricName::ResolverRequests => "idmapper_resolver_requests_total",
            MetricName::ResolverIdsRequested => "idmapper_resolver_ids_requested_total",
            MetricName::ResolverCacheHits => "idmapper_resolver_cache_hits_total",
            MetricName::ResolverRetries => "idmapper_resolver_retries_total",
            MetricName::ResolverUnresolved => "idmapper_resolver_unresolved_total",
            MetricName::ResolverBatchDuration => "idmapper_resolver_batch_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn emit_counter(name: MetricName, value: u64) {
    metrics::counter!(name.as_str()).increment(value);
}

pub fn emit_histogram(name: MetricName, value: f64) {
    metrics::histogram!(name.as_str()).record(value);
}

/// Install a Prometheus recorder for this process. The handle renders the exposition text.
pub fn install_prometheus() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))
}
