//! Metric descriptions for Rootline.
//!
//! The pipeline crates emit through the `metrics` facade directly; nothing is
//! recorded here. Call [`register_metrics`] once after installing a recorder.

use metrics::{describe_counter, describe_histogram, Unit};

/// Every metric the pipeline emits.
pub const METRIC_NAMES: [&str; 7] = [
    "rootline_investigations_total",
    "rootline_stage_attempts_total",
    "rootline_stage_failures_total",
    "rootline_stage_duration_seconds",
    "rootline_log_queries_total",
    "rootline_retrieval_cache_hits_total",
    "rootline_retrieval_cache_misses_total",
];

/// Registers metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(
        "rootline_investigations_total",
        "Investigations finished, labelled by terminal phase"
    );

    // Stage metrics
    describe_counter!(
        "rootline_stage_attempts_total",
        "Stage attempts made by the orchestrator"
    );
    describe_counter!(
        "rootline_stage_failures_total",
        "Failed stage attempts, labelled by stage and error kind"
    );
    describe_histogram!(
        "rootline_stage_duration_seconds",
        Unit::Seconds,
        "Duration of a single stage attempt"
    );

    // Collaborator metrics
    describe_counter!(
        "rootline_log_queries_total",
        "Log queries executed during analysis, labelled by outcome"
    );
    describe_counter!(
        "rootline_retrieval_cache_hits_total",
        "Knowledge retrievals served from cache"
    );
    describe_counter!(
        "rootline_retrieval_cache_misses_total",
        "Knowledge retrievals that required a store search"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_unique_and_prefixed() {
        let unique: HashSet<_> = METRIC_NAMES.iter().collect();
        assert_eq!(unique.len(), METRIC_NAMES.len());
        assert!(METRIC_NAMES.iter().all(|n| n.starts_with("rootline_")));
    }

    #[test]
    fn test_register_without_recorder() {
        // describing with no recorder installed is a no-op
        register_metrics();
        register_metrics();
    }
}
