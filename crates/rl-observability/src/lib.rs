//! # rl-observability
//!
//! Logging and metrics infrastructure for Rootline.
//!
//! Structured logging goes through `tracing`, with a pretty console format for
//! operators and a JSON format for log aggregation. Metrics are emitted with
//! the `metrics` facade by the pipeline crates; this crate registers their
//! descriptions so an installed exporter can publish them with help text.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LogFormat, LoggingConfig};
pub use metrics::{register_metrics, METRIC_NAMES};
