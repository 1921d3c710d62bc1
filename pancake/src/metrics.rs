//! Compiler metrics
//!
//! Prometheus-compatible counters and histograms; a no-op unless the
//! embedding application installs a `metrics` recorder.

use std::time::Duration;

/// Record one finished compilation
pub fn record_compilation(duration: Duration, statements: usize) {
    metrics::histogram!("pancake_compile_duration_seconds").record(duration.as_secs_f64());
    metrics::counter!("pancake_compilations_total", "outcome" => "ok").increment(1);
    metrics::counter!("pancake_statements_total").increment(statements as u64);
}

/// Record a rejected compilation
pub fn record_compilation_error(error_kind: &'static str) {
    metrics::counter!("pancake_compilations_total", "outcome" => "error").increment(1);
    metrics::counter!("pancake_compile_errors_total", "error_type" => error_kind).increment(1);
}
