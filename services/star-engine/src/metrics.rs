use lazy_static::lazy_static;
use point_ledger::LedgerError;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Instant;

lazy_static! {
    // Ledger operations
    pub static ref LEDGER_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "star_ledger_operations_total",
        "Committed ledger operations",
        &["operation"]
    ).expect("metric can be created");

    pub static ref LEDGER_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "star_ledger_rejections_total",
        "Ledger operations that failed, by error kind",
        &["operation", "kind"]
    ).expect("metric can be created");

    pub static ref LEDGER_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "star_ledger_operation_duration_seconds",
        "Ledger unit of work latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).expect("metric can be created");

    // HTTP metrics
    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "star_http_errors_total",
        "Error responses by kind",
        &["kind"]
    ).expect("metric can be created");
}

/// Record the outcome of one ledger operation
pub fn observe<T>(operation: &str, started: Instant, result: &Result<T, LedgerError>) {
    LEDGER_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => LEDGER_OPERATIONS_TOTAL.with_label_values(&[operation]).inc(),
        Err(e) => LEDGER_REJECTIONS_TOTAL
            .with_label_values(&[operation, e.kind()])
            .inc(),
    }
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_outcomes() {
        let ok: Result<(), LedgerError> = Ok(());
        let rejected: Result<(), LedgerError> = Err(LedgerError::Duplicate("x".into()));

        let before = LEDGER_OPERATIONS_TOTAL.with_label_values(&["test_op"]).get();
        observe("test_op", Instant::now(), &ok);
        observe("test_op", Instant::now(), &rejected);

        assert_eq!(
            LEDGER_OPERATIONS_TOTAL.with_label_values(&["test_op"]).get(),
            before + 1
        );
        assert!(
            LEDGER_REJECTIONS_TOTAL
                .with_label_values(&["test_op", "duplicate"])
                .get()
                >= 1
        );

        let text = metrics_handler().unwrap();
        assert!(text.contains("star_ledger_operations_total"));
    }
}
