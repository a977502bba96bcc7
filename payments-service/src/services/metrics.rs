//! Prometheus metrics for payments-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Recorder behind the `metrics` facade the shared HTTP middleware
/// records into. Without an installed recorder those counters and
/// histograms go nowhere.
static HTTP_METRICS: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
});

/// Install the facade recorder. Called once at startup, before the
/// first request hits the middleware.
pub fn init_http_metrics() {
    Lazy::force(&HTTP_METRICS);
}

/// Settlement attempts by gateway and outcome.
pub static PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_payments_total",
        "Total number of settlement attempts",
        &["gateway", "status"]
    )
    .expect("Failed to register payments_total")
});

/// Refunds by gateway and outcome.
pub static REFUNDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_refunds_total",
        "Total number of refunds",
        &["gateway", "status"]
    )
    .expect("Failed to register refunds_total")
});

/// Invoices by document type.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_invoices_total",
        "Total number of invoices by type",
        &["type"] // invoice, receipt, tax_invoice
    )
    .expect("Failed to register invoices_total")
});

/// Installments recorded against payment plans.
pub static INSTALLMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_installments_total",
        "Total number of plan installments recorded",
        &["frequency"]
    )
    .expect("Failed to register installments_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payments_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Render the facade recorder's HTTP metrics followed by the business
/// registry, in the Prometheus text format.
pub fn render_metrics() -> String {
    let mut output = HTTP_METRICS.render();
    let encoder = TextEncoder::new();
    output.push_str(
        &encoder
            .encode_to_string(&prometheus::gather())
            .unwrap_or_default(),
    );
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_counters_show_up_in_the_rendered_output() {
        init_http_metrics();
        metrics::counter!(
            "http_requests_total",
            &[
                ("method", "GET"),
                ("path", "/health"),
                ("status", "200"),
            ]
        )
        .increment(1);

        let output = render_metrics();
        assert!(output.contains("http_requests_total"));
        // Business registry metrics render alongside the facade's.
        PAYMENTS_TOTAL.with_label_values(&["tranzila", "completed"]).inc();
        assert!(render_metrics().contains("payments_payments_total"));
    }
}
