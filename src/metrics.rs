//! Prometheus metrics (feature `metrics`) and tracing span helpers (feature `tracing`).

#[cfg(feature = "metrics")]
pub use prometheus_metrics::{QueryMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<QueryMetrics> = Lazy::new(QueryMetrics::init);

    pub struct QueryMetrics {
        /// Registry the Prometheus exporter writes into.
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        pub transactions_total: Counter<u64>,
        pub rollbacks_total: Counter<u64>,
    }

    impl QueryMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("breakwater");

            let statements_total = meter
                .u64_counter("breakwater_statements_total")
                .with_description("Total statements executed")
                .build();

            let statement_errors_total = meter
                .u64_counter("breakwater_statement_errors_total")
                .with_description("Statements that failed in storage")
                .build();

            let statement_duration = meter
                .f64_histogram("breakwater_statement_duration_seconds")
                .with_description("Duration of statements")
                .build();

            let connection_wait_duration = meter
                .f64_histogram("breakwater_connection_wait_seconds")
                .with_description("Time spent acquiring a pooled connection")
                .build();

            let transactions_total = meter
                .u64_counter("breakwater_transactions_total")
                .with_description("Transactions started")
                .build();

            let rollbacks_total = meter
                .u64_counter("breakwater_rollbacks_total")
                .with_description("Transactions rolled back")
                .build();

            Self {
                registry,
                provider,
                statements_total,
                statement_errors_total,
                statement_duration,
                connection_wait_duration,
                transactions_total,
                rollbacks_total,
            }
        }

        /// Provider behind these instruments, for hosts adding their own meters.
        pub fn provider(&self) -> &SdkMeterProvider {
            &self.provider
        }

        /// Current samples in the Prometheus text format.
        pub fn render(&self) -> String {
            let mut buf = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
                log::warn!("failed to encode metrics: {e}");
            }
            String::from_utf8(buf).unwrap_or_default()
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.statement_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_transaction(&self) {
            self.transactions_total.add(1, &[]);
        }

        pub fn record_rollback(&self) {
            self.rollbacks_total.add(1, &[]);
        }
    }

}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{span, Level, Span};

    /// Longest statement prefix recorded on a span.
    const SQL_FIELD_LIMIT: usize = 200;

    fn truncate(sql: &str) -> &str {
        match sql.char_indices().nth(SQL_FIELD_LIMIT) {
            Some((idx, _)) => &sql[..idx],
            None => sql,
        }
    }

    pub fn execute_query_span(sql: &str) -> Span {
        span!(Level::DEBUG, "breakwater.execute", sql = truncate(sql))
    }

    pub fn acquire_connection_span() -> Span {
        span!(Level::DEBUG, "breakwater.acquire")
    }

    pub fn begin_transaction_span() -> Span {
        span!(Level::DEBUG, "breakwater.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        span!(Level::DEBUG, "breakwater.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        span!(Level::DEBUG, "breakwater.transaction.rollback")
    }

    pub fn populate_span(attribute: &str) -> Span {
        span!(Level::DEBUG, "breakwater.populate", attribute)
    }

}
