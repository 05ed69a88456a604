//! Metrics and tracing helpers
//!
//! With the `metrics` feature, [`METRICS`] holds OpenTelemetry instruments
//! exported into a private `prometheus::Registry`; [`InventoryMetrics::render`]
//! produces the text exposition format for a scrape endpoint.
//!
//! With the `tracing` feature, [`tracing_helpers`] builds the spans used around
//! queries, transactions and placement work.

#[cfg(feature = "metrics")]
pub use otel::{InventoryMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry::{global, KeyValue};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<InventoryMetrics> = Lazy::new(InventoryMetrics::init);

    pub struct InventoryMetrics {
        registry: Registry,
        _provider: Option<SdkMeterProvider>,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait: Histogram<f64>,
        pub placements_total: Counter<u64>,
        pub allocation_failures_total: Counter<u64>,
        pub placement_conflicts_total: Counter<u64>,
        pub cascade_failures_total: Counter<u64>,
    }

    impl InventoryMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => Some(SdkMeterProvider::builder().with_reader(exporter).build()),
                Err(e) => {
                    log::error!("failed to build prometheus exporter, metrics disabled: {e}");
                    None
                }
            };
            let meter = match &provider {
                Some(provider) => provider.meter("stacks"),
                None => global::meter("stacks"),
            };

            Self {
                registry,
                queries_total: meter
                    .u64_counter("stacks_queries")
                    .with_description("Total queries executed")
                    .build(),
                query_errors_total: meter
                    .u64_counter("stacks_query_errors")
                    .with_description("Queries that returned an error")
                    .build(),
                query_duration: meter
                    .f64_histogram("stacks_query_duration_seconds")
                    .with_description("Duration of queries")
                    .build(),
                connection_wait: meter
                    .f64_histogram("stacks_connection_wait_seconds")
                    .with_description("Time spent waiting for a pooled connection")
                    .build(),
                placements_total: meter
                    .u64_counter("stacks_placements")
                    .with_description("Containers assigned a shelf position")
                    .build(),
                allocation_failures_total: meter
                    .u64_counter("stacks_allocation_failures")
                    .with_description("Placement batches aborted for lack of a matching position")
                    .build(),
                placement_conflicts_total: meter
                    .u64_counter("stacks_placement_conflicts")
                    .with_description("Placements lost to a concurrent writer")
                    .build(),
                cascade_failures_total: meter
                    .u64_counter("stacks_cascade_failures")
                    .with_description("Job completion cascades that failed after commit")
                    .build(),
                _provider: provider,
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, waited: Duration) {
            self.connection_wait.record(waited.as_secs_f64(), &[]);
        }

        pub fn record_placements(&self, container_type: &'static str, count: u64) {
            self.placements_total
                .add(count, &[KeyValue::new("container_type", container_type)]);
        }

        pub fn record_allocation_failure(&self, reason: &'static str) {
            self.allocation_failures_total
                .add(1, &[KeyValue::new("reason", reason)]);
        }

        pub fn record_placement_conflict(&self) {
            self.placement_conflicts_total.add(1, &[]);
        }

        pub fn record_cascade_failure(&self, cascade: &'static str) {
            self.cascade_failures_total
                .add(1, &[KeyValue::new("cascade", cascade)]);
        }

        /// Prometheus text exposition of everything recorded so far
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {e}");
                return String::new();
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_query_span(query: &str) -> Span {
        let statement = query.split_whitespace().next().unwrap_or("");
        info_span!("stacks.query", db.statement = statement)
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("stacks.acquire_connection")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("stacks.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("stacks.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("stacks.transaction.rollback")
    }

    pub fn allocation_span(container_type: &'static str, containers: usize) -> Span {
        info_span!("stacks.allocate", container_type, containers)
    }

    pub fn reassign_span() -> Span {
        info_span!("stacks.reassign")
    }

    pub fn cascade_span(cascade: &'static str, job_id: i64) -> Span {
        info_span!("stacks.cascade", cascade, job_id)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::METRICS;
    use std::time::Duration;

    #[test]
    fn test_recorded_counters_are_rendered() {
        METRICS.record_placements("Tray", 3);
        METRICS.record_allocation_failure("size_class");
        METRICS.record_query_duration(Duration::from_millis(4));

        let text = METRICS.render();
        assert!(text.contains("stacks_placements"), "missing placements in:\n{text}");
        assert!(text.contains("stacks_allocation_failures"));
    }
}
