// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities for telemetry validation.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Log capture buffer for testing.
///
/// Formatted `tracing` output is appended to a shared buffer that tests can inspect.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the captured log output as a string.
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }

    /// Asserts that the captured log output contains the given string.
    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(
            output.contains(expected),
            "log output does not contain '{expected}', got:\n{output}"
        );
    }

    /// Creates a `tracing_subscriber` that writes to this capture buffer.
    /// Use with `set_default()` for thread-local capture.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Writer that appends to a shared buffer.
pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "metrics")]
pub(crate) use metric_tester::MetricTester;

#[cfg(feature = "metrics")]
mod metric_tester {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, Metric, MetricData, ResourceMetrics, ScopeMetrics};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    /// Test helper for collecting and asserting on `OTel` metrics.
    #[derive(Debug)]
    pub(crate) struct MetricTester {
        exporter: InMemoryMetricExporter,
        provider: SdkMeterProvider,
    }

    impl MetricTester {
        #[must_use]
        pub fn new() -> Self {
            let in_memory = InMemoryMetricExporter::default();

            Self {
                exporter: in_memory.clone(),
                provider: SdkMeterProvider::builder().with_periodic_exporter(in_memory).build(),
            }
        }

        #[must_use]
        pub fn meter_provider(&self) -> &SdkMeterProvider {
            &self.provider
        }

        #[must_use]
        pub fn collect_attributes(&self) -> Vec<KeyValue> {
            self.provider.force_flush().expect("flush failed");
            self.exporter
                .get_finished_metrics()
                .expect("metrics unavailable")
                .iter()
                .flat_map(ResourceMetrics::scope_metrics)
                .flat_map(ScopeMetrics::metrics)
                .flat_map(collect_attributes_for_metric)
                .collect()
        }

        pub fn assert_attributes_contain(&self, key_values: &[KeyValue]) {
            let attributes = self.collect_attributes();

            for attr in key_values {
                assert!(
                    attributes.contains(attr),
                    "attribute {attr:?} not found in collected attributes: {attributes:?}"
                );
            }
        }
    }

    fn collect_attributes_for_metric(metric: &Metric) -> Vec<KeyValue> {
        match metric.data() {
            AggregatedMetrics::F64(MetricData::Histogram(data)) => data.data_points().flat_map(|v| v.attributes().cloned()).collect(),
            AggregatedMetrics::U64(MetricData::Sum(data)) => data.data_points().flat_map(|v| v.attributes().cloned()).collect(),
            _ => Vec::new(),
        }
    }
}
