// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging and optional metrics for table operations.
//!
//! Every notable step of a lookup, invalidation or write is reported as a `tracing`
//! event carrying the table, operation, activity and cache key. With the `metrics`
//! feature the same events also increment an OpenTelemetry counter.

use std::time::Duration;

use tracing::Level;

pub(crate) mod attributes;
#[cfg(feature = "metrics")]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableOperation {
    Get,
    Invalidate,
    Write,
}

impl TableOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "table.get",
            Self::Invalidate => "table.invalidate",
            Self::Write => "table.write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableActivity {
    Hit,
    Miss,
    Stale,
    StaleCleanupFailed,
    Corrupt,
    Populated,
    PopulateFailed,
    StoreFetch,
    StoreMiss,
    Invalidated,
    Error,
}

impl TableActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "table.hit",
            Self::Miss => "table.miss",
            Self::Stale => "table.stale",
            Self::StaleCleanupFailed => "table.stale_cleanup_failed",
            Self::Corrupt => "table.corrupt",
            Self::Populated => "table.populated",
            Self::PopulateFailed => "table.populate_failed",
            Self::StoreFetch => "table.store_fetch",
            Self::StoreMiss => "table.store_miss",
            Self::Invalidated => "table.invalidated",
            Self::Error => "table.error",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::Miss | Self::StoreFetch | Self::StoreMiss => Level::DEBUG,
            Self::Stale | Self::Populated | Self::Invalidated => Level::INFO,
            Self::StaleCleanupFailed | Self::Corrupt | Self::PopulateFailed => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Reports table events to `tracing` and, when enabled, to OpenTelemetry metrics.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableTelemetry {
    #[cfg(feature = "metrics")]
    metrics: Option<metrics::TableMetrics>,
}

impl TableTelemetry {
    #[cfg(feature = "metrics")]
    pub(crate) fn with_meter_provider(provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        Self {
            metrics: Some(metrics::TableMetrics::new(provider)),
        }
    }

    pub(crate) fn record(&self, table: &str, operation: TableOperation, activity: TableActivity, key: &str) {
        self.count(table, operation, activity);
        Self::emit(table, operation, activity, key, None);
    }

    pub(crate) fn record_error(
        &self,
        table: &str,
        operation: TableOperation,
        activity: TableActivity,
        key: &str,
        error: &dyn std::error::Error,
    ) {
        self.count(table, operation, activity);
        Self::emit(table, operation, activity, key, Some(error));
    }

    #[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "durations are only kept as metrics"))]
    pub(crate) fn record_fetch(&self, table: &str, key: &str, duration: Duration) {
        self.count(table, TableOperation::Get, TableActivity::StoreFetch);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(table, duration);
        }

        Self::emit(table, TableOperation::Get, TableActivity::StoreFetch, key, None);
    }

    #[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "counters only exist with metrics"))]
    fn count(&self, table: &str, operation: TableOperation, activity: TableActivity) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_event(table, operation, activity);
        }
    }

    fn emit(table: &str, operation: TableOperation, activity: TableActivity, key: &str, error: Option<&dyn std::error::Error>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let error = error.map(tracing::field::display);

        // Tracing levels must be constant, so a macro selects the level.
        // Field names must match constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    table.name = table,
                    table.operation = op,
                    table.activity = ev,
                    cache.key = key,
                    error = error,
                    "table.event"
                )
            };
        }

        match activity.level() {
            Level::ERROR => emit_event!(error),
            Level::WARN => emit_event!(warn),
            Level::INFO => emit_event!(info),
            _ => emit_event!(debug),
        }
    }
}
