// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter, MeterProvider},
};

use super::{TableActivity, TableOperation, attributes};

const METER_NAME: &str = "tablecache";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";
const EVENT_COUNT_NAME: &str = "tablecache.event.count";
const STORE_FETCH_DURATION_NAME: &str = "tablecache.store.fetch.duration";

#[derive(Debug, Clone)]
pub(crate) struct TableMetrics {
    event_counter: Counter<u64>,
    fetch_duration: Histogram<f64>,
}

impl TableMetrics {
    pub(crate) fn new(provider: &dyn MeterProvider) -> Self {
        let meter = create_meter(provider);
        Self {
            event_counter: create_event_counter(&meter),
            fetch_duration: create_fetch_duration_histogram(&meter),
        }
    }

    pub(crate) fn record_event(&self, table: &str, operation: TableOperation, activity: TableActivity) {
        let attrs = [
            KeyValue::new(attributes::TABLE_NAME, table.to_owned()),
            KeyValue::new(attributes::TABLE_OPERATION_NAME, operation.as_str()),
            KeyValue::new(attributes::TABLE_ACTIVITY_NAME, activity.as_str()),
        ];
        self.event_counter.add(1, &attrs);
    }

    pub(crate) fn record_fetch(&self, table: &str, duration: Duration) {
        let attrs = [KeyValue::new(attributes::TABLE_NAME, table.to_owned())];
        self.fetch_duration.record(duration.as_secs_f64(), &attrs);
    }
}

fn create_meter(provider: &dyn MeterProvider) -> Meter {
    provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

fn create_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(EVENT_COUNT_NAME)
        .with_description("Table cache events")
        .with_unit("{event}")
        .build()
}

fn create_fetch_duration_histogram(meter: &Meter) -> Histogram<f64> {
    meter
        .f64_histogram(STORE_FETCH_DURATION_NAME)
        .with_description("Backing store fetch duration")
        .with_unit("s")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::MetricTester;

    #[test]
    fn event_counter_carries_table_attributes() {
        let tester = MetricTester::new();
        let metrics = TableMetrics::new(tester.meter_provider());

        metrics.record_event("orders", TableOperation::Get, TableActivity::Hit);

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::TABLE_NAME, "orders"),
            KeyValue::new(attributes::TABLE_OPERATION_NAME, TableOperation::Get.as_str()),
            KeyValue::new(attributes::TABLE_ACTIVITY_NAME, TableActivity::Hit.as_str()),
        ]);
    }

    #[test]
    fn fetch_duration_carries_table_name() {
        let tester = MetricTester::new();
        let metrics = TableMetrics::new(tester.meter_provider());

        metrics.record_fetch("orders", Duration::from_millis(3));

        tester.assert_attributes_contain(&[KeyValue::new(attributes::TABLE_NAME, "orders")]);
    }
}
