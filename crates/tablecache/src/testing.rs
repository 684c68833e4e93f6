// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store for testing.
//!
//! [`MockStore`] keeps rows per table in memory, counts fetches, records executed
//! statements and can be told to fail or to stall, so read-through behavior can be
//! observed without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tick::Clock;

use crate::catalog::Column;
use crate::store::{ExecOutcome, Record, Store};
use crate::StoreError;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Vec<Record>>,
    columns: HashMap<String, Vec<Column>>,
    executed: Vec<(String, Record)>,
    fetch_count: usize,
    fail_fetches: bool,
    fail_exec: bool,
    fetch_delay: Option<(Clock, Duration)>,
}

/// An in-memory [`Store`] with fetch counting and failure injection.
///
/// `fetch_one` returns the first inserted row whose fields all equal the requested
/// values. `exec` only records the statement; use [`update_row`](Self::update_row) to
/// change data. Clones share state.
///
/// # Examples
///
/// ```
/// use serde_json::{Value, json};
/// use tablecache::{MockStore, Store};
///
/// # futures::executor::block_on(async {
/// let store = MockStore::new();
/// store.insert_row("orders", &json!({ "id": 1, "status": "new" }));
///
/// let row = store.fetch_one("orders", &["id".to_string()], &[json!(1)]).await.unwrap();
/// assert_eq!(row.and_then(|r| r.get("status").cloned()), Some(Value::from("new")));
/// assert_eq!(store.fetch_count(), 1);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

impl MockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row to `table`.
    ///
    /// # Panics
    ///
    /// Panics if `row` does not serialize to a JSON object.
    pub fn insert_row(&self, table: &str, row: &impl Serialize) {
        let row = to_record(row);
        self.state.lock().tables.entry(table.to_owned()).or_default().push(row);
    }

    /// Replaces every row of `table` whose `field` equals `value` with `row`.
    ///
    /// Returns the number of rows replaced.
    ///
    /// # Panics
    ///
    /// Panics if `row` does not serialize to a JSON object.
    pub fn update_row(&self, table: &str, field: &str, value: impl Into<Value>, row: &impl Serialize) -> usize {
        let value = value.into();
        let row = to_record(row);
        let mut state = self.state.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return 0;
        };

        let mut replaced = 0;
        for existing in rows.iter_mut().filter(|existing| existing.get(field) == Some(&value)) {
            existing.clone_from(&row);
            replaced += 1;
        }
        replaced
    }

    /// Removes every row of `table` whose `field` equals `value`.
    pub fn delete_rows(&self, table: &str, field: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(rows) = self.state.lock().tables.get_mut(table) {
            rows.retain(|row| row.get(field) != Some(&value));
        }
    }

    /// Sets the column catalog reported for `table`.
    pub fn set_columns(&self, table: &str, columns: Vec<Column>) {
        self.state.lock().columns.insert(table.to_owned(), columns);
    }

    /// Returns how many times `fetch_one` was called.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetch_count
    }

    /// Makes every fetch wait for `delay` on `clock` before answering.
    #[must_use]
    pub fn with_fetch_delay(self, clock: Clock, delay: Duration) -> Self {
        self.state.lock().fetch_delay = Some((clock, delay));
        self
    }

    /// Makes `columns` and `fetch_one` fail while `fail` is true.
    pub fn fail_fetches(&self, fail: bool) {
        self.state.lock().fail_fetches = fail;
    }

    /// Makes `exec` fail while `fail` is true.
    pub fn fail_exec(&self, fail: bool) {
        self.state.lock().fail_exec = fail;
    }

    /// Returns the statements executed so far with their arguments.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, Record)> {
        self.state.lock().executed.clone()
    }
}

impl Store for MockStore {
    async fn columns(&self, table: &str) -> Result<Vec<Column>, StoreError> {
        let state = self.state.lock();
        if state.fail_fetches {
            return Err(StoreError::from_message(format!("mock: columns of '{table}' failed")));
        }
        Ok(state.columns.get(table).cloned().unwrap_or_default())
    }

    async fn fetch_one(&self, table: &str, fields: &[String], values: &[Value]) -> Result<Option<Record>, StoreError> {
        let delay = {
            let mut state = self.state.lock();
            state.fetch_count += 1;
            if state.fail_fetches {
                return Err(StoreError::from_message(format!("mock: fetch from '{table}' failed")));
            }
            state.fetch_delay.clone()
        };

        if let Some((clock, delay)) = delay {
            clock.delay(delay).await;
        }

        let state = self.state.lock();
        let row = state.tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| fields.iter().zip(values).all(|(field, value)| row.get(field) == Some(value)))
                .cloned()
        });
        Ok(row)
    }

    async fn exec(&self, query: &str, args: &Record) -> Result<ExecOutcome, StoreError> {
        let mut state = self.state.lock();
        if state.fail_exec {
            return Err(StoreError::from_message(format!("mock: exec of '{query}' failed")));
        }
        state.executed.push((query.to_owned(), args.clone()));
        Ok(ExecOutcome {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}

#[expect(clippy::panic, reason = "mock rows are test input")]
fn to_record(row: &impl Serialize) -> Record {
    match serde_json::to_value(row) {
        Ok(Value::Object(record)) => record,
        other => panic!("mock rows must serialize to an object, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;

    #[test]
    fn fetch_matches_all_fields() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &json!({ "id": 1, "status": "new" }));
            store.insert_row("orders", &json!({ "id": 2, "status": "paid" }));

            let fields = ["id".to_string(), "status".to_string()];
            let row = store.fetch_one("orders", &fields, &[json!(2), json!("paid")]).await.unwrap();
            assert_eq!(row.and_then(|r| r.get("id").cloned()), Some(json!(2)));

            let row = store.fetch_one("orders", &fields, &[json!(2), json!("new")]).await.unwrap();
            assert!(row.is_none());
            assert_eq!(store.fetch_count(), 2);
        });
    }

    #[test]
    fn update_replaces_matching_rows() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &json!({ "id": 1, "status": "new" }));

            assert_eq!(store.update_row("orders", "id", 1, &json!({ "id": 1, "status": "paid" })), 1);
            assert_eq!(store.update_row("missing", "id", 1, &json!({ "id": 1 })), 0);

            let row = store.fetch_one("orders", &["id".to_string()], &[json!(1)]).await.unwrap();
            assert_eq!(row.and_then(|r| r.get("status").cloned()), Some(json!("paid")));
        });
    }

    #[test]
    fn injected_failures() {
        block_on(async {
            let store = MockStore::new();
            store.fail_fetches(true);
            store.fail_exec(true);

            assert!(store.columns("orders").await.is_err());
            assert!(store.fetch_one("orders", &[], &[]).await.is_err());
            assert!(store.exec("DELETE", &Record::new()).await.is_err());
            assert!(store.executed().is_empty());

            store.fail_exec(false);
            let outcome = store.exec("DELETE", &Record::new()).await.unwrap();
            assert_eq!(outcome.rows_affected, 1);
            assert_eq!(store.executed().len(), 1);
        });
    }
}
