// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backing store contract.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::StoreError;
use crate::catalog::Column;

/// A row as exchanged with the backing store: column name to value.
pub type Record = Map<String, Value>;

/// The result of executing a statement against the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Number of rows the statement changed.
    pub rows_affected: u64,
    /// Identifier generated for an inserted row, if the store reports one.
    pub last_insert_id: Option<u64>,
}

/// The persistent store the cache reads through to.
///
/// Implementations own all query assembly and wire protocol concerns. A row that does
/// not exist is reported as `Ok(None)`, never as an error.
pub trait Store: Send + Sync {
    /// Returns the column catalog of `table`.
    ///
    /// An empty list means the store has no catalog for the table, in which case the
    /// entity's own field declarations are used.
    fn columns(&self, table: &str) -> impl Future<Output = Result<Vec<Column>, StoreError>> + Send;

    /// Fetches one row of `table` whose `fields` equal `values` pairwise.
    ///
    /// When several rows match, any one of them may be returned.
    fn fetch_one(&self, table: &str, fields: &[String], values: &[Value]) -> impl Future<Output = Result<Option<Record>, StoreError>> + Send;

    /// Executes a write statement with named arguments.
    fn exec(&self, query: &str, args: &Record) -> impl Future<Output = Result<ExecOutcome, StoreError>> + Send;
}

impl<S> Store for Arc<S>
where
    S: Store,
{
    async fn columns(&self, table: &str) -> Result<Vec<Column>, StoreError> {
        (**self).columns(table).await
    }

    async fn fetch_one(&self, table: &str, fields: &[String], values: &[Value]) -> Result<Option<Record>, StoreError> {
        (**self).fetch_one(table, fields, values).await
    }

    async fn exec(&self, query: &str, args: &Record) -> Result<ExecOutcome, StoreError> {
        (**self).exec(query, args).await
    }
}
