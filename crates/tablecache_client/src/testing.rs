// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock cache client for testing.
//!
//! [`MockCacheClient`] keeps values in a plain map, records every operation and fails
//! the operations selected by a predicate, so callers can exercise their error paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::named_lock::NamedLocks;
use crate::{CacheClient, Error, Result};

/// A cache operation recorded by [`MockCacheClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// A `get` of the key.
    Get(String),
    /// A `set` of the key.
    Set {
        /// The key written.
        key: String,
        /// The value written.
        value: Bytes,
        /// The requested expiry.
        ttl: Duration,
    },
    /// A `delete` of the key.
    Delete(String),
    /// A `lock` on the name.
    Lock(String),
}

impl CacheOp {
    /// Returns the key or lock name the operation targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Get(key) | Self::Delete(key) | Self::Lock(key) => key,
            Self::Set { key, .. } => key,
        }
    }
}

type FailPredicate = Box<dyn Fn(&CacheOp) -> bool + Send + Sync>;

/// An in-memory [`CacheClient`] with operation recording and failure injection.
///
/// Expiry is recorded but not enforced. Clones share state.
///
/// # Examples
///
/// ```
/// use tablecache_client::{CacheClient, CacheOp, MockCacheClient};
///
/// # futures::executor::block_on(async {
/// let client = MockCacheClient::new();
/// client.fail_when(|op| matches!(op, CacheOp::Get(_)));
///
/// assert!(client.get("key").await.is_err());
/// assert_eq!(client.operations(), vec![CacheOp::Get("key".to_string())]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockCacheClient {
    data: Arc<Mutex<HashMap<String, Bytes>>>,
    operations: Arc<Mutex<Vec<CacheOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
    locks: NamedLocks,
}

impl std::fmt::Debug for MockCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCacheClient")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl MockCacheClient {
    /// Creates an empty mock client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every later operation for which `predicate` returns true.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&CacheOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns all operations recorded so far, including failed ones.
    #[must_use]
    pub fn operations(&self) -> Vec<CacheOp> {
        self.operations.lock().clone()
    }

    /// Forgets the recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Returns whether a value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.data.lock().get(key).cloned()
    }

    /// Stores a raw value without recording an operation, e.g. to plant a corrupt payload.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.data.lock().insert(key.into(), value.into());
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.data.lock().len()
    }

    fn record(&self, op: CacheOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let error = fail.then(|| match &op {
            CacheOp::Lock(name) => Error::lock_unavailable(format!("mock: lock '{name}' failed")),
            CacheOp::Get(_) => Error::backend("mock: get failed"),
            CacheOp::Set { .. } => Error::backend("mock: set failed"),
            CacheOp::Delete(_) => Error::backend("mock: delete failed"),
        });
        self.operations.lock().push(op);
        error.map_or(Ok(()), Err)
    }
}

impl CacheClient for MockCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.record(CacheOp::Get(key.to_owned()))?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.record(CacheOp::Set {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })?;
        self.data.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.record(CacheOp::Delete(key.to_owned()))?;
        self.data.lock().remove(key);
        Ok(())
    }

    async fn lock<Fut, T>(&self, name: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        self.record(CacheOp::Lock(name.to_owned()))?;
        let slot = self.locks.slot(name);
        let _guard = slot.lock().await;
        Ok(body.await)
    }
}
