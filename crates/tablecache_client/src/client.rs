// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract every distributed cache backend implements.
//!
//! [`CacheClient`] is deliberately small: byte values with a per-entry expiry, deletes,
//! and a named exclusive lock. Everything table-aware lives one layer up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::Result;

/// A key-value cache with per-entry expiry and named exclusive locks.
///
/// Implementations must be safe to share across tasks. Absent keys are reported as
/// `Ok(None)` from [`get`](Self::get) and as success from [`delete`](Self::delete);
/// only genuine backend failures produce errors.
pub trait CacheClient: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Stores `value` under `key`, replacing any previous value. The entry expires after `ttl`.
    fn set(&self, key: &str, value: Bytes, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Removes `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Runs `body` to completion while holding the exclusive lock called `name`.
    ///
    /// Callers using the same name are serialized; different names never contend. The
    /// lock is released on every exit path, including when the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`LockUnavailable`](crate::ErrorKind::LockUnavailable) if
    /// the lock cannot be acquired, or is lost before `body` finishes. `body` is never
    /// polled without the lock.
    fn lock<Fut, T>(&self, name: &str, body: Fut) -> impl Future<Output = Result<T>> + Send
    where
        Fut: Future<Output = T> + Send,
        T: Send;
}

impl<C> CacheClient for Arc<C>
where
    C: CacheClient,
{
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn lock<Fut, T>(&self, name: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        (**self).lock(name, body).await
    }
}
