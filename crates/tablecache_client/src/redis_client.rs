// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Redis-backed cache client.
//!
//! Values use `GET`, `SET .. PX` and `DEL`. Named locks are Redis keys taken with
//! `SET name token NX PX lease` and released with a compare-and-delete script, so
//! exclusion holds across processes and a crashed holder's lock lapses after the lease.
//! While the body runs, the lease is extended every third of its length; if an extension
//! fails the body is abandoned, since another caller may already hold the lock.

use std::pin::pin;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{self, Either};
use redis::aio::ConnectionManager;
use tick::Clock;

use crate::{CacheClient, Error, Result};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A [`CacheClient`] talking to Redis through a [`ConnectionManager`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use tablecache_client::RedisCacheClient;
/// use tick::Clock;
///
/// # async fn example(clock: Clock) -> Result<(), tablecache_client::Error> {
/// let client = RedisCacheClient::connect("redis://127.0.0.1/", clock).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisCacheClient {
    connection: ConnectionManager,
    clock: Clock,
    lock_timeout: Duration,
    lock_lease: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for RedisCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheClient")
            .field("lock_timeout", &self.lock_timeout)
            .field("lock_lease", &self.lock_lease)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl RedisCacheClient {
    /// Opens a managed connection to `url` and creates a client with default lock settings.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the URL is invalid or the server cannot be reached.
    pub async fn connect(url: &str, clock: Clock) -> Result<Self> {
        let client = redis::Client::open(url).map_err(Error::backend)?;
        let connection = client.get_connection_manager().await.map_err(Error::backend)?;
        Ok(Self::builder(connection, clock).build())
    }

    /// Creates a builder around an existing connection.
    #[must_use]
    pub fn builder(connection: ConnectionManager, clock: Clock) -> RedisCacheClientBuilder {
        RedisCacheClientBuilder {
            connection,
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_lease: DEFAULT_LOCK_LEASE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    async fn acquire(&self, name: &str, token: &str) -> Result<()> {
        let deadline = self.clock.instant() + self.lock_timeout;
        let mut connection = self.connection.clone();

        loop {
            let reply: Option<String> = redis::cmd("SET")
                .arg(name)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(millis(self.lock_lease))
                .query_async(&mut connection)
                .await
                .map_err(Error::lock_unavailable)?;

            if reply.is_some() {
                return Ok(());
            }

            if self.clock.instant() >= deadline {
                return Err(Error::lock_unavailable(format!(
                    "lock '{name}' still held after {:?}",
                    self.lock_timeout
                )));
            }

            self.clock.delay(self.retry_interval).await;
        }
    }

    /// Extends the lease of a held lock until an extension fails. Never returns otherwise.
    async fn keep_alive(&self, name: &str, token: &str) -> Error {
        let mut connection = self.connection.clone();
        let interval = renew_interval(self.lock_lease);

        loop {
            self.clock.delay(interval).await;

            let extended = redis::Script::new(EXTEND_SCRIPT)
                .key(name)
                .arg(token)
                .arg(millis(self.lock_lease))
                .invoke_async::<i64>(&mut connection)
                .await;

            match extended {
                Ok(1) => {}
                Ok(_) => return Error::lock_unavailable(format!("lease of lock '{name}' expired before the body finished")),
                Err(error) => return Error::lock_unavailable(error),
            }
        }
    }
}

impl CacheClient for RedisCacheClient {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(Error::backend)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::backend)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::backend)
    }

    async fn lock<Fut, T>(&self, name: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = T> + Send,
        T: Send,
    {
        let token = new_token();
        self.acquire(name, &token).await?;

        let mut held = HeldLock {
            connection: self.connection.clone(),
            name: name.to_owned(),
            token: Some(token.clone()),
        };

        let output = run_while_held(body, self.keep_alive(name, &token)).await;
        held.release().await;
        output
    }
}

/// A lock currently owned by this client. Released explicitly, or from `Drop` if the
/// owning future is cancelled.
struct HeldLock {
    connection: ConnectionManager,
    name: String,
    token: Option<String>,
}

impl HeldLock {
    async fn release(&mut self) {
        if let Some(token) = self.token.take() {
            release(self.connection.clone(), &self.name, &token).await;
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock.name = %self.name, "no runtime to release lock; it will lapse after its lease");
            return;
        };

        let connection = self.connection.clone();
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            release(connection, &name, &token).await;
        });
    }
}

async fn release(mut connection: ConnectionManager, name: &str, token: &str) {
    let result = redis::Script::new(RELEASE_SCRIPT)
        .key(name)
        .arg(token)
        .invoke_async::<i64>(&mut connection)
        .await;

    if let Err(error) = result {
        tracing::warn!(lock.name = %name, error = %error, "failed to release lock; it will lapse after its lease");
    }
}

/// Runs `body` unless `keep_alive` finishes first, which means the lock was lost.
async fn run_while_held<Fut, K>(body: Fut, keep_alive: K) -> Result<Fut::Output>
where
    Fut: Future,
    K: Future<Output = Error>,
{
    match future::select(pin!(body), pin!(keep_alive)).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right((lost, _)) => {
            tracing::warn!(error = %lost, "lock lost while held; abandoning the locked work");
            Err(lost)
        }
    }
}

fn renew_interval(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(1))
}

fn new_token() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

// Redis rejects a zero expiry.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Builder for [`RedisCacheClient`].
#[derive(Clone)]
pub struct RedisCacheClientBuilder {
    connection: ConnectionManager,
    clock: Clock,
    lock_timeout: Duration,
    lock_lease: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for RedisCacheClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheClientBuilder")
            .field("lock_timeout", &self.lock_timeout)
            .field("lock_lease", &self.lock_lease)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl RedisCacheClientBuilder {
    /// How long [`CacheClient::lock`] keeps retrying before failing. Defaults to 5 seconds.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// How long a taken lock survives if its holder stops renewing it, e.g. because the
    /// process died. Held locks are renewed every third of the lease. Defaults to 10 seconds.
    #[must_use]
    pub fn lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Pause between acquisition attempts. Defaults to 50 milliseconds.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> RedisCacheClient {
        RedisCacheClient {
            connection: self.connection,
            clock: self.clock,
            lock_timeout: self.lock_timeout,
            lock_lease: self.lock_lease,
            retry_interval: self.retry_interval,
        }
    }
}
