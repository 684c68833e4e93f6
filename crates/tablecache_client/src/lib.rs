// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Distributed key-value cache contract with named exclusive locks.
//!
//! [`CacheClient`] is the seam between table-aware caching logic and the cache backend:
//! byte values with per-entry expiry, deletes, and a named lock that serializes work
//! across callers. Absent keys are values, not errors.
//!
//! # Implementations
//!
//! - [`MemoryCacheClient`]: in-process storage backed by moka, expiry driven by a
//!   [`tick::Clock`]. Locks exclude callers within one process.
//! - `RedisCacheClient` (feature `redis`): Redis storage with cross-process locks.
//! - `MockCacheClient` (feature `test-util`): records operations and injects failures.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use tablecache_client::{CacheClient, MemoryCacheClient};
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let client = MemoryCacheClient::new(Clock::new_frozen());
//!
//! let value = client
//!     .lock("lock_orders", async {
//!         // only one caller at a time gets here
//!         Bytes::from_static(b"42")
//!     })
//!     .await?;
//!
//! client.set("orders", value, Duration::from_secs(30)).await?;
//! assert_eq!(client.get("orders").await?, Some(Bytes::from_static(b"42")));
//! # Ok::<(), tablecache_client::Error>(())
//! # });
//! ```

mod client;
mod error;
mod memory;
mod named_lock;
#[cfg(feature = "redis")]
mod redis_client;
#[cfg(any(feature = "test-util", test))]
mod testing;

pub use client::CacheClient;
pub use error::{Error, ErrorKind, Result};
pub use memory::{MemoryCacheClient, MemoryCacheClientBuilder};
#[cfg(feature = "redis")]
pub use redis_client::{RedisCacheClient, RedisCacheClientBuilder};
#[cfg(any(feature = "test-util", test))]
pub use testing::{CacheOp, MockCacheClient};
