// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Read-through, write-invalidate caching of table rows.
//!
//! A [`Registry`] binds entity types to tables of a backing [`Store`] and hands out a
//! [`TableHandle`] per table. Handles serve lookups from a shared [`CacheClient`] and
//! fall back to the store on a miss:
//!
//! - Entities are cached once, under a key built from their primary field values.
//!   Lookups on any other field set cache a pointer to that primary key.
//! - On a miss, one caller per key takes a named cache lock, fetches the row and
//!   populates the cache. Concurrent callers wait on the lock and then read the cache,
//!   so a cold key costs one store fetch.
//! - Pointers are checked against the entity they lead to. A pointer whose target no
//!   longer matches the lookup is dropped and the lookup refetches.
//! - Writes go through [`TableHandle::write`], which invalidates the primary entry after
//!   the store accepts the statement.
//!
//! Cache write-back failures are logged and never fail a lookup. Cache read and lock
//! failures do, so an unavailable cache cannot turn into a stampede on the store.
//!
//! # Keys
//!
//! Keys have the form `{store}:{table}:{field}&{field}[{value},{value}]`, with fields
//! sorted by name and values JSON encoded, e.g. `shop:orders:id&status[1,"new"]`.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use serde::{Deserialize, Serialize};
//! use tablecache::{CacheConfig, Criteria, Entity, Registry};
//! use tablecache_client::MemoryCacheClient;
//! use tick::Clock;
//! # use std::sync::Arc;
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! # use serde_json::{Value, json};
//! # use tablecache::{Column, ExecOutcome, Record, Store, StoreError};
//! # #[derive(Clone, Default)]
//! # struct OrdersDb(Arc<AtomicUsize>);
//! # impl OrdersDb {
//! #     fn fetch_count(&self) -> usize { self.0.load(Ordering::Relaxed) }
//! # }
//! # impl Store for OrdersDb {
//! #     async fn columns(&self, _table: &str) -> Result<Vec<Column>, StoreError> {
//! #         Ok(vec![Column::primary("id"), Column::new("status")])
//! #     }
//! #     async fn fetch_one(&self, _table: &str, _fields: &[String], _values: &[Value]) -> Result<Option<Record>, StoreError> {
//! #         self.0.fetch_add(1, Ordering::Relaxed);
//! #         Ok(json!({ "id": 1, "status": "new" }).as_object().cloned())
//! #     }
//! #     async fn exec(&self, _query: &str, _args: &Record) -> Result<ExecOutcome, StoreError> {
//! #         Ok(ExecOutcome::default())
//! #     }
//! # }
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Order {
//!     id: u64,
//!     status: String,
//! }
//!
//! impl Entity for Order {
//!     fn table_name() -> &'static str {
//!         "orders"
//!     }
//!
//!     fn field_names() -> &'static [&'static str] {
//!         &["id", "status"]
//!     }
//!
//!     fn primary_field_names() -> &'static [&'static str] {
//!         &["id"]
//!     }
//! }
//!
//! # futures::executor::block_on(async {
//! let store = OrdersDb::default();
//! let clock = Clock::new_frozen();
//! let mut registry = Registry::builder(store.clone(), clock.clone())
//!     .cache(MemoryCacheClient::new(clock))
//!     .config(CacheConfig::new().with_store("shop"))
//!     .build()?;
//! let orders = registry.register::<Order>(Duration::from_secs(60)).await?;
//!
//! let by_status = Criteria::new().field("status", "new");
//! let first = orders.get(&by_status).await?;
//! let second = orders.get(&by_status).await?;
//!
//! assert_eq!(first, second);
//! assert_eq!(store.fetch_count(), 1);
//! # Ok::<(), tablecache::Error>(())
//! # });
//! ```

mod catalog;
mod config;
mod criteria;
mod deadline;
mod entity;
mod error;
mod key;
mod pending;
mod registry;
mod store;
mod table;
mod telemetry;
#[cfg(any(feature = "test-util", test))]
mod testing;

pub use catalog::{Column, FieldCatalog};
pub use config::CacheConfig;
pub use criteria::Criteria;
pub use entity::Entity;
pub use error::{Error, ErrorKind, Result, StoreError};
pub use key::{CacheKey, KeyBuilder};
pub use pending::PendingRegistry;
pub use registry::{Registry, RegistryBuilder};
pub use store::{ExecOutcome, Record, Store};
#[doc(inline)]
pub use tablecache_client::{CacheClient, MemoryCacheClient};
#[cfg(feature = "redis")]
#[doc(inline)]
pub use tablecache_client::RedisCacheClient;
pub use table::TableHandle;
#[cfg(any(feature = "test-util", test))]
pub use testing::MockStore;
