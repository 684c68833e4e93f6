// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-table read-through lookups and write-path invalidation.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tablecache_client::CacheClient;
use tick::Clock;

use crate::catalog::FieldCatalog;
use crate::deadline::Deadline;
use crate::key::{CacheKey, KeyBuilder};
use crate::store::{ExecOutcome, Record, Store};
use crate::telemetry::{TableActivity, TableOperation, TableTelemetry};
use crate::{Criteria, Entity, Error, ErrorKind, Result};

/// Progress of a cache lookup. A secondary lookup takes at most two hops.
enum Probe<E> {
    NeedSecondary,
    NeedPrimary(String),
    Done(Option<E>),
}

/// The cache-aware handle for one registered table.
///
/// Obtained from [`Registry::register`](crate::Registry::register) or
/// [`Registry::table`](crate::Registry::table). Handles are immutable and meant to be
/// shared behind the returned [`Arc`].
///
/// Entities are cached once, under their primary key. A lookup on any other field set
/// stores only a pointer to that primary key, and a pointer whose target no longer
/// matches the lookup values is discarded, so secondary entries heal themselves after
/// the row changes.
pub struct TableHandle<E, S, C> {
    table: &'static str,
    catalog: FieldCatalog,
    keys: KeyBuilder,
    ttl: Duration,
    store: Arc<S>,
    cache: Option<Arc<C>>,
    clock: Clock,
    operation_timeout: Option<Duration>,
    telemetry: TableTelemetry,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S, C> std::fmt::Debug for TableHandle<E, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("table", &self.table)
            .field("namespace", &self.keys.namespace())
            .field("primary_fields", &self.catalog.primary_fields())
            .field("ttl", &self.ttl)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct TableParts<S, C> {
    pub(crate) store_name: String,
    pub(crate) store: Arc<S>,
    pub(crate) cache: Option<Arc<C>>,
    pub(crate) clock: Clock,
    pub(crate) operation_timeout: Option<Duration>,
    pub(crate) telemetry: TableTelemetry,
}

impl<E, S, C> TableHandle<E, S, C>
where
    E: Entity,
    S: Store,
    C: CacheClient,
{
    pub(crate) fn new(catalog: FieldCatalog, ttl: Duration, parts: TableParts<S, C>) -> Self {
        let table = E::table_name();
        let keys = KeyBuilder::for_table(&parts.store_name, table, &catalog);
        Self {
            table,
            catalog,
            keys,
            ttl,
            store: parts.store,
            cache: parts.cache,
            clock: parts.clock,
            operation_timeout: parts.operation_timeout,
            telemetry: parts.telemetry,
            _entity: PhantomData,
        }
    }

    /// The table name.
    #[must_use]
    pub fn table_name(&self) -> &'static str {
        self.table
    }

    /// The resolved field catalog.
    #[must_use]
    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// The key builder for this table.
    #[must_use]
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// How long populated cache entries live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether lookups go through the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Returns the entity matching `criteria`, reading through the cache.
    ///
    /// On a cache miss exactly one concurrent caller per key fetches from the store and
    /// populates the cache; the others wait for it and then read the cached entity.
    /// `Ok(None)` means the store has no matching row. When several rows match, any one
    /// of them is returned.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MalformedKeyInput`] for empty or duplicate criteria, or a field the
    ///   table does not have.
    /// - [`ErrorKind::CacheUnavailable`] if the cache cannot be read.
    /// - [`ErrorKind::LockUnavailable`] if the per-key lock cannot be acquired.
    /// - [`ErrorKind::Store`] or [`ErrorKind::Serialization`] if the fetch fails or the row
    ///   does not decode into `E`.
    /// - [`ErrorKind::Timeout`] if the deadline passes.
    ///
    /// Failures to write the populated entity back to the cache are logged, not returned.
    pub async fn get(&self, criteria: &Criteria) -> Result<Option<E>> {
        if let Some(unknown) = criteria.fields().iter().find(|field| !self.catalog.contains(field)) {
            return Err(Error::malformed(format!("table '{}' has no field '{unknown}'", self.table)));
        }

        let key = self.keys.build_cache_key(criteria.fields(), criteria.values())?;
        self.get_with_key(&key, criteria.deadline()).await
    }

    /// Returns the current version of `entity`, looked up by its primary field values.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get); additionally [`ErrorKind::MalformedKeyInput`] if the
    /// entity has no value for a primary field.
    pub async fn get_by_entity(&self, entity: &E) -> Result<Option<E>> {
        let key = self.keys.build_primary_key(entity)?;
        self.get_with_key(&key, None).await
    }

    /// Removes the cached copy of `entity`. Removing an uncached entity succeeds.
    ///
    /// Secondary pointers to the entity are left in place; the next lookup through one
    /// notices the mismatch or absence and refetches.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::CacheUnavailable`] if the cache rejects the delete, or
    /// [`ErrorKind::MalformedKeyInput`] if the entity has no value for a primary field.
    pub async fn invalidate(&self, entity: &E) -> Result<()> {
        self.invalidate_for(entity, TableOperation::Invalidate).await
    }

    /// Executes a statement against the store without touching the cache.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Store`] if the store fails, or [`ErrorKind::Timeout`].
    pub async fn exec(&self, query: &str, args: &Record) -> Result<ExecOutcome> {
        let deadline = Deadline::after(&self.clock, self.operation_timeout);
        Ok(deadline.run(self.store.exec(query, args)).await??)
    }

    /// Executes a statement that changes `entity` and then invalidates its cached copy.
    ///
    /// Invalidation always follows a successful statement. If it fails, the failure is
    /// logged and the statement's outcome is still returned, since the write is durable
    /// and the stale copy expires with its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Store`] if the store fails, or [`ErrorKind::Timeout`]. In both
    /// cases the cache is left untouched.
    pub async fn write(&self, entity: &E, query: &str, args: &Record) -> Result<ExecOutcome> {
        let outcome = self.exec(query, args).await?;
        if let Err(error) = self.invalidate_for(entity, TableOperation::Write).await {
            tracing::warn!(
                table = self.table,
                error = %error,
                "statement applied but its cache entry was not invalidated; it stays until its ttl"
            );
        }
        Ok(outcome)
    }

    async fn get_with_key(&self, key: &CacheKey, timeout: Option<Duration>) -> Result<Option<E>> {
        let deadline = Deadline::after(&self.clock, timeout.or(self.operation_timeout));

        let result = match self.cache.as_deref() {
            Some(cache) => self.read_through(cache, key, &deadline).await,
            None => self.fetch(key, &deadline).await,
        };

        if let Err(error) = &result {
            self.telemetry
                .record_error(self.table, TableOperation::Get, TableActivity::Error, key.key(), error);
        }

        result
    }

    async fn read_through(&self, cache: &C, key: &CacheKey, deadline: &Deadline) -> Result<Option<E>> {
        if let Some(entity) = self.probe(cache, key, deadline).await? {
            self.record(TableOperation::Get, TableActivity::Hit, key.key());
            return Ok(Some(entity));
        }

        self.record(TableOperation::Get, TableActivity::Miss, key.key());

        let lock_name = format!("lock_{}", key.key());
        let locked = deadline
            .run(cache.lock(&lock_name, self.probe_or_populate(cache, key, deadline)))
            .await?;
        locked?
    }

    /// Runs under the key's lock: another caller may have populated the cache meanwhile.
    async fn probe_or_populate(&self, cache: &C, key: &CacheKey, deadline: &Deadline) -> Result<Option<E>> {
        if let Some(entity) = self.probe(cache, key, deadline).await? {
            self.record(TableOperation::Get, TableActivity::Hit, key.key());
            return Ok(Some(entity));
        }

        let Some(entity) = self.fetch(key, deadline).await? else {
            return Ok(None);
        };

        self.populate(cache, key, &entity, deadline).await;
        Ok(Some(entity))
    }

    async fn probe(&self, cache: &C, key: &CacheKey, deadline: &Deadline) -> Result<Option<E>> {
        let mut probe = if key.is_primary() {
            Probe::NeedPrimary(key.key().to_owned())
        } else {
            Probe::NeedSecondary
        };

        loop {
            probe = match probe {
                Probe::NeedSecondary => match self.read_pointer(cache, key, deadline).await? {
                    Some(primary_key) => Probe::NeedPrimary(primary_key),
                    None => Probe::Done(None),
                },
                Probe::NeedPrimary(primary_key) => match self.read_entity(cache, &primary_key, deadline).await? {
                    Some(entity) if !key.is_primary() && !matches_key(&entity, key) => {
                        self.drop_stale_pointer(cache, key, deadline).await;
                        Probe::Done(None)
                    }
                    found => Probe::Done(found),
                },
                Probe::Done(found) => return Ok(found),
            };
        }
    }

    async fn read_pointer(&self, cache: &C, key: &CacheKey, deadline: &Deadline) -> Result<Option<String>> {
        let Some(bytes) = deadline.run(cache.get(key.key())).await?? else {
            return Ok(None);
        };

        match String::from_utf8(bytes.to_vec()) {
            Ok(primary_key) if self.keys.is_primary_key(&primary_key) => Ok(Some(primary_key)),
            _ => {
                self.record(TableOperation::Get, TableActivity::Corrupt, key.key());
                Ok(None)
            }
        }
    }

    async fn read_entity(&self, cache: &C, primary_key: &str, deadline: &Deadline) -> Result<Option<E>> {
        let Some(bytes) = deadline.run(cache.get(primary_key)).await?? else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(entity) => Ok(Some(entity)),
            Err(error) => {
                self.telemetry
                    .record_error(self.table, TableOperation::Get, TableActivity::Corrupt, primary_key, &error);
                Ok(None)
            }
        }
    }

    async fn drop_stale_pointer(&self, cache: &C, key: &CacheKey, deadline: &Deadline) {
        self.record(TableOperation::Get, TableActivity::Stale, key.key());

        if let Err(error) = self.delete_entry(cache, key.key(), deadline).await {
            self.telemetry
                .record_error(self.table, TableOperation::Get, TableActivity::StaleCleanupFailed, key.key(), &error);
        }
    }

    async fn fetch(&self, key: &CacheKey, deadline: &Deadline) -> Result<Option<E>> {
        let stopwatch = self.clock.stopwatch();
        let row = deadline
            .run(self.store.fetch_one(self.table, key.fields(), key.field_values()))
            .await??;
        self.telemetry.record_fetch(self.table, key.key(), stopwatch.elapsed());

        let Some(row) = row else {
            self.record(TableOperation::Get, TableActivity::StoreMiss, key.key());
            return Ok(None);
        };

        serde_json::from_value(Value::Object(row))
            .map(Some)
            .map_err(|e| Error::caused_by(ErrorKind::Serialization, e))
    }

    /// Caches `entity` under its primary key and, for a secondary lookup, points `key` at it.
    /// Failures are logged; the caller already has the entity.
    async fn populate(&self, cache: &C, key: &CacheKey, entity: &E, deadline: &Deadline) {
        let primary = match self.keys.build_primary_key(entity) {
            Ok(primary) => primary,
            Err(error) => return self.populate_failed(key.key(), &error),
        };

        let payload = match serde_json::to_vec(entity) {
            Ok(payload) => Bytes::from(payload),
            Err(error) => return self.populate_failed(primary.key(), &error),
        };

        if let Err(error) = self.write_entry(cache, primary.key(), payload, deadline).await {
            return self.populate_failed(primary.key(), &error);
        }

        if !key.is_primary() {
            let pointer = Bytes::from(primary.key().to_owned());
            if let Err(error) = self.write_entry(cache, key.key(), pointer, deadline).await {
                return self.populate_failed(key.key(), &error);
            }
        }

        self.record(TableOperation::Get, TableActivity::Populated, key.key());
    }

    fn populate_failed(&self, key: &str, error: &dyn std::error::Error) {
        self.telemetry
            .record_error(self.table, TableOperation::Get, TableActivity::PopulateFailed, key, error);
    }

    async fn invalidate_for(&self, entity: &E, operation: TableOperation) -> Result<()> {
        let Some(cache) = self.cache.as_deref() else {
            return Ok(());
        };

        let result = match self.keys.build_primary_key(entity) {
            Ok(key) => {
                let deadline = Deadline::after(&self.clock, self.operation_timeout);
                self.delete_entry(cache, key.key(), &deadline).await.map(|()| key)
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(key) => {
                self.record(operation, TableActivity::Invalidated, key.key());
                Ok(())
            }
            Err(error) => {
                self.telemetry
                    .record_error(self.table, operation, TableActivity::Error, self.keys.namespace(), &error);
                Err(error)
            }
        }
    }

    async fn write_entry(&self, cache: &C, key: &str, value: Bytes, deadline: &Deadline) -> Result<()> {
        Ok(deadline.run(cache.set(key, value, self.ttl)).await??)
    }

    async fn delete_entry(&self, cache: &C, key: &str, deadline: &Deadline) -> Result<()> {
        Ok(deadline.run(cache.delete(key)).await??)
    }

    fn record(&self, operation: TableOperation, activity: TableActivity, key: &str) {
        self.telemetry.record(self.table, operation, activity, key);
    }
}

/// Whether the entity's live values still equal the values encoded in `key`.
fn matches_key<E: Entity>(entity: &E, key: &CacheKey) -> bool {
    key.fields()
        .iter()
        .zip(key.field_values())
        .all(|(field, value)| entity.field_value(field).as_ref() == Some(value))
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tablecache_client::{CacheOp, MockCacheClient};

    use super::*;
    use crate::MockStore;
    use crate::telemetry::testing::LogCapture;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        status: String,
    }

    impl Entity for Order {
        fn table_name() -> &'static str {
            "orders"
        }

        fn field_names() -> &'static [&'static str] {
            &["id", "status"]
        }

        fn primary_field_names() -> &'static [&'static str] {
            &["id"]
        }
    }

    static_assertions::assert_impl_all!(TableHandle<Order, MockStore, MockCacheClient>: Send, Sync);

    fn order(id: u64, status: &str) -> Order {
        Order {
            id,
            status: status.to_string(),
        }
    }

    fn handle(store: &MockStore, cache: &MockCacheClient) -> TableHandle<Order, MockStore, MockCacheClient> {
        TableHandle::new(
            FieldCatalog::from_entity::<Order>().unwrap(),
            Duration::from_secs(60),
            TableParts {
                store_name: "shop".to_string(),
                store: Arc::new(store.clone()),
                cache: Some(Arc::new(cache.clone())),
                clock: Clock::new_frozen(),
                operation_timeout: None,
                telemetry: TableTelemetry::default(),
            },
        )
    }

    fn sets(cache: &MockCacheClient) -> Vec<String> {
        cache
            .operations()
            .into_iter()
            .filter(|op| matches!(op, CacheOp::Set { .. }))
            .map(|op| op.key().to_string())
            .collect()
    }

    #[test]
    fn primary_lookup_caches_entity_only() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &order(1, "new"));
            let cache = MockCacheClient::new();
            let orders = handle(&store, &cache);

            let found = orders.get(&Criteria::new().field("id", 1)).await.unwrap();

            assert_eq!(found, Some(order(1, "new")));
            assert_eq!(sets(&cache), vec!["shop:orders:id[1]"]);
            assert!(cache.operations().contains(&CacheOp::Lock("lock_shop:orders:id[1]".to_string())));
        });
    }

    #[test]
    fn secondary_lookup_caches_pointer_to_primary() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &order(1, "new"));
            let cache = MockCacheClient::new();
            let orders = handle(&store, &cache);

            orders.get(&Criteria::new().field("status", "new")).await.unwrap();

            assert_eq!(sets(&cache), vec!["shop:orders:id[1]", r#"shop:orders:status["new"]"#]);
            assert_eq!(
                cache.value(r#"shop:orders:status["new"]"#),
                Some(Bytes::from_static(b"shop:orders:id[1]"))
            );
        });
    }

    #[test]
    fn pointer_outside_table_is_refetched() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &order(1, "new"));
            let cache = MockCacheClient::new();
            cache.put(r#"shop:orders:status["new"]"#, "shop:customers:id[1]");
            let orders = handle(&store, &cache);

            let found = orders.get(&Criteria::new().field("status", "new")).await.unwrap();

            assert_eq!(found, Some(order(1, "new")));
            assert_eq!(store.fetch_count(), 1);
            assert_eq!(
                cache.value(r#"shop:orders:status["new"]"#),
                Some(Bytes::from_static(b"shop:orders:id[1]"))
            );
        });
    }

    #[test]
    fn mismatched_pointer_is_dropped() {
        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &order(2, "new"));
            let cache = MockCacheClient::new();
            cache.put("shop:orders:id[1]", serde_json::to_vec(&order(1, "paid")).unwrap());
            cache.put(r#"shop:orders:status["new"]"#, "shop:orders:id[1]");
            let orders = handle(&store, &cache);

            let found = orders.get(&Criteria::new().field("status", "new")).await.unwrap();

            assert_eq!(found, Some(order(2, "new")));
            assert!(cache.operations().contains(&CacheOp::Delete(r#"shop:orders:status["new"]"#.to_string())));
            assert_eq!(
                cache.value(r#"shop:orders:status["new"]"#),
                Some(Bytes::from_static(b"shop:orders:id[2]"))
            );
        });
    }

    #[test]
    fn unknown_field_is_rejected_before_cache() {
        block_on(async {
            let store = MockStore::new();
            let cache = MockCacheClient::new();
            let orders = handle(&store, &cache);

            let error = orders.get(&Criteria::new().field("colour", "red")).await.unwrap_err();

            assert_eq!(error.kind(), ErrorKind::MalformedKeyInput);
            assert!(cache.operations().is_empty());
            assert_eq!(store.fetch_count(), 0);
        });
    }

    #[test]
    fn matches_key_compares_live_values() {
        let keys = KeyBuilder::new("shop:orders", &["id".to_string()]);
        let key = keys
            .build_cache_key(&["status".to_string()], &[json!("new")])
            .unwrap();

        assert!(matches_key(&order(1, "new"), &key));
        assert!(!matches_key(&order(1, "paid"), &key));
    }

    #[test]
    fn lookups_are_logged() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        block_on(async {
            let store = MockStore::new();
            store.insert_row("orders", &order(1, "new"));
            let cache = MockCacheClient::new();
            let orders = handle(&store, &cache);

            orders.get(&Criteria::new().field("id", 1)).await.unwrap();
            orders.get(&Criteria::new().field("id", 1)).await.unwrap();
        });

        capture.assert_contains("table.miss");
        capture.assert_contains("table.populated");
        capture.assert_contains("table.hit");
        capture.assert_contains("shop:orders:id[1]");
    }

    #[test]
    fn failed_write_invalidation_is_reported() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        block_on(async {
            let store = MockStore::new();
            let cache = MockCacheClient::new();
            cache.fail_when(|op| matches!(op, CacheOp::Delete(_)));
            let orders = handle(&store, &cache);

            let outcome = orders.write(&order(1, "paid"), "UPDATE orders", &Record::new()).await;

            assert!(outcome.is_ok());
        });

        capture.assert_contains("not invalidated");
    }
}
