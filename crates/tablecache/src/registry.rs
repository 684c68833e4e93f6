// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Table registration.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tablecache_client::{CacheClient, MemoryCacheClient};
use tick::Clock;

use crate::catalog::FieldCatalog;
use crate::deadline::Deadline;
use crate::store::Store;
use crate::table::{TableHandle, TableParts};
use crate::telemetry::TableTelemetry;
use crate::{CacheConfig, Entity, Error, ErrorKind, Result};

/// The set of cached tables sharing one store and one cache client.
///
/// Each table is registered once; its [`TableHandle`] can afterwards be looked up by
/// entity type from anywhere holding the registry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
/// use tablecache::{CacheConfig, Criteria, Entity, Registry};
/// use tablecache_client::MemoryCacheClient;
/// use tick::Clock;
/// # use tablecache::{Column, ExecOutcome, Record, Store, StoreError};
/// # use serde_json::{Value, json};
/// # struct OrdersDb;
/// # impl Store for OrdersDb {
/// #     async fn columns(&self, _table: &str) -> Result<Vec<Column>, StoreError> {
/// #         Ok(vec![Column::primary("id"), Column::new("status")])
/// #     }
/// #     async fn fetch_one(&self, _table: &str, _fields: &[String], values: &[Value]) -> Result<Option<Record>, StoreError> {
/// #         let row = json!({ "id": values[0], "status": "new" });
/// #         Ok(row.as_object().cloned())
/// #     }
/// #     async fn exec(&self, _query: &str, _args: &Record) -> Result<ExecOutcome, StoreError> {
/// #         Ok(ExecOutcome::default())
/// #     }
/// # }
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Order {
///     id: u64,
///     status: String,
/// }
///
/// impl Entity for Order {
///     fn table_name() -> &'static str {
///         "orders"
///     }
///
///     fn field_names() -> &'static [&'static str] {
///         &["id", "status"]
///     }
///
///     fn primary_field_names() -> &'static [&'static str] {
///         &["id"]
///     }
/// }
///
/// # futures::executor::block_on(async {
/// let clock = Clock::new_frozen();
/// let mut registry = Registry::builder(OrdersDb, clock.clone())
///     .cache(MemoryCacheClient::new(clock))
///     .config(CacheConfig::new().with_store("shop"))
///     .build()?;
///
/// let orders = registry.register::<Order>(Duration::from_secs(60)).await?;
///
/// let order = orders.get(&Criteria::new().field("id", 1)).await?;
/// assert_eq!(order.map(|o| o.status), Some("new".to_string()));
/// # Ok::<(), tablecache::Error>(())
/// # });
/// ```
pub struct Registry<S, C = MemoryCacheClient> {
    store: Arc<S>,
    cache: Option<Arc<C>>,
    clock: Clock,
    config: CacheConfig,
    telemetry: TableTelemetry,
    tables: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl<S, C> std::fmt::Debug for Registry<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tables: Vec<_> = self.tables.keys().collect();
        tables.sort_unstable();
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .field("tables", &tables)
            .finish_non_exhaustive()
    }
}

impl<S> Registry<S, MemoryCacheClient> {
    /// Creates a builder for a registry over `store`, timed by `clock`.
    ///
    /// Without a call to [`RegistryBuilder::cache`] the registry has no cache client, which
    /// is only valid together with [`CacheConfig::with_close_cache`].
    #[must_use]
    pub fn builder(store: S, clock: Clock) -> RegistryBuilder<S, MemoryCacheClient> {
        RegistryBuilder {
            store,
            cache: None,
            clock,
            config: CacheConfig::default(),
            telemetry: TableTelemetry::default(),
        }
    }
}

impl<S, C> Registry<S, C>
where
    S: Store + 'static,
    C: CacheClient + 'static,
{
    /// Registers `E` using the store's column catalog.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::AlreadyRegistered`] if a table of the same name exists.
    /// - [`ErrorKind::Store`] if the catalog cannot be read.
    /// - [`ErrorKind::InvalidCatalog`] if no primary key can be determined.
    /// - [`ErrorKind::CacheUnavailable`] if caching is enabled without a cache client.
    /// - [`ErrorKind::InvalidConfig`] if `ttl` is zero.
    pub async fn register<E: Entity>(&mut self, ttl: Duration) -> Result<Arc<TableHandle<E, S, C>>> {
        self.ensure_unregistered(E::table_name())?;

        let deadline = Deadline::after(&self.clock, self.config.operation_timeout());
        let columns = deadline.run(self.store.columns(E::table_name())).await??;
        let catalog = FieldCatalog::from_columns::<E>(&columns)?;

        self.register_with_catalog::<E>(catalog, ttl)
    }

    /// Registers `E` with the configured default TTL.
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register).
    pub async fn register_default<E: Entity>(&mut self) -> Result<Arc<TableHandle<E, S, C>>> {
        let ttl = self.config.default_ttl();
        self.register::<E>(ttl).await
    }

    /// Registers `E` with an explicit field catalog.
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register), except that the store is not consulted.
    pub fn register_with_catalog<E: Entity>(&mut self, catalog: FieldCatalog, ttl: Duration) -> Result<Arc<TableHandle<E, S, C>>> {
        let table = E::table_name();
        self.ensure_unregistered(table)?;

        if ttl.is_zero() {
            return Err(Error::caused_by(
                ErrorKind::InvalidConfig,
                format!("table '{table}' needs a positive ttl"),
            ));
        }

        let cache = if self.config.close_cache() {
            None
        } else {
            let cache = self.cache.as_ref().ok_or_else(|| {
                Error::caused_by(
                    ErrorKind::CacheUnavailable,
                    format!("caching is enabled but no cache client is configured for table '{table}'"),
                )
            })?;
            Some(Arc::clone(cache))
        };

        let handle = Arc::new(TableHandle::<E, S, C>::new(
            catalog,
            ttl,
            TableParts {
                store_name: self.config.store().to_owned(),
                store: Arc::clone(&self.store),
                cache,
                clock: self.clock.clone(),
                operation_timeout: self.config.operation_timeout(),
                telemetry: self.telemetry.clone(),
            },
        ));

        tracing::info!(
            table.name = table,
            table.primary_fields = ?handle.catalog().primary_fields(),
            table.ttl_secs = ttl.as_secs(),
            table.cached = handle.is_cached(),
            "table registered"
        );

        self.tables.insert(table, Arc::clone(&handle) as Arc<dyn Any + Send + Sync>);
        Ok(handle)
    }

    /// Returns the handle registered for `E`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotRegistered`] if no table of that name is registered, or if
    /// it was registered for a different entity type.
    pub fn table<E: Entity>(&self) -> Result<Arc<TableHandle<E, S, C>>> {
        let table = E::table_name();
        let handle = self
            .tables
            .get(table)
            .ok_or_else(|| Error::caused_by(ErrorKind::NotRegistered, format!("table '{table}' is not registered")))?;

        Arc::clone(handle).downcast::<TableHandle<E, S, C>>().map_err(|_mismatched| {
            Error::caused_by(
                ErrorKind::NotRegistered,
                format!("table '{table}' is registered for a different entity type"),
            )
        })
    }

    /// Returns whether a table called `table` is registered.
    #[must_use]
    pub fn is_registered(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The cache client, if one was configured.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<C>> {
        self.cache.as_ref()
    }

    /// The registry configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn ensure_unregistered(&self, table: &str) -> Result<()> {
        if self.tables.contains_key(table) {
            return Err(Error::caused_by(
                ErrorKind::AlreadyRegistered,
                format!("table '{table}' is already registered"),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder<S, C = MemoryCacheClient> {
    store: S,
    cache: Option<C>,
    clock: Clock,
    config: CacheConfig,
    telemetry: TableTelemetry,
}

impl<S, C> std::fmt::Debug for RegistryBuilder<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, C> RegistryBuilder<S, C> {
    /// Sets the cache client shared by all tables.
    #[must_use]
    pub fn cache<C2: CacheClient>(self, cache: C2) -> RegistryBuilder<S, C2> {
        RegistryBuilder {
            store: self.store,
            cache: Some(cache),
            clock: self.clock,
            config: self.config,
            telemetry: self.telemetry,
        }
    }

    /// Sets the registry configuration.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Records table events as OpenTelemetry metrics from `provider`.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn meter_provider(mut self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        self.telemetry = TableTelemetry::with_meter_provider(provider);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if the configuration does not validate.
    pub fn build(self) -> Result<Registry<S, C>> {
        self.config.validate()?;

        Ok(Registry {
            store: Arc::new(self.store),
            cache: self.cache.map(Arc::new),
            clock: self.clock,
            config: self.config,
            telemetry: self.telemetry,
            tables: HashMap::new(),
        })
    }
}
