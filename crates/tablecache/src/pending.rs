// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registration deferred until the store is available.

use std::marker::PhantomData;
use std::time::Duration;

use futures::future::BoxFuture;
use tablecache_client::{CacheClient, MemoryCacheClient};

use crate::registry::{Registry, RegistryBuilder};
use crate::store::{Record, Store};
use crate::{Entity, Result};

trait DeferredRegistration<S, C>: Send {
    fn table_name(&self) -> &'static str;

    fn apply<'a>(self: Box<Self>, registry: &'a mut Registry<S, C>) -> BoxFuture<'a, Result<()>>;
}

struct Deferred<E> {
    ttl: Option<Duration>,
    init: Option<(String, Record)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S, C> DeferredRegistration<S, C> for Deferred<E>
where
    E: Entity,
    S: Store + 'static,
    C: CacheClient + 'static,
{
    fn table_name(&self) -> &'static str {
        E::table_name()
    }

    fn apply<'a>(self: Box<Self>, registry: &'a mut Registry<S, C>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some((query, args)) = &self.init {
                registry.store().exec(query, args).await?;
            }

            match self.ttl {
                Some(ttl) => registry.register::<E>(ttl).await?,
                None => registry.register_default::<E>().await?,
            };
            Ok(())
        })
    }
}

/// Table registrations collected before the store exists.
///
/// Declare tables up front, possibly from several modules, then hand the pending set a
/// [`RegistryBuilder`] once the store is connected. Handles only exist after
/// [`connect`](Self::connect), so no table can be used before its store is ready.
///
/// # Examples
///
/// ```ignore
/// let mut pending = PendingRegistry::new();
/// pending.register::<Order>(Duration::from_secs(60));
/// pending.register_with_init::<Customer>(None, "CREATE TABLE IF NOT EXISTS customers (...)", Record::new());
///
/// let registry = pending.connect(Registry::builder(store, clock).cache(cache)).await?;
/// let orders = registry.table::<Order>()?;
/// ```
pub struct PendingRegistry<S, C = MemoryCacheClient> {
    registrations: Vec<Box<dyn DeferredRegistration<S, C>>>,
}

impl<S, C> std::fmt::Debug for PendingRegistry<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables: Vec<_> = self.registrations.iter().map(|r| r.table_name()).collect();
        f.debug_struct("PendingRegistry").field("tables", &tables).finish()
    }
}

impl<S, C> Default for PendingRegistry<S, C> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<S, C> PendingRegistry<S, C>
where
    S: Store + 'static,
    C: CacheClient + 'static,
{
    /// Creates an empty set of pending registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `E` for registration with `ttl`.
    pub fn register<E: Entity>(&mut self, ttl: Duration) -> &mut Self {
        self.push::<E>(Some(ttl), None)
    }

    /// Queues `E` for registration with the registry's default TTL.
    pub fn register_default<E: Entity>(&mut self) -> &mut Self {
        self.push::<E>(None, None)
    }

    /// Queues `E` for registration, preceded by running `query` with `args` on the store.
    ///
    /// A `ttl` of `None` uses the registry's default TTL.
    pub fn register_with_init<E: Entity>(&mut self, ttl: Option<Duration>, query: impl Into<String>, args: Record) -> &mut Self {
        self.push::<E>(ttl, Some((query.into(), args)))
    }

    /// Returns the number of queued registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Builds the registry and runs every queued registration in order.
    ///
    /// # Errors
    ///
    /// Fails on the first registration or init statement that fails, with the same
    /// errors as [`Registry::register`], or with [`ErrorKind::Store`](crate::ErrorKind::Store)
    /// for a failed init statement.
    pub async fn connect(self, builder: RegistryBuilder<S, C>) -> Result<Registry<S, C>> {
        let mut registry = builder.build()?;

        for registration in self.registrations {
            registration.apply(&mut registry).await?;
        }

        Ok(registry)
    }

    fn push<E: Entity>(&mut self, ttl: Option<Duration>, init: Option<(String, Record)>) -> &mut Self {
        self.registrations.push(Box::new(Deferred::<E> {
            ttl,
            init,
            _entity: PhantomData,
        }));
        self
    }
}
