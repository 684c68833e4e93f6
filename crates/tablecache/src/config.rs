// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registry configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, ErrorKind, Result};

const DEFAULT_STORE: &str = "default";
const DEFAULT_TTL_SECS: u64 = 300;

/// Settings shared by all tables of a registry.
///
/// Every field has a default, so configuration can be deserialized from a partial
/// document or built in code.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use tablecache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "store": "shop", "operation_timeout_ms": 500 }"#)?;
/// assert_eq!(config.store(), "shop");
/// assert_eq!(config.default_ttl(), Duration::from_secs(300));
/// assert_eq!(config.operation_timeout(), Some(Duration::from_millis(500)));
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    store: String,
    close_cache: bool,
    default_ttl_secs: u64,
    operation_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store: DEFAULT_STORE.to_string(),
            close_cache: false,
            default_ttl_secs: DEFAULT_TTL_SECS,
            operation_timeout_ms: None,
        }
    }
}

impl CacheConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store name that prefixes every cache key.
    #[must_use]
    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = store.into();
        self
    }

    /// Disables caching: lookups go straight to the store and invalidation does nothing.
    #[must_use]
    pub fn with_close_cache(mut self, close_cache: bool) -> Self {
        self.close_cache = close_cache;
        self
    }

    /// Sets the expiry used by tables registered without an explicit one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Sets the deadline for operations that do not set one themselves.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The store name that prefixes every cache key.
    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Whether caching is disabled.
    #[must_use]
    pub fn close_cache(&self) -> bool {
        self.close_cache
    }

    /// The expiry used by tables registered without an explicit one.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// The default operation deadline, if any.
    #[must_use]
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if the store name is empty, or the default
    /// expiry or operation timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.store.is_empty() {
            return Err(invalid("store name must not be empty"));
        }

        if self.default_ttl_secs == 0 {
            return Err(invalid("default_ttl_secs must be positive"));
        }

        if self.operation_timeout_ms == Some(0) {
            return Err(invalid("operation_timeout_ms must be positive"));
        }

        Ok(())
    }
}

fn invalid(message: &'static str) -> Error {
    Error::caused_by(ErrorKind::InvalidConfig, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").expect("valid config");
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.store(), "default");
        assert!(!config.close_cache());
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<CacheConfig>(r#"{ "stroe": "shop" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn builder_methods_set_fields() {
        let config = CacheConfig::new()
            .with_store("shop")
            .with_close_cache(true)
            .with_default_ttl(Duration::from_secs(60))
            .with_operation_timeout(Duration::from_millis(250));

        assert_eq!(config.store(), "shop");
        assert!(config.close_cache());
        assert_eq!(config.default_ttl(), Duration::from_secs(60));
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(250)));
        config.validate().expect("valid config");
    }

    #[test]
    fn zero_values_are_invalid() {
        let zero_ttl = CacheConfig::new().with_default_ttl(Duration::ZERO);
        assert_eq!(zero_ttl.validate().expect_err("zero ttl").kind(), ErrorKind::InvalidConfig);

        let zero_timeout = CacheConfig::new().with_operation_timeout(Duration::ZERO);
        assert_eq!(zero_timeout.validate().expect_err("zero timeout").kind(), ErrorKind::InvalidConfig);

        let empty_store = CacheConfig::new().with_store("");
        assert_eq!(empty_store.validate().expect_err("empty store").kind(), ErrorKind::InvalidConfig);
    }
}
