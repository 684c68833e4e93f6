// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for table cache operations.

use std::fmt;

/// The category of a table cache failure.
///
/// A record that does not exist is not an error: lookups report it as `Ok(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Key input was malformed: mismatched arity, empty or duplicate fields, an unknown
    /// field, or a missing primary field value.
    MalformedKeyInput,
    /// The cache could not be read or updated, or caching is enabled without a cache client.
    CacheUnavailable,
    /// The per-key lock could not be acquired.
    LockUnavailable,
    /// An entity could not be encoded, or a store row did not decode into the entity type.
    Serialization,
    /// The backing store failed.
    Store,
    /// The operation deadline elapsed.
    Timeout,
    /// A table with the same name is already registered.
    AlreadyRegistered,
    /// No table is registered for the requested entity type.
    NotRegistered,
    /// The field catalog cannot describe the entity, e.g. it has no primary field.
    InvalidCatalog,
    /// The configuration was rejected.
    InvalidConfig,
}

impl ErrorKind {
    /// Returns the kind as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedKeyInput => "malformed_key_input",
            Self::CacheUnavailable => "cache_unavailable",
            Self::LockUnavailable => "lock_unavailable",
            Self::Serialization => "serialization",
            Self::Store => "store",
            Self::Timeout => "timeout",
            Self::AlreadyRegistered => "already_registered",
            Self::NotRegistered => "not_registered",
            Self::InvalidCatalog => "invalid_catalog",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a table cache operation.
///
/// Inspect [`kind`](Self::kind) to branch on the failure category; the underlying
/// cause, if any, is available through [`std::error::Error::source()`].
#[ohno::error]
#[display("table cache error: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::caused_by(ErrorKind::MalformedKeyInput, message.into())
    }
}

impl From<tablecache_client::Error> for Error {
    fn from(error: tablecache_client::Error) -> Self {
        let kind = match error.kind() {
            tablecache_client::ErrorKind::LockUnavailable => ErrorKind::LockUnavailable,
            _ => ErrorKind::CacheUnavailable,
        };
        Self::caused_by(kind, error)
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::caused_by(ErrorKind::Store, error)
    }
}

/// A specialized [`Result`] type for table cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by a [`Store`](crate::Store) implementation.
///
/// # Example
///
/// ```
/// use tablecache::StoreError;
///
/// let error = StoreError::from_message("connection refused");
/// ```
#[ohno::error]
#[display("backing store error")]
pub struct StoreError {}

impl StoreError {
    /// Creates a store error from any cause.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}
