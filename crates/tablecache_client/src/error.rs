// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache client operations.

use std::fmt;

/// The category of a cache client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The backend could not serve a `get`, `set` or `delete` request.
    Backend,
    /// A named lock could not be acquired. The guarded work was not run.
    LockUnavailable,
}

impl ErrorKind {
    /// Returns the kind as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::LockUnavailable => "lock_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a [`CacheClient`](crate::CacheClient) operation.
///
/// Absent keys are never errors; this type only describes backend and lock failures.
/// Use [`std::error::Error::source()`] to reach the underlying cause.
///
/// # Example
///
/// ```
/// use tablecache_client::{Error, ErrorKind};
///
/// let error = Error::backend("connection reset");
/// assert_eq!(error.kind(), ErrorKind::Backend);
/// ```
#[ohno::error]
#[display("cache client error: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates a backend error from any cause.
    pub fn backend(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Backend, cause)
    }

    /// Creates a lock acquisition error from any cause.
    pub fn lock_unavailable(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::LockUnavailable, cause)
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A specialized [`Result`] type for cache client operations.
pub type Result<T> = std::result::Result<T, Error>;
