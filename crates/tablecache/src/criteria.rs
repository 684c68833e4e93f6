// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde_json::Value;

use crate::{Entity, Error, Result};

/// The field values a lookup matches on, plus an optional deadline.
///
/// Criteria that name exactly the table's primary fields resolve through the primary
/// cache entry. Any other field set is a secondary lookup.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use tablecache::Criteria;
///
/// let criteria = Criteria::new()
///     .field("status", "new")
///     .field("customer_id", 7)
///     .timeout(Duration::from_millis(250));
///
/// assert_eq!(criteria.fields(), ["status", "customer_id"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    fields: Vec<String>,
    values: Vec<Value>,
    timeout: Option<Duration>,
}

impl Criteria {
    /// Creates empty criteria.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field that must equal `value`.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push(name.into());
        self.values.push(value.into());
        self
    }

    /// Builds criteria from the current values of the named fields of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedKeyInput`](crate::ErrorKind::MalformedKeyInput) if the
    /// entity has no value for one of `fields`.
    pub fn from_entity<E: Entity>(entity: &E, fields: &[&str]) -> Result<Self> {
        fields.iter().try_fold(Self::new(), |criteria, name| {
            let value = entity
                .field_value(name)
                .ok_or_else(|| Error::malformed(format!("entity has no field '{name}'")))?;
            Ok(criteria.field(*name, value))
        })
    }

    /// Bounds the whole lookup, lock wait included, to finish within `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The field names, in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The field values, in the order of [`fields`](Self::fields).
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The per-call deadline, if one was set.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns whether no field was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
