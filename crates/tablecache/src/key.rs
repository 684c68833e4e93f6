// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deterministic cache key derivation.
//!
//! A key is `"<store>:<table>:" + join(fields, "&") + json(values)`, with the
//! `(field, value)` pairs sorted by field name, e.g. `shop:orders:id&status[1,"new"]`.
//! Equal pair sets therefore produce byte-identical keys regardless of input order.

use serde_json::Value;

use crate::catalog::FieldCatalog;
use crate::{Entity, Error, ErrorKind, Result};

/// A derived cache key together with the values it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    key: String,
    fields: Vec<String>,
    field_values: Vec<Value>,
    is_primary: bool,
}

impl CacheKey {
    /// The full key string.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The field names encoded in the key, sorted.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The field values encoded in the key, in the order of [`fields`](Self::fields).
    #[must_use]
    pub fn field_values(&self) -> &[Value] {
        &self.field_values
    }

    /// Whether the key is built from exactly the table's primary fields.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }
}

/// Builds cache keys for one table.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
    primary_fields: Vec<String>,
    primary_prefix: String,
}

impl KeyBuilder {
    /// Creates a builder for keys under `namespace` (`"<store>:<table>"`).
    ///
    /// `primary_fields` must already be sorted, as [`FieldCatalog`] keeps them.
    #[must_use]
    pub fn new(namespace: impl Into<String>, primary_fields: &[String]) -> Self {
        let namespace = namespace.into();
        let primary_prefix = format!("{namespace}:{}", primary_fields.join("&"));
        Self {
            namespace,
            primary_fields: primary_fields.to_vec(),
            primary_prefix,
        }
    }

    pub(crate) fn for_table(store: &str, table: &str, catalog: &FieldCatalog) -> Self {
        Self::new(format!("{store}:{table}"), catalog.primary_fields())
    }

    /// The namespace every key starts with.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The prefix shared by all primary keys; a primary key continues with `[`.
    #[must_use]
    pub fn primary_prefix(&self) -> &str {
        &self.primary_prefix
    }

    /// Returns whether `key` is a primary key of this table.
    #[must_use]
    pub fn is_primary_key(&self, key: &str) -> bool {
        key.strip_prefix(self.primary_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('['))
    }

    /// Builds the key string for the given fields and values.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedKeyInput`] if the slices differ in length, are empty,
    /// or name a field twice.
    pub fn build_key(&self, fields: &[String], values: &[Value]) -> Result<String> {
        self.build_cache_key(fields, values).map(|key| key.key)
    }

    /// Builds a [`CacheKey`] for the given fields and values.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedKeyInput`] if the slices differ in length, are empty,
    /// or name a field twice.
    pub fn build_cache_key(&self, fields: &[String], values: &[Value]) -> Result<CacheKey> {
        if fields.len() != values.len() {
            return Err(Error::malformed(format!(
                "{} fields but {} values",
                fields.len(),
                values.len()
            )));
        }

        if fields.is_empty() {
            return Err(Error::malformed("no fields given"));
        }

        let mut pairs: Vec<(&String, &Value)> = fields.iter().zip(values).collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        if let Some(pair) = pairs.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(Error::malformed(format!("field '{}' given twice", pair[0].0)));
        }

        let (fields, field_values): (Vec<String>, Vec<Value>) = pairs.into_iter().map(|(f, v)| (f.clone(), v.clone())).unzip();

        let encoded = serde_json::to_string(&field_values).map_err(|e| Error::caused_by(ErrorKind::Serialization, e))?;
        let key = format!("{}:{}{encoded}", self.namespace, fields.join("&"));
        let is_primary = fields == self.primary_fields;

        Ok(CacheKey {
            key,
            fields,
            field_values,
            is_primary,
        })
    }

    /// Builds the primary key of `entity` from its live field values.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedKeyInput`] if the entity has no value for a primary field.
    pub fn build_primary_key<E: Entity>(&self, entity: &E) -> Result<CacheKey> {
        let values = self
            .primary_fields
            .iter()
            .map(|field| {
                entity
                    .field_value(field)
                    .ok_or_else(|| Error::malformed(format!("entity has no value for primary field '{field}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.build_cache_key(&self.primary_fields, &values)
    }
}
