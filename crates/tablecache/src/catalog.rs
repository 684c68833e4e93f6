// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolution of store column catalogs against entity fields.

use std::collections::HashSet;

use crate::{Entity, Error, ErrorKind, Result};

/// A column as reported by the backing store's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// The column name.
    pub name: String,
    /// Whether the column is part of the table's primary key.
    pub primary: bool,
}

impl Column {
    /// Creates a non-primary column.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: false,
        }
    }

    /// Creates a primary key column.
    #[must_use]
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: true,
        }
    }
}

/// The fields of a table and the subset that forms its primary key.
///
/// Built once at registration. Primary fields are kept sorted, which fixes the order in
/// which primary key values are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCatalog {
    fields: HashSet<String>,
    primary: Vec<String>,
}

impl FieldCatalog {
    /// Creates a catalog from explicit field and primary field names.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidCatalog`] if there is no primary field, a primary field
    /// is not among `fields`, or a name repeats.
    pub fn new<F, P>(fields: F, primary: P) -> Result<Self>
    where
        F: IntoIterator,
        F::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut known = HashSet::new();
        for field in fields {
            let field = field.into();
            if !known.insert(field.clone()) {
                return Err(invalid(format!("field '{field}' is listed twice")));
            }
        }

        let mut primary: Vec<String> = primary.into_iter().map(Into::into).collect();
        primary.sort_unstable();

        if primary.is_empty() {
            return Err(invalid("table has no primary key"));
        }

        if primary.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("primary key lists a field twice"));
        }

        if let Some(unknown) = primary.iter().find(|name| !known.contains(name.as_str())) {
            return Err(invalid(format!("primary field '{unknown}' is not a field of the table")));
        }

        Ok(Self { fields: known, primary })
    }

    /// Creates a catalog from the entity's own field declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidCatalog`] under the same conditions as [`new`](Self::new).
    pub fn from_entity<E: Entity>() -> Result<Self> {
        Self::new(E::field_names().iter().copied(), E::primary_field_names().iter().copied())
    }

    /// Resolves columns reported by the store against the entity's fields.
    ///
    /// The table's fields are the entity fields that the store also has as columns.
    /// Columns flagged primary form the primary key. If the store flags none, the entity's
    /// [`primary_field_names`](Entity::primary_field_names) are used instead. An empty
    /// column list means the store has no catalog, and the entity's declarations are used.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidCatalog`] if no primary key can be determined, or a
    /// primary field is not both an entity field and a column.
    pub fn from_columns<E: Entity>(columns: &[Column]) -> Result<Self> {
        if columns.is_empty() {
            return Self::from_entity::<E>();
        }

        let fields = E::field_names()
            .iter()
            .copied()
            .filter(|field| columns.iter().any(|column| column.name == *field));

        let primary: Vec<&str> = columns
            .iter()
            .filter(|column| column.primary)
            .map(|column| column.name.as_str())
            .collect();

        if primary.is_empty() {
            Self::new(fields, E::primary_field_names().iter().copied())
        } else {
            Self::new(fields, primary)
        }
    }

    /// Returns the primary field names in sorted order.
    #[must_use]
    pub fn primary_fields(&self) -> &[String] {
        &self.primary
    }

    /// Returns whether `field` is a field of the table.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::caused_by(ErrorKind::InvalidCatalog, message.into())
}
