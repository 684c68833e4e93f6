// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A record type that can be cached as a row of a table.
///
/// The cache reads field values through [`field_value`](Self::field_value) to build keys
/// and to verify that a secondary lookup still points at a matching row. It never
/// mutates entities.
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tablecache::Entity;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
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
/// let order = Order { id: 1, status: "new".to_string() };
/// assert_eq!(order.field_value("status"), Some(serde_json::json!("new")));
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The table the entity is stored in. Must be unique within a registry.
    fn table_name() -> &'static str;

    /// Names of the entity's fields, matching its serialized form.
    fn field_names() -> &'static [&'static str];

    /// Fields that identify a row, used when the store catalog does not flag primary columns.
    fn primary_field_names() -> &'static [&'static str];

    /// Returns the value of the named field, or `None` if the entity has no such field.
    ///
    /// The default implementation serializes the entity and reads the field from the
    /// resulting object. Override it when serialization is expensive.
    fn field_value(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut fields)) => fields.remove(name),
            _ => None,
        }
    }
}
