// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[cfg(any(feature = "metrics", test))]
pub(crate) const TABLE_NAME: &str = "table.name";

#[cfg(any(feature = "metrics", test))]
pub(crate) const TABLE_OPERATION_NAME: &str = "table.operation";

#[cfg(any(feature = "metrics", test))]
pub(crate) const TABLE_ACTIVITY_NAME: &str = "table.activity";

#[cfg(test)]
pub(crate) const CACHE_KEY_NAME: &str = "cache.key";

#[cfg(test)]
pub(crate) const TABLE_EVENT_NAME: &str = "table.event";
