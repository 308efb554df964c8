//! Trackable item references.
//!
//! Items are owned by the catalog; the engine only needs a stable, comparable
//! reference and a key to address cache entries with.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to something whose quantity is tracked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ItemRef {
    /// A product variant from the catalog.
    Product(Uuid),
    /// A package node (container hierarchy lives outside this crate).
    Package(Uuid),
}

impl ItemRef {
    /// Stable key used as cache member/key fragment, e.g. `product.<uuid>`.
    pub fn key(&self) -> String {
        match self {
            ItemRef::Product(id) => format!("product.{id}"),
            ItemRef::Package(id) => format!("package.{id}"),
        }
    }
}

impl core::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.key())
    }
}
