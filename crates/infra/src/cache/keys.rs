//! Cache key layout.
//!
//! ```text
//! {prefix}:item:{item_key}:{all|lock}       member = zone kind
//! {prefix}:location:{location_id}:{all|lock} member = item key
//! ```

use stockflow_inventory::{ItemRef, LocationId};

/// `all` holds settled quantity; `lock` holds reservations as negative scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    All,
    Lock,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::All => "all",
            Bucket::Lock => "lock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn item(&self, item: &ItemRef, bucket: Bucket) -> String {
        format!("{}:item:{}:{}", self.prefix, item.key(), bucket.as_str())
    }

    pub fn location(&self, location: LocationId, bucket: Bucket) -> String {
        format!("{}:location:{}:{}", self.prefix, location, bucket.as_str())
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("stockflow")
    }
}
