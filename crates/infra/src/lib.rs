//! Infrastructure layer: ledger, quantity cache, config and the engine that
//! drives moves and procurements over them.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod quantity_cache;

pub use cache::{CacheStore, InMemoryCacheStore, open_store};
pub use config::{ConfigError, EngineConfig};
pub use engine::{CancelOutcome, MoveOutcome, NewDetail, StockEngine};
pub use error::EngineError;
pub use ledger::{InMemoryLedger, Ledger};
pub use quantity_cache::{QuantityCache, ZoneSnapshot};
