//! Authoritative record store for procurements, details and moves.
//!
//! Writes go through a [`UnitOfWork`]: a set of version expectations plus the
//! records to store, committed atomically. Callers serialize transitions on a
//! record with [`Ledger::lock`] (select-for-update semantics) and re-read the
//! record once the lock is held.

pub mod in_memory;
pub mod row_lock;

use std::sync::Arc;

use thiserror::Error;

use stockflow_core::{AggregateRoot, ExpectedVersion};
use stockflow_inventory::{
    ItemRef, LocationId, Move, MoveId, Procurement, ProcurementDetail, ProcurementDetailId,
    ProcurementId,
};

pub use in_memory::InMemoryLedger;
pub use row_lock::{RowGuard, RowLocks};

/// Identity of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Procurement(ProcurementId),
    Detail(ProcurementDetailId),
    Move(MoveId),
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordKey::Procurement(id) => write!(f, "procurement {id}"),
            RecordKey::Detail(id) => write!(f, "procurement detail {id}"),
            RecordKey::Move(id) => write!(f, "move {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Procurement(Procurement),
    Detail(ProcurementDetail),
    Move(Move),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Record::Procurement(p) => RecordKey::Procurement(p.id_typed()),
            Record::Detail(d) => RecordKey::Detail(d.id_typed()),
            Record::Move(m) => RecordKey::Move(m.id_typed()),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Record::Procurement(p) => p.version(),
            Record::Detail(d) => d.version(),
            Record::Move(m) => m.version(),
        }
    }
}

impl From<Procurement> for Record {
    fn from(value: Procurement) -> Self {
        Record::Procurement(value)
    }
}

impl From<ProcurementDetail> for Record {
    fn from(value: ProcurementDetail) -> Self {
        Record::Detail(value)
    }
}

impl From<Move> for Record {
    fn from(value: Move) -> Self {
        Record::Move(value)
    }
}

/// Atomic batch of ledger writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    expectations: Vec<(RecordKey, ExpectedVersion)>,
    writes: Vec<Record>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be at `expected` when the batch commits.
    pub fn expect(&mut self, key: RecordKey, expected: ExpectedVersion) -> &mut Self {
        self.expectations.push((key, expected));
        self
    }

    /// Store `record`, replacing the previous row with the same key.
    pub fn put(&mut self, record: impl Into<Record>) -> &mut Self {
        let record = record.into();
        let key = record.key();
        self.writes.retain(|w| w.key() != key);
        self.writes.push(record);
        self
    }

    pub fn expectations(&self) -> &[(RecordKey, ExpectedVersion)] {
        &self.expectations
    }

    pub fn writes(&self) -> &[Record] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<Record> {
        self.writes
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// An expectation did not hold at commit (another caller got there first).
    #[error("{key} changed concurrently (expected {expected:?}, found version {actual})")]
    Conflict {
        key: RecordKey,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("ledger lock poisoned")]
    Poisoned,

    #[error("missing record: {0}")]
    MissingRecord(RecordKey),
}

pub trait Ledger: Send + Sync {
    /// Block until the row lock for `key` is held.
    fn lock(&self, key: RecordKey) -> Result<RowGuard<'_>, LedgerError>;

    fn procurement(&self, id: ProcurementId) -> Result<Option<Procurement>, LedgerError>;

    fn detail(&self, id: ProcurementDetailId) -> Result<Option<ProcurementDetail>, LedgerError>;

    fn movement(&self, id: MoveId) -> Result<Option<Move>, LedgerError>;

    fn details_of(&self, procurement: ProcurementId) -> Result<Vec<ProcurementDetail>, LedgerError>;

    fn moves_of(&self, procurement: ProcurementId) -> Result<Vec<Move>, LedgerError>;

    fn moves_for_item(&self, item: ItemRef) -> Result<Vec<Move>, LedgerError>;

    /// Moves whose source or destination is `location`.
    fn moves_at(&self, location: LocationId) -> Result<Vec<Move>, LedgerError>;

    /// Check every expectation and store every write, or do nothing.
    fn commit(&self, work: UnitOfWork) -> Result<(), LedgerError>;
}

impl<L> Ledger for Arc<L>
where
    L: Ledger + ?Sized,
{
    fn lock(&self, key: RecordKey) -> Result<RowGuard<'_>, LedgerError> {
        (**self).lock(key)
    }

    fn procurement(&self, id: ProcurementId) -> Result<Option<Procurement>, LedgerError> {
        (**self).procurement(id)
    }

    fn detail(&self, id: ProcurementDetailId) -> Result<Option<ProcurementDetail>, LedgerError> {
        (**self).detail(id)
    }

    fn movement(&self, id: MoveId) -> Result<Option<Move>, LedgerError> {
        (**self).movement(id)
    }

    fn details_of(&self, procurement: ProcurementId) -> Result<Vec<ProcurementDetail>, LedgerError> {
        (**self).details_of(procurement)
    }

    fn moves_of(&self, procurement: ProcurementId) -> Result<Vec<Move>, LedgerError> {
        (**self).moves_of(procurement)
    }

    fn moves_for_item(&self, item: ItemRef) -> Result<Vec<Move>, LedgerError> {
        (**self).moves_for_item(item)
    }

    fn moves_at(&self, location: LocationId) -> Result<Vec<Move>, LedgerError> {
        (**self).moves_at(location)
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), LedgerError> {
        (**self).commit(work)
    }
}
