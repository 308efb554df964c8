use std::collections::BTreeMap;
use std::sync::RwLock;

use stockflow_core::AggregateRoot;
use stockflow_inventory::{
    ItemRef, LocationId, Move, MoveId, Procurement, ProcurementDetail, ProcurementDetailId,
    ProcurementId,
};

use super::row_lock::{RowGuard, RowLocks};
use super::{Ledger, LedgerError, Record, RecordKey, UnitOfWork};

#[derive(Debug, Default)]
struct Tables {
    procurements: BTreeMap<ProcurementId, Procurement>,
    details: BTreeMap<ProcurementDetailId, ProcurementDetail>,
    moves: BTreeMap<MoveId, Move>,
}

impl Tables {
    /// Current version of a row (0 when absent).
    fn version(&self, key: RecordKey) -> u64 {
        match key {
            RecordKey::Procurement(id) => self.procurements.get(&id).map(|p| p.version()),
            RecordKey::Detail(id) => self.details.get(&id).map(|d| d.version()),
            RecordKey::Move(id) => self.moves.get(&id).map(|m| m.version()),
        }
        .unwrap_or(0)
    }

    fn store(&mut self, record: Record) {
        match record {
            Record::Procurement(p) => {
                self.procurements.insert(p.id_typed(), p);
            }
            Record::Detail(d) => {
                self.details.insert(d.id_typed(), d);
            }
            Record::Move(m) => {
                self.moves.insert(m.id_typed(), m);
            }
        }
    }
}

/// In-memory ledger with row locks and atomic unit-of-work commits.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: RwLock<Tables>,
    locks: RowLocks,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, LedgerError> {
        let tables = self.tables.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(f(&tables))
    }

    fn select_moves(&self, pred: impl Fn(&Move) -> bool) -> Result<Vec<Move>, LedgerError> {
        self.read(|t| t.moves.values().filter(|m| pred(m)).cloned().collect())
    }
}

impl Ledger for InMemoryLedger {
    fn lock(&self, key: RecordKey) -> Result<RowGuard<'_>, LedgerError> {
        self.locks.acquire(key)
    }

    fn procurement(&self, id: ProcurementId) -> Result<Option<Procurement>, LedgerError> {
        self.read(|t| t.procurements.get(&id).cloned())
    }

    fn detail(&self, id: ProcurementDetailId) -> Result<Option<ProcurementDetail>, LedgerError> {
        self.read(|t| t.details.get(&id).cloned())
    }

    fn movement(&self, id: MoveId) -> Result<Option<Move>, LedgerError> {
        self.read(|t| t.moves.get(&id).cloned())
    }

    fn details_of(&self, procurement: ProcurementId) -> Result<Vec<ProcurementDetail>, LedgerError> {
        self.read(|t| {
            t.details
                .values()
                .filter(|d| d.procurement_id() == procurement)
                .cloned()
                .collect()
        })
    }

    fn moves_of(&self, procurement: ProcurementId) -> Result<Vec<Move>, LedgerError> {
        self.select_moves(|m| m.procurement_id() == procurement)
    }

    fn moves_for_item(&self, item: ItemRef) -> Result<Vec<Move>, LedgerError> {
        self.select_moves(|m| m.item() == item)
    }

    fn moves_at(&self, location: LocationId) -> Result<Vec<Move>, LedgerError> {
        self.select_moves(|m| m.from_location() == location || m.to_location() == location)
    }

    fn commit(&self, work: UnitOfWork) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().map_err(|_| LedgerError::Poisoned)?;

        for (key, expected) in work.expectations() {
            let actual = tables.version(*key);
            if !expected.matches(actual) {
                return Err(LedgerError::Conflict {
                    key: *key,
                    expected: *expected,
                    actual,
                });
            }
        }
        // Versions only move forward.
        for record in work.writes() {
            let key = record.key();
            let actual = tables.version(key);
            if record.version() <= actual {
                return Err(LedgerError::Conflict {
                    key,
                    expected: stockflow_core::ExpectedVersion::Exact(record.version().saturating_sub(1)),
                    actual,
                });
            }
        }

        for record in work.into_writes() {
            tables.store(record);
        }
        Ok(())
    }
}
