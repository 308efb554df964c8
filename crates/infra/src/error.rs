//! Error surface of the engine.

use thiserror::Error;

use stockflow_core::DomainError;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Deterministic domain failure (state guard, validation, configuration).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An event could not be encoded before commit.
    #[error("event encoding failed: {0}")]
    Encode(String),

    /// Publication failed after a successful commit (the ledger keeps the change).
    #[error("publish failed after commit: {0}")]
    Publish(String),

    #[error("engine state lock poisoned")]
    Poisoned,
}

impl From<LedgerError> for EngineError {
    /// A commit-time version conflict means another caller moved the record
    /// first, which callers see as a state guard.
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Conflict { .. } => {
                EngineError::Domain(DomainError::state_guard(value.to_string()))
            }
            other => EngineError::Ledger(other),
        }
    }
}

impl EngineError {
    pub fn is_state_guard(&self) -> bool {
        matches!(self, EngineError::Domain(e) if e.is_state_guard())
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RecordKey;
    use stockflow_core::ExpectedVersion;
    use stockflow_inventory::MoveId;

    #[test]
    fn ledger_conflict_surfaces_as_state_guard() {
        let err: EngineError = LedgerError::Conflict {
            key: RecordKey::Move(MoveId::generate()),
            expected: ExpectedVersion::Exact(2),
            actual: 3,
        }
        .into();
        assert!(err.is_state_guard());

        let err: EngineError = LedgerError::Poisoned.into();
        assert!(matches!(err, EngineError::Ledger(LedgerError::Poisoned)));
    }
}
