//! Two-bucket quantity cache over a [`CacheStore`].
//!
//! Per item, `all` holds the settled quantity per zone kind and `lock` the
//! reservations of confirmed moves as negative scores, so available quantity
//! is the plain sum of both. The same split is kept per location, keyed by
//! item. Virtual locations hold nothing themselves; their reads union the
//! subtree.
//!
//! Everything here is derived from the ledger and can be rebuilt with
//! [`QuantityCache::sync_item`] / [`QuantityCache::sync_location`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stockflow_inventory::{ItemRef, LocationId, Move, MoveStatus, ZoneKind, ZoneSet};

use crate::cache::{Bucket, CacheError, CacheKeys, CacheOp, CacheStore};

/// Both buckets of one item, per zone kind. Zero entries are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub all: BTreeMap<ZoneKind, i64>,
    pub lock: BTreeMap<ZoneKind, i64>,
}

impl ZoneSnapshot {
    pub fn available(&self, zone: ZoneKind) -> i64 {
        self.all.get(&zone).copied().unwrap_or(0) + self.lock.get(&zone).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct QuantityCache<C> {
    store: C,
    keys: CacheKeys,
}

impl<C> QuantityCache<C> {
    pub fn new(store: C, keys: CacheKeys) -> Self {
        Self { store, keys }
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    fn incr(key: String, member: String, delta: i64) -> CacheOp {
        CacheOp::Incr { key, member, delta }
    }

    /// Ops reserving a confirmed move's quantity at its source.
    pub fn reserve_ops(&self, mv: &Move) -> Vec<CacheOp> {
        self.lock_ops(mv, -mv.quantity())
    }

    /// Ops releasing the reservation of a cancelled move.
    pub fn release_ops(&self, mv: &Move) -> Vec<CacheOp> {
        self.lock_ops(mv, mv.quantity())
    }

    fn lock_ops(&self, mv: &Move, delta: i64) -> Vec<CacheOp> {
        let item = mv.item();
        vec![
            Self::incr(
                self.keys.item(&item, Bucket::Lock),
                mv.from_zone().as_str().to_string(),
                delta,
            ),
            Self::incr(
                self.keys.location(mv.from_location(), Bucket::Lock),
                item.key(),
                delta,
            ),
        ]
    }

    /// Ops settling a done move: release the lock, move `all` between both
    /// locations, then shift the zone rollup when the zone kind changed.
    pub fn settle_ops(&self, mv: &Move) -> Vec<CacheOp> {
        let item = mv.item();
        let qty = mv.quantity();
        let mut ops = self.release_ops(mv);
        ops.push(Self::incr(
            self.keys.location(mv.from_location(), Bucket::All),
            item.key(),
            -qty,
        ));
        ops.push(Self::incr(
            self.keys.location(mv.to_location(), Bucket::All),
            item.key(),
            qty,
        ));
        if mv.from_zone() != mv.to_zone() {
            let key = self.keys.item(&item, Bucket::All);
            ops.push(Self::incr(key.clone(), mv.from_zone().as_str().to_string(), -qty));
            ops.push(Self::incr(key, mv.to_zone().as_str().to_string(), qty));
        }
        ops
    }
}

impl<C: CacheStore> QuantityCache<C> {
    pub fn apply(&self, ops: &[CacheOp]) -> Result<(), CacheError> {
        self.store.apply(ops)
    }

    fn zone_members(zones: ZoneSet) -> Vec<String> {
        zones.zones().iter().map(|z| z.as_str().to_string()).collect()
    }

    /// Settled plus reserved quantity over `zones`.
    pub fn available(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, CacheError> {
        Ok(self.on_hand(item, zones)? + self.lock_sum(item, zones)?)
    }

    /// Settled quantity over `zones`, ignoring reservations.
    pub fn on_hand(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, CacheError> {
        self.store
            .score_sum(&self.keys.item(item, Bucket::All), &Self::zone_members(zones))
    }

    /// Quantity reserved over `zones`, as a positive number.
    pub fn reserved(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, CacheError> {
        Ok(-self.lock_sum(item, zones)?)
    }

    fn lock_sum(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, CacheError> {
        self.store
            .score_sum(&self.keys.item(item, Bucket::Lock), &Self::zone_members(zones))
    }

    pub fn zone_available(&self, item: &ItemRef, zone: ZoneKind) -> Result<i64, CacheError> {
        let member = vec![zone.as_str().to_string()];
        Ok(self
            .store
            .score_sum(&self.keys.item(item, Bucket::All), &member)?
            + self
                .store
                .score_sum(&self.keys.item(item, Bucket::Lock), &member)?)
    }

    pub fn zone_snapshot(&self, item: &ItemRef) -> Result<ZoneSnapshot, CacheError> {
        Ok(ZoneSnapshot {
            all: decode_zones(self.store.entries(&self.keys.item(item, Bucket::All))?)?,
            lock: decode_zones(self.store.entries(&self.keys.item(item, Bucket::Lock))?)?,
        })
    }

    fn subtree_keys(&self, subtree: &[LocationId]) -> Vec<String> {
        subtree
            .iter()
            .flat_map(|id| {
                [
                    self.keys.location(*id, Bucket::All),
                    self.keys.location(*id, Bucket::Lock),
                ]
            })
            .collect()
    }

    /// Available quantity of `item` summed over `subtree` (a location and its
    /// descendants).
    pub fn location_available(
        &self,
        subtree: &[LocationId],
        item: &ItemRef,
    ) -> Result<i64, CacheError> {
        let union = self.store.union(&self.subtree_keys(subtree))?;
        Ok(union.get(&item.key()).copied().unwrap_or(0))
    }

    /// Item key to available quantity over `subtree`. Zero entries are omitted.
    pub fn location_contents(
        &self,
        subtree: &[LocationId],
    ) -> Result<BTreeMap<String, i64>, CacheError> {
        let mut union = self.store.union(&self.subtree_keys(subtree))?;
        union.retain(|_, qty| *qty != 0);
        Ok(union)
    }

    /// Rebuild an item's zone rollups from its moves, replacing what is cached.
    ///
    /// `all` is recomputed from done moves and `lock` from confirmed ones.
    pub fn sync_item(&self, item: &ItemRef, moves: &[Move]) -> Result<ZoneSnapshot, CacheError> {
        let mut snapshot = ZoneSnapshot::default();
        for mv in moves.iter().filter(|m| m.item() == *item) {
            match mv.status() {
                MoveStatus::Done if mv.from_zone() != mv.to_zone() => {
                    *snapshot.all.entry(mv.from_zone()).or_insert(0) -= mv.quantity();
                    *snapshot.all.entry(mv.to_zone()).or_insert(0) += mv.quantity();
                }
                MoveStatus::Confirmed => {
                    *snapshot.lock.entry(mv.from_zone()).or_insert(0) -= mv.quantity();
                }
                _ => {}
            }
        }
        snapshot.all.retain(|_, q| *q != 0);
        snapshot.lock.retain(|_, q| *q != 0);

        let encode = |m: &BTreeMap<ZoneKind, i64>| {
            m.iter()
                .map(|(zone, qty)| (zone.as_str().to_string(), *qty))
                .collect::<Vec<_>>()
        };
        self.store.apply(&[
            CacheOp::Replace {
                key: self.keys.item(item, Bucket::All),
                entries: encode(&snapshot.all),
            },
            CacheOp::Replace {
                key: self.keys.item(item, Bucket::Lock),
                entries: encode(&snapshot.lock),
            },
        ])?;
        debug!(item = %item, moves = moves.len(), "item cache rebuilt");
        Ok(snapshot)
    }

    /// Rebuild one location's own entries (not its subtree's) from the moves
    /// touching it.
    pub fn sync_location(&self, location: LocationId, moves: &[Move]) -> Result<(), CacheError> {
        let mut all: BTreeMap<String, i64> = BTreeMap::new();
        let mut lock: BTreeMap<String, i64> = BTreeMap::new();
        for mv in moves {
            let key = mv.item().key();
            match mv.status() {
                MoveStatus::Done => {
                    if mv.from_location() == location {
                        *all.entry(key.clone()).or_insert(0) -= mv.quantity();
                    }
                    if mv.to_location() == location {
                        *all.entry(key).or_insert(0) += mv.quantity();
                    }
                }
                MoveStatus::Confirmed if mv.from_location() == location => {
                    *lock.entry(key).or_insert(0) -= mv.quantity();
                }
                _ => {}
            }
        }
        let entries = |m: BTreeMap<String, i64>| -> Vec<(String, i64)> {
            m.into_iter().filter(|(_, q)| *q != 0).collect()
        };
        self.store.apply(&[
            CacheOp::Replace {
                key: self.keys.location(location, Bucket::All),
                entries: entries(all),
            },
            CacheOp::Replace {
                key: self.keys.location(location, Bucket::Lock),
                entries: entries(lock),
            },
        ])?;
        debug!(location = %location, moves = moves.len(), "location cache rebuilt");
        Ok(())
    }
}

fn decode_zones(raw: BTreeMap<String, i64>) -> Result<BTreeMap<ZoneKind, i64>, CacheError> {
    raw.into_iter()
        .filter(|(_, qty)| *qty != 0)
        .map(|(zone, qty)| {
            zone.parse::<ZoneKind>()
                .map(|z| (z, qty))
                .map_err(|e| CacheError::Decode(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use uuid::Uuid;

    #[test]
    fn snapshot_available_adds_both_buckets() {
        let snapshot = ZoneSnapshot {
            all: BTreeMap::from([(ZoneKind::Pack, 5)]),
            lock: BTreeMap::from([(ZoneKind::Pack, -5), (ZoneKind::Stock, -2)]),
        };
        assert_eq!(snapshot.available(ZoneKind::Pack), 0);
        assert_eq!(snapshot.available(ZoneKind::Stock), -2);
        assert_eq!(snapshot.available(ZoneKind::Check), 0);
    }

    #[test]
    fn unknown_zone_member_is_a_decode_error() {
        let cache = QuantityCache::new(InMemoryCacheStore::new(), CacheKeys::new("t"));
        let item = ItemRef::Product(Uuid::now_v7());
        cache
            .apply(&[CacheOp::Incr {
                key: cache.keys().item(&item, Bucket::All),
                member: "attic".into(),
                delta: 1,
            }])
            .unwrap();
        assert!(matches!(cache.zone_snapshot(&item), Err(CacheError::Decode(_))));
    }

    #[test]
    fn zone_set_reads_ignore_other_zones() {
        let cache = QuantityCache::new(InMemoryCacheStore::new(), CacheKeys::new("t"));
        let item = ItemRef::Product(Uuid::now_v7());
        let all = cache.keys().item(&item, Bucket::All);
        let lock = cache.keys().item(&item, Bucket::Lock);
        cache
            .apply(&[
                CacheOp::Incr { key: all.clone(), member: "stock".into(), delta: 10 },
                CacheOp::Incr { key: all, member: "customer".into(), delta: 4 },
                CacheOp::Incr { key: lock, member: "stock".into(), delta: -3 },
            ])
            .unwrap();
        assert_eq!(cache.available(&item, ZoneSet::ALL).unwrap(), 7);
        assert_eq!(cache.on_hand(&item, ZoneSet::ALL).unwrap(), 10);
        assert_eq!(cache.reserved(&item, ZoneSet::ALL).unwrap(), 3);
        assert_eq!(cache.on_hand(&item, ZoneSet::SETTLED).unwrap(), 4);
    }
}
