//! Stock movement engine (application-level orchestration).
//!
//! Every transition follows the same pipeline:
//!
//! ```text
//! lock rows (procurement, then move/detail)
//!   ↓
//! re-read records under the lock
//!   ↓
//! decide (pure aggregate `handle`), plan successors
//!   ↓
//! commit one unit of work (version expectations + writes)
//!   ↓
//! apply the cache batch
//!   ↓
//! publish envelopes
//! ```
//!
//! The ledger is authoritative. A cache batch that fails after commit is logged
//! and left for `sync_*` to repair; a publish failure is returned to the caller.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, PartnerId, WarehouseId,
};
use stockflow_events::{Event, EventBus, EventEnvelope};
use stockflow_inventory::{
    AttachDetail, CancelMove, CancelProcurement, CompleteMove, ConfirmMove, ConfirmProcurement,
    ItemRef, Location, LocationId, LocationTree, MarkProcurementDone, Move, MoveCommand, MoveId,
    MoveStatus, NewLocation, NewMove, NewProcurementDetail, Procurement, ProcurementCommand,
    ProcurementDetail, ProcurementDetailId, ProcurementId, ProcurementStatus,
    ProvisionedWarehouse, Route, RouteBook, RouteId, RouteType, ZoneKind, ZoneSet,
    plan_after_cancel, plan_after_done, provision_warehouse,
};

use crate::cache::{CacheKeys, CacheOp, CacheStore};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ledger::{Ledger, RecordKey, UnitOfWork};
use crate::quantity_cache::{QuantityCache, ZoneSnapshot};

pub const MOVE_AGGREGATE: &str = "stock.move";
pub const PROCUREMENT_AGGREGATE: &str = "stock.procurement";

/// A demand line to attach to a draft procurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDetail {
    pub item: ItemRef,
    pub quantity: i64,
    pub route_id: RouteId,
    pub initial_location: Option<LocationId>,
    pub end_location: Option<LocationId>,
    pub direct_return: bool,
}

impl NewDetail {
    pub fn new(item: ItemRef, quantity: i64, route_id: RouteId) -> Self {
        Self {
            item,
            quantity,
            route_id,
            initial_location: None,
            end_location: None,
            direct_return: false,
        }
    }

    pub fn from_location(mut self, location: LocationId) -> Self {
        self.initial_location = Some(location);
        self
    }

    pub fn to_location(mut self, location: LocationId) -> Self {
        self.end_location = Some(location);
        self
    }

    pub fn returning_directly(mut self) -> Self {
        self.direct_return = true;
        self
    }
}

/// Result of a move transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub move_id: MoveId,
    pub status: MoveStatus,
    /// Move spawned by this transition, if the route continues.
    pub successor: Option<MoveId>,
    /// Whether this transition closed the procurement.
    pub procurement_done: bool,
}

/// Result of cancelling a procurement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    pub cancelled: Vec<MoveId>,
    /// Return moves spawned by the cancellations.
    pub successors: Vec<MoveId>,
}

/// Everything one transition commits, caches and publishes.
#[derive(Debug, Default)]
struct Transition {
    work: UnitOfWork,
    cache_ops: Vec<CacheOp>,
    outgoing: Vec<EventEnvelope<JsonValue>>,
}

/// Records whose events are published on the bus.
trait Published: Aggregate {
    const AGGREGATE_TYPE: &'static str;

    fn warehouse(&self) -> WarehouseId;

    fn aggregate_id(&self) -> AggregateId;
}

impl Published for Move {
    const AGGREGATE_TYPE: &'static str = MOVE_AGGREGATE;

    fn warehouse(&self) -> WarehouseId {
        self.warehouse_id()
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl Published for Procurement {
    const AGGREGATE_TYPE: &'static str = PROCUREMENT_AGGREGATE;

    fn warehouse(&self) -> WarehouseId {
        self.warehouse_id()
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl Transition {
    /// Apply `events` to `aggregate` and queue one envelope per event.
    fn record<A>(&mut self, aggregate: &mut A, events: Vec<A::Event>) -> Result<(), EngineError>
    where
        A: Published,
        A::Event: Event + Serialize,
    {
        for event in events {
            aggregate.apply(&event);
            self.announce(aggregate, &event)?;
        }
        Ok(())
    }

    /// Queue an envelope for an event `aggregate` already reflects.
    fn announce<A, E>(&mut self, aggregate: &A, event: &E) -> Result<(), EngineError>
    where
        A: Published,
        E: Event + Serialize,
    {
        self.outgoing.push(envelope(
            aggregate.warehouse(),
            aggregate.aggregate_id(),
            A::AGGREGATE_TYPE,
            aggregate.version(),
            event,
        )?);
        Ok(())
    }
}

fn envelope<E>(
    warehouse_id: WarehouseId,
    aggregate_id: AggregateId,
    aggregate_type: &'static str,
    record_version: u64,
    event: &E,
) -> Result<EventEnvelope<JsonValue>, EngineError>
where
    E: Event + Serialize,
{
    let payload =
        serde_json::to_value(event).map_err(|e| EngineError::Encode(e.to_string()))?;
    Ok(EventEnvelope::new(
        Uuid::now_v7(),
        warehouse_id,
        aggregate_id,
        aggregate_type,
        record_version,
        event.event_type(),
        event.occurred_at(),
        payload,
    ))
}

/// Inventory movement engine over a ledger `L`, cache store `C` and bus `B`.
///
/// The location tree and route book are held in memory behind their own
/// locks. Lock order is always tree, then routes, then ledger rows.
#[derive(Debug)]
pub struct StockEngine<L, C, B> {
    ledger: L,
    cache: QuantityCache<C>,
    bus: B,
    tree: RwLock<LocationTree>,
    routes: RwLock<RouteBook>,
    config: EngineConfig,
}

impl<L, C, B> StockEngine<L, C, B> {
    pub fn new(ledger: L, store: C, bus: B, config: EngineConfig) -> Self {
        let keys = CacheKeys::new(config.cache_prefix.clone());
        Self {
            ledger,
            cache: QuantityCache::new(store, keys),
            bus,
            tree: RwLock::new(LocationTree::new()),
            routes: RwLock::new(RouteBook::new()),
            config,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn cache(&self) -> &QuantityCache<C> {
        &self.cache
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn read_tree(&self) -> Result<RwLockReadGuard<'_, LocationTree>, EngineError> {
        self.tree.read().map_err(|_| EngineError::Poisoned)
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, LocationTree>, EngineError> {
        self.tree.write().map_err(|_| EngineError::Poisoned)
    }

    fn read_routes(&self) -> Result<RwLockReadGuard<'_, RouteBook>, EngineError> {
        self.routes.read().map_err(|_| EngineError::Poisoned)
    }

    fn write_routes(&self) -> Result<RwLockWriteGuard<'_, RouteBook>, EngineError> {
        self.routes.write().map_err(|_| EngineError::Poisoned)
    }
}

impl<L, C, B> StockEngine<L, C, B>
where
    L: Ledger,
    C: CacheStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ----- locations & routes -------------------------------------------------

    #[instrument(skip(self), err)]
    pub fn provision_warehouse(
        &self,
        warehouse_id: WarehouseId,
        name: &str,
    ) -> Result<ProvisionedWarehouse, EngineError> {
        let mut tree = self.write_tree()?;
        let mut routes = self.write_routes()?;
        let provisioned =
            provision_warehouse(&mut tree, &mut routes, warehouse_id, name, Utc::now())?;
        info!(
            warehouse_id = %warehouse_id,
            zones = provisioned.zones.len(),
            routes = provisioned.routes.len(),
            "warehouse provisioned"
        );
        Ok(provisioned)
    }

    pub fn add_location(&self, new: NewLocation) -> Result<LocationId, EngineError> {
        let id = self.write_tree()?.insert(new, Utc::now())?;
        debug!(location = %id, "location added");
        Ok(id)
    }

    /// Move a subtree under `new_parent`. The tree write lock keeps readers
    /// from seeing a half-rewritten path.
    #[instrument(skip(self), err)]
    pub fn reparent_location(
        &self,
        id: LocationId,
        new_parent: LocationId,
    ) -> Result<(), EngineError> {
        self.write_tree()?.reparent(id, new_parent, Utc::now())?;
        info!(location = %id, parent = %new_parent, "location reparented");
        Ok(())
    }

    pub fn location(&self, id: LocationId) -> Result<Location, EngineError> {
        Ok(self.read_tree()?.require(id)?.clone())
    }

    /// Snapshot of the whole tree.
    pub fn locations(&self) -> Result<LocationTree, EngineError> {
        Ok(self.read_tree()?.clone())
    }

    /// Register a route through `waypoints`, in order.
    pub fn create_route(
        &self,
        warehouse_id: WarehouseId,
        name: &str,
        sequence: u32,
        waypoints: &[LocationId],
    ) -> Result<RouteId, EngineError> {
        let at = Utc::now();
        let tree = self.read_tree()?;
        let mut route = Route::new(RouteId::generate(), warehouse_id, name, sequence, at)?;
        for (seq, location) in waypoints.iter().enumerate() {
            route.add_setting(tree.require(*location)?, seq as u32, at)?;
        }
        if route.settings().len() < 2 {
            return Err(DomainError::validation("a route needs at least two waypoints").into());
        }
        let id = self.write_routes()?.insert(route)?;
        info!(route = %id, name, sequence, "route created");
        Ok(id)
    }

    pub fn route(&self, id: RouteId) -> Result<Route, EngineError> {
        Ok(self.read_routes()?.get(id)?.clone())
    }

    pub fn default_route(
        &self,
        warehouse_id: WarehouseId,
        route_type: RouteType,
    ) -> Result<Route, EngineError> {
        Ok(self
            .read_routes()?
            .default_route(warehouse_id, route_type)?
            .clone())
    }

    // ----- reads --------------------------------------------------------------

    fn load_procurement(&self, id: ProcurementId) -> Result<Procurement, EngineError> {
        self.ledger
            .procurement(id)?
            .ok_or_else(|| DomainError::not_found(format!("procurement {id}")).into())
    }

    fn load_detail(&self, id: ProcurementDetailId) -> Result<ProcurementDetail, EngineError> {
        self.ledger
            .detail(id)?
            .ok_or_else(|| DomainError::not_found(format!("procurement detail {id}")).into())
    }

    fn load_move(&self, id: MoveId) -> Result<Move, EngineError> {
        self.ledger
            .movement(id)?
            .ok_or_else(|| DomainError::not_found(format!("move {id}")).into())
    }

    pub fn procurement(&self, id: ProcurementId) -> Result<Procurement, EngineError> {
        self.load_procurement(id)
    }

    pub fn detail(&self, id: ProcurementDetailId) -> Result<ProcurementDetail, EngineError> {
        self.load_detail(id)
    }

    pub fn movement(&self, id: MoveId) -> Result<Move, EngineError> {
        self.load_move(id)
    }

    pub fn moves_of(&self, procurement: ProcurementId) -> Result<Vec<Move>, EngineError> {
        Ok(self.ledger.moves_of(procurement)?)
    }

    /// The detail's moves, first to last, following successor links.
    pub fn chain_of(&self, detail: ProcurementDetailId) -> Result<Vec<Move>, EngineError> {
        let mut chain = Vec::new();
        let mut next = self.load_detail(detail)?.first_move();
        while let Some(id) = next {
            let mv = self.load_move(id)?;
            next = mv.next();
            chain.push(mv);
        }
        Ok(chain)
    }

    pub fn available(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, EngineError> {
        Ok(self.cache.available(item, zones)?)
    }

    pub fn zone_available(&self, item: &ItemRef, zone: ZoneKind) -> Result<i64, EngineError> {
        Ok(self.cache.zone_available(item, zone)?)
    }

    pub fn on_hand(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, EngineError> {
        Ok(self.cache.on_hand(item, zones)?)
    }

    pub fn reserved(&self, item: &ItemRef, zones: ZoneSet) -> Result<i64, EngineError> {
        Ok(self.cache.reserved(item, zones)?)
    }

    pub fn zone_snapshot(&self, item: &ItemRef) -> Result<ZoneSnapshot, EngineError> {
        Ok(self.cache.zone_snapshot(item)?)
    }

    /// Available quantity of `item` at `location`, including its descendants.
    pub fn location_available(
        &self,
        location: LocationId,
        item: &ItemRef,
    ) -> Result<i64, EngineError> {
        let subtree = self.read_tree()?.subtree_ids(location)?;
        Ok(self.cache.location_available(&subtree, item)?)
    }

    pub fn location_contents(
        &self,
        location: LocationId,
    ) -> Result<std::collections::BTreeMap<String, i64>, EngineError> {
        let subtree = self.read_tree()?.subtree_ids(location)?;
        Ok(self.cache.location_contents(&subtree)?)
    }

    // ----- resync -------------------------------------------------------------

    /// Rebuild an item's cache entries from the ledger.
    #[instrument(skip(self), err)]
    pub fn sync_item(&self, item: &ItemRef) -> Result<ZoneSnapshot, EngineError> {
        let moves = self.ledger.moves_for_item(*item)?;
        let snapshot = self.cache.sync_item(item, &moves)?;
        info!(item = %item, moves = moves.len(), "item cache synced");
        Ok(snapshot)
    }

    /// Rebuild the cache entries of `location` and every node below it.
    #[instrument(skip(self), err)]
    pub fn sync_location(&self, location: LocationId) -> Result<(), EngineError> {
        let subtree = self.read_tree()?.subtree_ids(location)?;
        for id in &subtree {
            let moves = self.ledger.moves_at(*id)?;
            self.cache.sync_location(*id, &moves)?;
        }
        info!(location = %location, nodes = subtree.len(), "location cache synced");
        Ok(())
    }

    // ----- procurements -------------------------------------------------------

    #[instrument(skip(self), err)]
    pub fn create_procurement(
        &self,
        warehouse_id: WarehouseId,
        requester: PartnerId,
        prerequisites: Vec<ProcurementId>,
    ) -> Result<ProcurementId, EngineError> {
        if self.read_tree()?.root_of(warehouse_id).is_none() {
            return Err(DomainError::not_found(format!("warehouse {warehouse_id}")).into());
        }
        for prerequisite in &prerequisites {
            self.load_procurement(*prerequisite)?;
        }

        let id = ProcurementId::generate();
        let (procurement, created) =
            Procurement::create(id, warehouse_id, requester, prerequisites, Utc::now())?;

        let mut t = Transition::default();
        t.announce(&procurement, &created)?;
        t.work
            .expect(RecordKey::Procurement(id), ExpectedVersion::Absent)
            .put(procurement);
        self.finish(t)?;

        info!(procurement_id = %id, warehouse_id = %warehouse_id, "procurement created");
        Ok(id)
    }

    /// Attach a demand line to a draft procurement.
    #[instrument(skip(self), err)]
    pub fn add_detail(
        &self,
        procurement_id: ProcurementId,
        new: NewDetail,
    ) -> Result<ProcurementDetailId, EngineError> {
        let at = Utc::now();
        let tree = self.read_tree()?;
        let routes = self.read_routes()?;
        let _row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let mut procurement = self.load_procurement(procurement_id)?;

        let detail = ProcurementDetail::new(
            NewProcurementDetail {
                id: ProcurementDetailId::generate(),
                procurement_id,
                warehouse_id: procurement.warehouse_id(),
                item: new.item,
                quantity: new.quantity,
                route_id: new.route_id,
                initial_location: new.initial_location,
                end_location: new.end_location,
                direct_return: new.direct_return,
            },
            at,
        )?;
        detail.validate_route(routes.get(new.route_id)?, &tree)?;

        let events = procurement.handle(&ProcurementCommand::AttachDetail(AttachDetail {
            procurement_id,
            detail_id: detail.id_typed(),
            item: new.item,
            quantity: new.quantity,
            occurred_at: at,
        }))?;

        let mut t = Transition::default();
        t.work
            .expect(
                RecordKey::Procurement(procurement_id),
                ExpectedVersion::Exact(procurement.version()),
            )
            .expect(RecordKey::Detail(detail.id_typed()), ExpectedVersion::Absent);
        t.record(&mut procurement, events)?;
        let detail_id = detail.id_typed();
        t.work.put(procurement).put(detail);
        drop(routes);
        drop(tree);
        self.finish(t)?;

        info!(procurement_id = %procurement_id, detail_id = %detail_id, item = %new.item, quantity = new.quantity, "detail attached");
        Ok(detail_id)
    }

    /// Change a detail's quantity while it has not spawned a move.
    pub fn set_detail_quantity(
        &self,
        detail_id: ProcurementDetailId,
        quantity: i64,
    ) -> Result<(), EngineError> {
        let _row = self.ledger.lock(RecordKey::Detail(detail_id))?;
        let mut detail = self.load_detail(detail_id)?;
        let expected = ExpectedVersion::Exact(detail.version());
        detail.set_quantity(quantity, Utc::now())?;

        let mut work = UnitOfWork::new();
        work.expect(RecordKey::Detail(detail_id), expected).put(detail);
        self.ledger.commit(work)?;
        debug!(detail_id = %detail_id, quantity, "detail quantity changed");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn confirm_procurement(&self, procurement_id: ProcurementId) -> Result<(), EngineError> {
        let _row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let mut procurement = self.load_procurement(procurement_id)?;

        let mut pending = Vec::new();
        for prerequisite in procurement.prerequisites() {
            if self.load_procurement(*prerequisite)?.status() != ProcurementStatus::Done {
                pending.push(*prerequisite);
            }
        }

        let events = procurement.handle(&ProcurementCommand::Confirm(ConfirmProcurement {
            procurement_id,
            pending_prerequisites: pending,
            occurred_at: Utc::now(),
        }))?;

        let mut t = Transition::default();
        t.work.expect(
            RecordKey::Procurement(procurement_id),
            ExpectedVersion::Exact(procurement.version()),
        );
        t.record(&mut procurement, events)?;
        t.work.put(procurement);
        self.finish(t)?;

        info!(procurement_id = %procurement_id, "procurement confirmed");
        Ok(())
    }

    /// Cancel a procurement and every move of it still in flight.
    ///
    /// Each cancelled move may spawn a return move along its route. The
    /// procurement, the cancelled moves and their returns commit as one unit.
    #[instrument(skip(self), err)]
    pub fn cancel_procurement(
        &self,
        procurement_id: ProcurementId,
    ) -> Result<CancelOutcome, EngineError> {
        let at = Utc::now();
        let tree = self.read_tree()?;
        let routes = self.read_routes()?;
        let _row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let mut procurement = self.load_procurement(procurement_id)?;

        let events = procurement.handle(&ProcurementCommand::Cancel(CancelProcurement {
            procurement_id,
            occurred_at: at,
        }))?;
        let mut t = Transition::default();
        t.work.expect(
            RecordKey::Procurement(procurement_id),
            ExpectedVersion::Exact(procurement.version()),
        );
        t.record(&mut procurement, events)?;
        t.work.put(procurement.clone());

        let in_flight: Vec<MoveId> = self
            .ledger
            .moves_of(procurement_id)?
            .into_iter()
            .filter(|m| !m.is_terminal())
            .map(|m| m.id_typed())
            .collect();
        let _move_rows = in_flight
            .iter()
            .map(|id| self.ledger.lock(RecordKey::Move(*id)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcome = CancelOutcome::default();
        for move_id in in_flight {
            let successor =
                self.plan_cancel(&mut t, procurement.status(), move_id, &tree, &routes)?;
            outcome.cancelled.push(move_id);
            outcome.successors.extend(successor);
        }
        drop(routes);
        drop(tree);
        self.finish(t)?;

        info!(
            procurement_id = %procurement_id,
            cancelled = outcome.cancelled.len(),
            returning = outcome.successors.len(),
            "procurement cancelled"
        );
        Ok(outcome)
    }

    /// Whether every detail has started and every move but `settling` is done.
    fn chains_settled(&self, procurement: &Procurement, settling: MoveId) -> Result<bool, EngineError> {
        let details = self.ledger.details_of(procurement.id_typed())?;
        if details.is_empty() || !details.iter().all(ProcurementDetail::is_started) {
            return Ok(false);
        }
        Ok(self
            .ledger
            .moves_of(procurement.id_typed())?
            .iter()
            .all(|m| m.id_typed() == settling || m.status() == MoveStatus::Done))
    }

    // ----- moves --------------------------------------------------------------

    /// Create the detail's first move (confirmed unless auto-confirm is off).
    #[instrument(skip(self), err)]
    pub fn start_detail(&self, detail_id: ProcurementDetailId) -> Result<MoveId, EngineError> {
        let at = Utc::now();
        let procurement_id = self.load_detail(detail_id)?.procurement_id();

        let tree = self.read_tree()?;
        let routes = self.read_routes()?;
        let _procurement_row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let _detail_row = self.ledger.lock(RecordKey::Detail(detail_id))?;
        let procurement = self.load_procurement(procurement_id)?;
        let mut detail = self.load_detail(detail_id)?;

        let route = routes.get(detail.route_id())?;
        let new = detail.plan_first_move(procurement.status(), route, &tree, MoveId::generate(), at)?;

        let mut t = Transition::default();
        t.work
            .expect(
                RecordKey::Procurement(procurement_id),
                ExpectedVersion::Exact(procurement.version()),
            )
            .expect(RecordKey::Detail(detail_id), ExpectedVersion::Exact(detail.version()));
        let mv = self.spawn(&mut t, new, &tree)?;
        detail.mark_started(mv.id_typed(), at)?;
        t.work.put(detail);
        drop(routes);
        drop(tree);
        self.finish(t)?;

        info!(
            procurement_id = %procurement_id,
            detail_id = %detail_id,
            move_id = %mv.id_typed(),
            item = %mv.item(),
            quantity = mv.quantity(),
            status = %mv.status(),
            "detail started"
        );
        Ok(mv.id_typed())
    }

    /// Start every detail of a confirmed procurement that has not started yet.
    pub fn start_procurement(&self, procurement_id: ProcurementId) -> Result<Vec<MoveId>, EngineError> {
        let mut started = Vec::new();
        for detail in self.ledger.details_of(procurement_id)? {
            if !detail.is_started() {
                started.push(self.start_detail(detail.id_typed())?);
            }
        }
        Ok(started)
    }

    /// Reserve a draft move's quantity at its source.
    #[instrument(skip(self), err)]
    pub fn confirm_move(&self, move_id: MoveId) -> Result<MoveOutcome, EngineError> {
        let procurement_id = self.load_move(move_id)?.procurement_id();

        let tree = self.read_tree()?;
        let _procurement_row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let _move_row = self.ledger.lock(RecordKey::Move(move_id))?;
        let mut mv = self.load_move(move_id)?;

        let events = mv.handle(&MoveCommand::Confirm(ConfirmMove {
            move_id,
            source: tree.placement(mv.from_location())?,
            occurred_at: Utc::now(),
        }))?;
        drop(tree);

        let mut t = Transition::default();
        t.work
            .expect(RecordKey::Move(move_id), ExpectedVersion::Exact(mv.version()));
        t.record(&mut mv, events)?;
        t.cache_ops.extend(self.cache.reserve_ops(&mv));
        t.work.put(mv.clone());
        self.finish(t)?;

        info!(move_id = %move_id, item = %mv.item(), quantity = mv.quantity(), from = %mv.from_location(), "move confirmed");
        Ok(MoveOutcome {
            move_id,
            status: mv.status(),
            successor: None,
            procurement_done: false,
        })
    }

    /// Settle a confirmed move at `destination` (defaults to its planned
    /// destination, which must then be concrete) and chain the next hop.
    #[instrument(skip(self), err)]
    pub fn complete_move(
        &self,
        move_id: MoveId,
        destination: Option<LocationId>,
    ) -> Result<MoveOutcome, EngineError> {
        let at = Utc::now();
        let procurement_id = self.load_move(move_id)?.procurement_id();

        let tree = self.read_tree()?;
        let routes = self.read_routes()?;
        let _procurement_row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let _move_row = self.ledger.lock(RecordKey::Move(move_id))?;
        let mut mv = self.load_move(move_id)?;
        let mut procurement = self.load_procurement(procurement_id)?;
        let detail = self.load_detail(mv.detail_id())?;
        let route = routes.get(mv.route_id())?;

        let destination = tree.placement(destination.unwrap_or(mv.to_location()))?;
        let plan = plan_after_done(
            &mv,
            &destination,
            route,
            &tree,
            &detail,
            procurement.status(),
            MoveId::generate(),
            at,
        )?;
        let events = mv.handle(&MoveCommand::Complete(CompleteMove {
            move_id,
            destination,
            successor: plan.as_ref().map(|p| p.id),
            occurred_at: at,
        }))?;

        let mut t = Transition::default();
        t.work
            .expect(
                RecordKey::Procurement(procurement_id),
                ExpectedVersion::Exact(procurement.version()),
            )
            .expect(RecordKey::Move(move_id), ExpectedVersion::Exact(mv.version()));
        t.record(&mut mv, events)?;
        t.cache_ops.extend(self.cache.settle_ops(&mv));
        t.work.put(mv.clone());

        let successor = match plan {
            Some(new) => Some(self.spawn(&mut t, new, &tree)?.id_typed()),
            None => None,
        };

        let mut procurement_done = false;
        if successor.is_none()
            && procurement.status() == ProcurementStatus::Confirmed
            && self.chains_settled(&procurement, move_id)?
        {
            let events = procurement.handle(&ProcurementCommand::MarkDone(MarkProcurementDone {
                procurement_id,
                occurred_at: at,
            }))?;
            t.record(&mut procurement, events)?;
            t.work.put(procurement);
            procurement_done = true;
        }
        drop(routes);
        drop(tree);
        self.finish(t)?;

        info!(
            move_id = %move_id,
            item = %mv.item(),
            quantity = mv.quantity(),
            from_zone = %mv.from_zone(),
            to_zone = %mv.to_zone(),
            successor = ?successor,
            procurement_done,
            "move done"
        );
        if procurement_done {
            info!(procurement_id = %procurement_id, "procurement done");
        }
        Ok(MoveOutcome {
            move_id,
            status: mv.status(),
            successor,
            procurement_done,
        })
    }

    /// Cancel an in-flight move of a cancelled procurement.
    ///
    /// Cancelling a move that is already cancelled (for instance by
    /// [`Self::cancel_procurement`]) changes nothing and reports the return
    /// move it spawned back then.
    #[instrument(skip(self), err)]
    pub fn cancel_move(&self, move_id: MoveId) -> Result<MoveOutcome, EngineError> {
        let procurement_id = self.load_move(move_id)?.procurement_id();
        let tree = self.read_tree()?;
        let routes = self.read_routes()?;
        let _procurement_row = self.ledger.lock(RecordKey::Procurement(procurement_id))?;
        let _move_row = self.ledger.lock(RecordKey::Move(move_id))?;
        let procurement = self.load_procurement(procurement_id)?;

        let current = self.load_move(move_id)?;
        if current.status() == MoveStatus::Cancel {
            debug!(move_id = %move_id, "move already cancelled");
            return Ok(MoveOutcome {
                move_id,
                status: MoveStatus::Cancel,
                successor: current.next(),
                procurement_done: false,
            });
        }

        let mut t = Transition::default();
        t.work.expect(
            RecordKey::Procurement(procurement_id),
            ExpectedVersion::Exact(procurement.version()),
        );
        let successor = self.plan_cancel(&mut t, procurement.status(), move_id, &tree, &routes)?;
        drop(routes);
        drop(tree);
        self.finish(t)?;

        info!(move_id = %move_id, successor = ?successor, "move cancelled");
        Ok(MoveOutcome {
            move_id,
            status: MoveStatus::Cancel,
            successor,
            procurement_done: false,
        })
    }

    /// Add a move's cancellation (and its return move) to `t`.
    ///
    /// Callers hold the procurement and move rows and add the procurement's
    /// version expectation themselves.
    fn plan_cancel(
        &self,
        t: &mut Transition,
        procurement_status: ProcurementStatus,
        move_id: MoveId,
        tree: &LocationTree,
        routes: &RouteBook,
    ) -> Result<Option<MoveId>, EngineError> {
        let at = Utc::now();
        let mut mv = self.load_move(move_id)?;
        let detail = self.load_detail(mv.detail_id())?;
        let route = routes.get(mv.route_id())?;

        let plan = plan_after_cancel(&mv, route, tree, &detail, MoveId::generate(), at)?;
        let reserved = mv.status() == MoveStatus::Confirmed;
        let events = mv.handle(&MoveCommand::Cancel(CancelMove {
            move_id,
            procurement_status,
            successor: plan.as_ref().map(|p| p.id),
            occurred_at: at,
        }))?;

        t.work
            .expect(RecordKey::Move(move_id), ExpectedVersion::Exact(mv.version()));
        t.record(&mut mv, events)?;
        if reserved {
            t.cache_ops.extend(self.cache.release_ops(&mv));
        }
        t.work.put(mv.clone());

        let successor = match plan {
            Some(new) => Some(self.spawn(t, new, tree)?.id_typed()),
            None => None,
        };
        debug!(
            move_id = %move_id,
            item = %mv.item(),
            quantity = mv.quantity(),
            released = reserved,
            successor = ?successor,
            "move cancel planned"
        );
        Ok(successor)
    }

    /// Create a move inside `t`, confirming it when auto-confirm is on.
    fn spawn(
        &self,
        t: &mut Transition,
        new: NewMove,
        tree: &LocationTree,
    ) -> Result<Move, EngineError> {
        let at = new.occurred_at;
        let (mut mv, created) = Move::create(new)?;
        let move_id = mv.id_typed();
        t.announce(&mv, &created)?;

        if self.config.auto_confirm {
            let events = mv.handle(&MoveCommand::Confirm(ConfirmMove {
                move_id,
                source: tree.placement(mv.from_location())?,
                occurred_at: at,
            }))?;
            t.record(&mut mv, events)?;
            t.cache_ops.extend(self.cache.reserve_ops(&mv));
        }

        t.work
            .expect(RecordKey::Move(move_id), ExpectedVersion::Absent)
            .put(mv.clone());
        debug!(
            move_id = %move_id,
            previous = ?mv.previous(),
            from = %mv.from_location(),
            to = %mv.to_location(),
            direction = ?mv.direction(),
            "move spawned"
        );
        Ok(mv)
    }

    /// Commit, then cache, then publish.
    fn finish(&self, t: Transition) -> Result<(), EngineError> {
        let Transition {
            work,
            cache_ops,
            outgoing,
        } = t;
        self.ledger.commit(work)?;

        if !cache_ops.is_empty() {
            if let Err(e) = self.cache.apply(&cache_ops) {
                error!(error = %e, ops = cache_ops.len(), "cache batch failed after commit; sync to reconcile");
            }
        }

        for message in outgoing {
            let event_type = message.event_type().to_string();
            self.bus.publish(message).map_err(|e| {
                warn!(event_type = %event_type, "publish failed after commit");
                EngineError::Publish(format!("{event_type}: {e:?}"))
            })?;
        }
        Ok(())
    }
}
