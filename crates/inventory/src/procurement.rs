//! Procurement aggregate (demand header) and its ProcurementDetail lines.
//!
//! A procurement is `draft` while details are attached, `confirmed` once it is
//! allowed to spawn moves, and reaches `done` only when every move chain under
//! it has settled. `cancel` is reachable from `draft` and `confirmed`.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateRoot, DomainError, DomainResult, PartnerId, StateRegistry, WarehouseId,
};
use stockflow_events::Event;

use crate::item::ItemRef;
use crate::location::{LocationId, LocationTree};
use crate::movement::{Direction, MoveId, NewMove};
use crate::route::{Route, RouteId};

stockflow_core::aggregate_id!(
    /// Procurement identifier.
    ProcurementId
);

stockflow_core::aggregate_id!(
    /// Procurement detail (demand line) identifier.
    ProcurementDetailId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcurementStatus {
    Draft,
    Confirmed,
    Done,
    Cancel,
}

impl core::fmt::Display for ProcurementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ProcurementStatus::Draft => "draft",
            ProcurementStatus::Confirmed => "confirmed",
            ProcurementStatus::Done => "done",
            ProcurementStatus::Cancel => "cancel",
        })
    }
}

/// Aggregate root: Procurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procurement {
    id: ProcurementId,
    warehouse_id: WarehouseId,
    requester: PartnerId,
    status: ProcurementStatus,
    /// Procurements that must be `done` before this one leaves `draft`.
    prerequisites: Vec<ProcurementId>,
    details: Vec<ProcurementDetailId>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Procurement {
    /// Open a draft procurement (version 1).
    pub fn create(
        id: ProcurementId,
        warehouse_id: WarehouseId,
        requester: PartnerId,
        prerequisites: Vec<ProcurementId>,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<(Self, ProcurementEvent)> {
        if prerequisites.contains(&id) {
            return Err(DomainError::validation("a procurement cannot depend on itself"));
        }
        let mut prerequisites = prerequisites;
        prerequisites.sort();
        prerequisites.dedup();

        let procurement = Self {
            id,
            warehouse_id,
            requester,
            status: ProcurementStatus::Draft,
            prerequisites,
            details: Vec::new(),
            version: 1,
            created_at: occurred_at,
            updated_at: occurred_at,
        };
        let event = ProcurementEvent::ProcurementCreated(ProcurementCreated {
            procurement_id: id,
            warehouse_id,
            requester,
            prerequisites: procurement.prerequisites.clone(),
            occurred_at,
        });
        Ok((procurement, event))
    }

    pub fn id_typed(&self) -> ProcurementId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn requester(&self) -> PartnerId {
        self.requester
    }

    pub fn status(&self) -> ProcurementStatus {
        self.status
    }

    pub fn prerequisites(&self) -> &[ProcurementId] {
        &self.prerequisites
    }

    pub fn details(&self) -> &[ProcurementDetailId] {
        &self.details
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `open` (draft or confirmed) and `closed` (done or cancel).
    pub fn states() -> &'static StateRegistry<Procurement> {
        &PROCUREMENT_STATES
    }
}

static PROCUREMENT_STATES: LazyLock<StateRegistry<Procurement>> = LazyLock::new(|| {
    StateRegistry::new()
        .register("open", |p: &Procurement| {
            matches!(p.status, ProcurementStatus::Draft | ProcurementStatus::Confirmed)
        })
        .register("closed", |p: &Procurement| {
            matches!(p.status, ProcurementStatus::Done | ProcurementStatus::Cancel)
        })
});

impl AggregateRoot for Procurement {
    type Id = ProcurementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: attach an already-validated detail line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachDetail {
    pub procurement_id: ProcurementId,
    pub detail_id: ProcurementDetailId,
    pub item: ItemRef,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: allow the procurement to spawn moves.
///
/// `pending_prerequisites` lists the prerequisites the caller found not `done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmProcurement {
    pub procurement_id: ProcurementId,
    pub pending_prerequisites: Vec<ProcurementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelProcurement {
    pub procurement_id: ProcurementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: close the procurement after its last chain settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkProcurementDone {
    pub procurement_id: ProcurementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcurementCommand {
    AttachDetail(AttachDetail),
    Confirm(ConfirmProcurement),
    Cancel(CancelProcurement),
    MarkDone(MarkProcurementDone),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementCreated {
    pub procurement_id: ProcurementId,
    pub warehouse_id: WarehouseId,
    pub requester: PartnerId,
    pub prerequisites: Vec<ProcurementId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailAttached {
    pub procurement_id: ProcurementId,
    pub detail_id: ProcurementDetailId,
    pub item: ItemRef,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementConfirmed {
    pub procurement_id: ProcurementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementCancelled {
    pub procurement_id: ProcurementId,
    pub previous_status: ProcurementStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementDone {
    pub procurement_id: ProcurementId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcurementEvent {
    ProcurementCreated(ProcurementCreated),
    DetailAttached(DetailAttached),
    ProcurementConfirmed(ProcurementConfirmed),
    ProcurementCancelled(ProcurementCancelled),
    ProcurementDone(ProcurementDone),
}

impl Event for ProcurementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProcurementEvent::ProcurementCreated(_) => "stock.procurement.created",
            ProcurementEvent::DetailAttached(_) => "stock.procurement.detail_attached",
            ProcurementEvent::ProcurementConfirmed(_) => "stock.procurement.confirmed",
            ProcurementEvent::ProcurementCancelled(_) => "stock.procurement.cancelled",
            ProcurementEvent::ProcurementDone(_) => "stock.procurement.done",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProcurementEvent::ProcurementCreated(e) => e.occurred_at,
            ProcurementEvent::DetailAttached(e) => e.occurred_at,
            ProcurementEvent::ProcurementConfirmed(e) => e.occurred_at,
            ProcurementEvent::ProcurementCancelled(e) => e.occurred_at,
            ProcurementEvent::ProcurementDone(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Procurement {
    type Command = ProcurementCommand;
    type Event = ProcurementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProcurementEvent::ProcurementCreated(_) => return,
            ProcurementEvent::DetailAttached(e) => {
                self.details.push(e.detail_id);
                self.updated_at = e.occurred_at;
            }
            ProcurementEvent::ProcurementConfirmed(e) => {
                self.status = ProcurementStatus::Confirmed;
                self.updated_at = e.occurred_at;
            }
            ProcurementEvent::ProcurementCancelled(e) => {
                self.status = ProcurementStatus::Cancel;
                self.updated_at = e.occurred_at;
            }
            ProcurementEvent::ProcurementDone(e) => {
                self.status = ProcurementStatus::Done;
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProcurementCommand::AttachDetail(cmd) => {
                self.ensure_procurement_id(cmd.procurement_id)?;
                self.ensure_status(ProcurementStatus::Draft, "attach details to")?;
                if cmd.quantity <= 0 {
                    return Err(DomainError::validation("detail quantity must be positive"));
                }
                if self.details.contains(&cmd.detail_id) {
                    return Err(DomainError::conflict(format!(
                        "detail {} already attached",
                        cmd.detail_id
                    )));
                }
                Ok(vec![ProcurementEvent::DetailAttached(DetailAttached {
                    procurement_id: self.id,
                    detail_id: cmd.detail_id,
                    item: cmd.item,
                    quantity: cmd.quantity,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ProcurementCommand::Confirm(cmd) => {
                self.ensure_procurement_id(cmd.procurement_id)?;
                self.ensure_status(ProcurementStatus::Draft, "confirm")?;
                if self.details.is_empty() {
                    return Err(DomainError::state_guard(format!(
                        "procurement {} has no details",
                        self.id
                    )));
                }
                if let Some(pending) = cmd.pending_prerequisites.first() {
                    return Err(DomainError::state_guard(format!(
                        "prerequisite procurement {pending} is not done"
                    )));
                }
                Ok(vec![ProcurementEvent::ProcurementConfirmed(ProcurementConfirmed {
                    procurement_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ProcurementCommand::Cancel(cmd) => {
                self.ensure_procurement_id(cmd.procurement_id)?;
                if !matches!(
                    self.status,
                    ProcurementStatus::Draft | ProcurementStatus::Confirmed
                ) {
                    return Err(DomainError::state_guard(format!(
                        "cannot cancel procurement {} in status {}",
                        self.id, self.status
                    )));
                }
                Ok(vec![ProcurementEvent::ProcurementCancelled(ProcurementCancelled {
                    procurement_id: self.id,
                    previous_status: self.status,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ProcurementCommand::MarkDone(cmd) => {
                self.ensure_procurement_id(cmd.procurement_id)?;
                self.ensure_status(ProcurementStatus::Confirmed, "complete")?;
                Ok(vec![ProcurementEvent::ProcurementDone(ProcurementDone {
                    procurement_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl Procurement {
    fn ensure_procurement_id(&self, procurement_id: ProcurementId) -> DomainResult<()> {
        if self.id != procurement_id {
            return Err(DomainError::invariant("procurement_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, required: ProcurementStatus, action: &str) -> DomainResult<()> {
        if self.status != required {
            return Err(DomainError::state_guard(format!(
                "cannot {action} procurement {} in status {} (requires {required})",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// Input for [`ProcurementDetail::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProcurementDetail {
    pub id: ProcurementDetailId,
    pub procurement_id: ProcurementId,
    pub warehouse_id: WarehouseId,
    pub item: ItemRef,
    pub quantity: i64,
    pub route_id: RouteId,
    pub initial_location: Option<LocationId>,
    pub end_location: Option<LocationId>,
    pub direct_return: bool,
}

/// One demand line: an item and quantity travelling along one route.
///
/// Immutable once its first move has been spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementDetail {
    id: ProcurementDetailId,
    procurement_id: ProcurementId,
    warehouse_id: WarehouseId,
    item: ItemRef,
    quantity: i64,
    route_id: RouteId,
    initial_location: Option<LocationId>,
    end_location: Option<LocationId>,
    direct_return: bool,
    first_move: Option<MoveId>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProcurementDetail {
    pub fn new(new: NewProcurementDetail, at: DateTime<Utc>) -> DomainResult<Self> {
        if new.quantity <= 0 {
            return Err(DomainError::validation("detail quantity must be positive"));
        }
        Ok(Self {
            id: new.id,
            procurement_id: new.procurement_id,
            warehouse_id: new.warehouse_id,
            item: new.item,
            quantity: new.quantity,
            route_id: new.route_id,
            initial_location: new.initial_location,
            end_location: new.end_location,
            direct_return: new.direct_return,
            first_move: None,
            version: 1,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn id_typed(&self) -> ProcurementDetailId {
        self.id
    }

    pub fn procurement_id(&self) -> ProcurementId {
        self.procurement_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn item(&self) -> ItemRef {
        self.item
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn initial_location(&self) -> Option<LocationId> {
        self.initial_location
    }

    pub fn end_location(&self) -> Option<LocationId> {
        self.end_location
    }

    pub fn direct_return(&self) -> bool {
        self.direct_return
    }

    pub fn first_move(&self) -> Option<MoveId> {
        self.first_move
    }

    pub fn is_started(&self) -> bool {
        self.first_move.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Check the line against its governing route before it is attached.
    ///
    /// The explicit initial location must lie within the first waypoint and the
    /// explicit end location within the last one.
    pub fn validate_route(&self, route: &Route, tree: &LocationTree) -> DomainResult<()> {
        if route.id_typed() != self.route_id {
            return Err(DomainError::invariant("detail validated against a different route"));
        }
        if route.warehouse_id() != self.warehouse_id {
            return Err(DomainError::validation(format!(
                "route `{}` belongs to another warehouse",
                route.name()
            )));
        }
        let (Some(first), Some(last)) = (route.first(), route.last()) else {
            return Err(DomainError::configuration(format!(
                "route `{}` has no waypoints",
                route.name()
            )));
        };
        if first.id == last.id {
            return Err(DomainError::configuration(format!(
                "route `{}` needs at least two waypoints",
                route.name()
            )));
        }
        if let Some(initial) = self.initial_location {
            if !tree.is_within(initial, first.location)? {
                return Err(DomainError::validation(format!(
                    "initial location {initial} is not within the route's first waypoint"
                )));
            }
        }
        if let Some(end) = self.end_location {
            if !tree.is_within(end, last.location)? {
                return Err(DomainError::validation(format!(
                    "end location {end} is not within the route's last waypoint"
                )));
            }
        }
        Ok(())
    }

    pub fn set_quantity(&mut self, quantity: i64, at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_started() {
            return Err(DomainError::state_guard(format!(
                "detail {} already spawned a move",
                self.id
            )));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("detail quantity must be positive"));
        }
        self.quantity = quantity;
        self.version += 1;
        self.updated_at = at;
        Ok(())
    }

    /// Plan the first move of this line's chain.
    ///
    /// From the explicit initial location (or the first waypoint) to the second
    /// waypoint, or straight to the explicit end location on a two-waypoint route.
    pub fn plan_first_move(
        &self,
        procurement_status: ProcurementStatus,
        route: &Route,
        tree: &LocationTree,
        move_id: MoveId,
        at: DateTime<Utc>,
    ) -> DomainResult<NewMove> {
        if procurement_status != ProcurementStatus::Confirmed {
            return Err(DomainError::state_guard(format!(
                "procurement {} is {procurement_status}, expected confirmed",
                self.procurement_id
            )));
        }
        if self.is_started() {
            return Err(DomainError::state_guard(format!(
                "detail {} already spawned a move",
                self.id
            )));
        }
        if route.id_typed() != self.route_id {
            return Err(DomainError::invariant("detail planned against a different route"));
        }

        let first = route
            .next(None, false)?
            .ok_or_else(|| DomainError::configuration("route has no waypoints"))?;
        let second = route
            .next(Some(first.id), false)?
            .ok_or_else(|| DomainError::configuration("route needs at least two waypoints"))?;

        let from_location = self.initial_location.unwrap_or(first.location);
        let to_location = match self.end_location {
            Some(end) if route.settings().len() == 2 => end,
            _ => second.location,
        };

        Ok(NewMove {
            id: move_id,
            warehouse_id: self.warehouse_id,
            procurement_id: self.procurement_id,
            detail_id: self.id,
            item: self.item,
            route_id: self.route_id,
            from_location,
            from_zone: tree.require(from_location)?.zone(),
            to_location,
            to_zone: tree.require(to_location)?.zone(),
            from_setting: first.clone(),
            to_setting: second.clone(),
            quantity: self.quantity,
            direction: Direction::Forward,
            previous: None,
            occurred_at: at,
        })
    }

    pub fn mark_started(&mut self, move_id: MoveId, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(existing) = self.first_move {
            return Err(DomainError::state_guard(format!(
                "detail {} already started with move {existing}",
                self.id
            )));
        }
        self.first_move = Some(move_id);
        self.version += 1;
        self.updated_at = at;
        Ok(())
    }
}

impl AggregateRoot for ProcurementDetail {
    type Id = ProcurementDetailId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
