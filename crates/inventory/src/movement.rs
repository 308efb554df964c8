//! Move aggregate: one transfer of one item between two locations.
//!
//! `draft → confirmed → done`, with `cancel` reachable from either in-flight
//! state once the owning procurement is cancelled. Terminal moves are never
//! mutated again; the successor link is recorded by the terminal transition
//! itself.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateRoot, DomainError, StateRegistry, WarehouseId};
use stockflow_events::Event;

use crate::item::ItemRef;
use crate::location::{LocationId, Placement};
use crate::procurement::{ProcurementDetailId, ProcurementId, ProcurementStatus};
use crate::route::{RouteId, RouteSetting, RouteSettingId};
use crate::zone::ZoneKind;

stockflow_core::aggregate_id!(
    /// Move identifier.
    MoveId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Draft,
    Confirmed,
    Done,
    Cancel,
}

impl core::fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            MoveStatus::Draft => "draft",
            MoveStatus::Confirmed => "confirmed",
            MoveStatus::Done => "done",
            MoveStatus::Cancel => "cancel",
        })
    }
}

/// Which way along the route a move travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

/// Aggregate root: Move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    id: MoveId,
    warehouse_id: WarehouseId,
    procurement_id: ProcurementId,
    detail_id: ProcurementDetailId,
    item: ItemRef,
    route_id: RouteId,

    from_location: LocationId,
    from_zone: ZoneKind,
    /// Planned destination; may be virtual until `done` narrows it to a leaf.
    to_location: LocationId,
    to_zone: ZoneKind,

    from_setting: RouteSettingId,
    from_target: LocationId,
    to_setting: RouteSettingId,
    to_target: LocationId,

    quantity: i64,
    status: MoveStatus,
    direction: Direction,
    previous: Option<MoveId>,
    next: Option<MoveId>,

    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Input for [`Move::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMove {
    pub id: MoveId,
    pub warehouse_id: WarehouseId,
    pub procurement_id: ProcurementId,
    pub detail_id: ProcurementDetailId,
    pub item: ItemRef,
    pub route_id: RouteId,
    pub from_location: LocationId,
    pub from_zone: ZoneKind,
    pub to_location: LocationId,
    pub to_zone: ZoneKind,
    pub from_setting: RouteSetting,
    pub to_setting: RouteSetting,
    pub quantity: i64,
    pub direction: Direction,
    pub previous: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

impl Move {
    /// Build a draft move (version 1) and its creation event.
    pub fn create(new: NewMove) -> Result<(Self, MoveEvent), DomainError> {
        if new.quantity <= 0 {
            return Err(DomainError::validation("move quantity must be positive"));
        }
        if new.from_setting.route_id != new.route_id || new.to_setting.route_id != new.route_id {
            return Err(DomainError::invariant("route settings belong to another route"));
        }
        if new.from_setting.id == new.to_setting.id {
            return Err(DomainError::invariant("a move needs two distinct waypoints"));
        }

        let mv = Self {
            id: new.id,
            warehouse_id: new.warehouse_id,
            procurement_id: new.procurement_id,
            detail_id: new.detail_id,
            item: new.item,
            route_id: new.route_id,
            from_location: new.from_location,
            from_zone: new.from_zone,
            to_location: new.to_location,
            to_zone: new.to_zone,
            from_setting: new.from_setting.id,
            from_target: new.from_setting.location,
            to_setting: new.to_setting.id,
            to_target: new.to_setting.location,
            quantity: new.quantity,
            status: MoveStatus::Draft,
            direction: new.direction,
            previous: new.previous,
            next: None,
            version: 1,
            created_at: new.occurred_at,
            updated_at: new.occurred_at,
        };
        let event = MoveEvent::MoveCreated(MoveCreated {
            move_id: mv.id,
            warehouse_id: mv.warehouse_id,
            procurement_id: mv.procurement_id,
            item: mv.item,
            from_location: mv.from_location,
            to_location: mv.to_location,
            quantity: mv.quantity,
            direction: mv.direction,
            previous: mv.previous,
            occurred_at: new.occurred_at,
        });
        Ok((mv, event))
    }

    pub fn id_typed(&self) -> MoveId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn procurement_id(&self) -> ProcurementId {
        self.procurement_id
    }

    pub fn detail_id(&self) -> ProcurementDetailId {
        self.detail_id
    }

    pub fn item(&self) -> ItemRef {
        self.item
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn from_location(&self) -> LocationId {
        self.from_location
    }

    pub fn from_zone(&self) -> ZoneKind {
        self.from_zone
    }

    pub fn to_location(&self) -> LocationId {
        self.to_location
    }

    pub fn to_zone(&self) -> ZoneKind {
        self.to_zone
    }

    pub fn from_setting(&self) -> RouteSettingId {
        self.from_setting
    }

    pub fn to_setting(&self) -> RouteSettingId {
        self.to_setting
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn status(&self) -> MoveStatus {
        self.status
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn previous(&self) -> Option<MoveId> {
        self.previous
    }

    pub fn next(&self) -> Option<MoveId> {
        self.next
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MoveStatus::Done | MoveStatus::Cancel)
    }

    /// Named states: `active` (`in_transit`), `terminal` (`settled`, `cancelled`).
    pub fn states() -> &'static StateRegistry<Move> {
        &MOVE_STATES
    }
}

static MOVE_STATES: LazyLock<StateRegistry<Move>> = LazyLock::new(|| {
    StateRegistry::new()
        .register("active", |m: &Move| !m.is_terminal())
        .register_child("in_transit", "active", |m: &Move| m.status == MoveStatus::Confirmed)
        .register("terminal", |m: &Move| m.is_terminal())
        .register_child("settled", "terminal", |m: &Move| m.status == MoveStatus::Done)
        .register_child("cancelled", "terminal", |m: &Move| m.status == MoveStatus::Cancel)
});

impl AggregateRoot for Move {
    type Id = MoveId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: reserve the quantity at the source.
///
/// `source` is the tree placement of the move's `from_location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMove {
    pub move_id: MoveId,
    pub source: Placement,
    pub occurred_at: DateTime<Utc>,
}

/// Command: settle the transfer at a concrete destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMove {
    pub move_id: MoveId,
    pub destination: Placement,
    pub successor: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: abandon an in-flight move of a cancelled procurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMove {
    pub move_id: MoveId,
    pub procurement_status: ProcurementStatus,
    pub successor: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveCommand {
    Confirm(ConfirmMove),
    Complete(CompleteMove),
    Cancel(CancelMove),
}

/// Event: MoveCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCreated {
    pub move_id: MoveId,
    pub warehouse_id: WarehouseId,
    pub procurement_id: ProcurementId,
    pub item: ItemRef,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub quantity: i64,
    pub direction: Direction,
    pub previous: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoveConfirmed (quantity reserved at the source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveConfirmed {
    pub move_id: MoveId,
    pub warehouse_id: WarehouseId,
    pub item: ItemRef,
    pub from_location: LocationId,
    pub from_zone: ZoneKind,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoveDone (quantity settled at the destination).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDone {
    pub move_id: MoveId,
    pub warehouse_id: WarehouseId,
    pub item: ItemRef,
    pub from_location: LocationId,
    pub from_zone: ZoneKind,
    pub to_location: LocationId,
    pub to_zone: ZoneKind,
    pub quantity: i64,
    pub successor: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MoveCancelled. `released` tells whether a reservation existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCancelled {
    pub move_id: MoveId,
    pub warehouse_id: WarehouseId,
    pub item: ItemRef,
    pub from_location: LocationId,
    pub from_zone: ZoneKind,
    pub quantity: i64,
    pub released: bool,
    pub successor: Option<MoveId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveEvent {
    MoveCreated(MoveCreated),
    MoveConfirmed(MoveConfirmed),
    MoveDone(MoveDone),
    MoveCancelled(MoveCancelled),
}

impl Event for MoveEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MoveEvent::MoveCreated(_) => "stock.move.created",
            MoveEvent::MoveConfirmed(_) => "stock.move.confirmed",
            MoveEvent::MoveDone(_) => "stock.move.done",
            MoveEvent::MoveCancelled(_) => "stock.move.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MoveEvent::MoveCreated(e) => e.occurred_at,
            MoveEvent::MoveConfirmed(e) => e.occurred_at,
            MoveEvent::MoveDone(e) => e.occurred_at,
            MoveEvent::MoveCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Move {
    type Command = MoveCommand;
    type Event = MoveEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            // Creation goes through `Move::create`, which already yields version 1.
            MoveEvent::MoveCreated(_) => return,
            MoveEvent::MoveConfirmed(e) => {
                self.status = MoveStatus::Confirmed;
                self.updated_at = e.occurred_at;
            }
            MoveEvent::MoveDone(e) => {
                self.status = MoveStatus::Done;
                self.to_location = e.to_location;
                self.to_zone = e.to_zone;
                self.next = e.successor;
                self.updated_at = e.occurred_at;
            }
            MoveEvent::MoveCancelled(e) => {
                self.status = MoveStatus::Cancel;
                self.next = e.successor;
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MoveCommand::Confirm(cmd) => self.handle_confirm(cmd),
            MoveCommand::Complete(cmd) => self.handle_complete(cmd),
            MoveCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Move {
    fn ensure_move_id(&self, move_id: MoveId) -> Result<(), DomainError> {
        if self.id != move_id {
            return Err(DomainError::invariant("move_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[MoveStatus]) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        let expected: Vec<String> = allowed.iter().map(ToString::to_string).collect();
        Err(DomainError::state_guard(format!(
            "move {} is {}, expected {}",
            self.id,
            self.status,
            expected.join(" or ")
        )))
    }

    fn handle_confirm(&self, cmd: &ConfirmMove) -> Result<Vec<MoveEvent>, DomainError> {
        self.ensure_move_id(cmd.move_id)?;
        self.ensure_status(&[MoveStatus::Draft])?;

        if cmd.source.location != self.from_location {
            return Err(DomainError::state_guard(format!(
                "source placement {} does not describe from location {}",
                cmd.source.location, self.from_location
            )));
        }
        if !cmd.source.is_within(self.from_target) {
            return Err(DomainError::state_guard(format!(
                "from location {} is not within route setting location {}",
                self.from_location, self.from_target
            )));
        }

        Ok(vec![MoveEvent::MoveConfirmed(MoveConfirmed {
            move_id: self.id,
            warehouse_id: self.warehouse_id,
            item: self.item,
            from_location: self.from_location,
            from_zone: self.from_zone,
            quantity: self.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteMove) -> Result<Vec<MoveEvent>, DomainError> {
        self.ensure_move_id(cmd.move_id)?;
        self.ensure_status(&[MoveStatus::Confirmed])?;

        let dest = &cmd.destination;
        if dest.is_virtual {
            return Err(DomainError::state_guard(format!(
                "destination {} is virtual; a concrete location is required",
                dest.location
            )));
        }
        if !dest.is_within(self.to_location) || !dest.is_within(self.to_target) {
            return Err(DomainError::state_guard(format!(
                "destination {} is not within planned location {} of route setting {}",
                dest.location, self.to_location, self.to_setting
            )));
        }

        Ok(vec![MoveEvent::MoveDone(MoveDone {
            move_id: self.id,
            warehouse_id: self.warehouse_id,
            item: self.item,
            from_location: self.from_location,
            from_zone: self.from_zone,
            to_location: dest.location,
            to_zone: dest.zone,
            quantity: self.quantity,
            successor: cmd.successor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelMove) -> Result<Vec<MoveEvent>, DomainError> {
        self.ensure_move_id(cmd.move_id)?;
        self.ensure_status(&[MoveStatus::Draft, MoveStatus::Confirmed])?;

        if cmd.procurement_status != ProcurementStatus::Cancel {
            return Err(DomainError::state_guard(format!(
                "move {} can only be cancelled once its procurement is cancelled (procurement is {})",
                self.id, cmd.procurement_status
            )));
        }

        Ok(vec![MoveEvent::MoveCancelled(MoveCancelled {
            move_id: self.id,
            warehouse_id: self.warehouse_id,
            item: self.item,
            from_location: self.from_location,
            from_zone: self.from_zone,
            quantity: self.quantity,
            released: self.status == MoveStatus::Confirmed,
            successor: cmd.successor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Ids {
        route: RouteId,
        from_target: LocationId,
        from_leaf: LocationId,
        to_target: LocationId,
        to_leaf: LocationId,
        other: LocationId,
    }

    fn ids() -> Ids {
        Ids {
            route: RouteId::generate(),
            from_target: LocationId::generate(),
            from_leaf: LocationId::generate(),
            to_target: LocationId::generate(),
            to_leaf: LocationId::generate(),
            other: LocationId::generate(),
        }
    }

    fn setting(route: RouteId, location: LocationId, zone: ZoneKind, sequence: u32) -> RouteSetting {
        RouteSetting {
            id: RouteSettingId::generate(),
            route_id: route,
            location,
            zone,
            sequence,
        }
    }

    fn draft(ids: &Ids) -> Move {
        let (mv, _) = Move::create(NewMove {
            id: MoveId::generate(),
            warehouse_id: WarehouseId::new(),
            procurement_id: ProcurementId::generate(),
            detail_id: ProcurementDetailId::generate(),
            item: ItemRef::Product(Uuid::now_v7()),
            route_id: ids.route,
            from_location: ids.from_leaf,
            from_zone: ZoneKind::Stock,
            to_location: ids.to_target,
            to_zone: ZoneKind::Pack,
            from_setting: setting(ids.route, ids.from_target, ZoneKind::Stock, 0),
            to_setting: setting(ids.route, ids.to_target, ZoneKind::Pack, 1),
            quantity: 5,
            direction: Direction::Forward,
            previous: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        mv
    }

    fn placement(location: LocationId, parent: LocationId, zone: ZoneKind, is_virtual: bool) -> Placement {
        Placement {
            location,
            zone,
            is_virtual,
            lineage: vec![parent, location],
        }
    }

    fn run(mv: &mut Move, cmd: MoveCommand) -> Result<(), DomainError> {
        let events = mv.handle(&cmd)?;
        for e in &events {
            mv.apply(e);
        }
        Ok(())
    }

    fn confirm(ids: &Ids, mv: &mut Move) -> Result<(), DomainError> {
        let cmd = MoveCommand::Confirm(ConfirmMove {
            move_id: mv.id_typed(),
            source: placement(ids.from_leaf, ids.from_target, ZoneKind::Stock, false),
            occurred_at: Utc::now(),
        });
        run(mv, cmd)
    }

    #[test]
    fn create_rejects_non_positive_quantity() {
        let ids = ids();
        let mut new = NewMove {
            id: MoveId::generate(),
            warehouse_id: WarehouseId::new(),
            procurement_id: ProcurementId::generate(),
            detail_id: ProcurementDetailId::generate(),
            item: ItemRef::Package(Uuid::now_v7()),
            route_id: ids.route,
            from_location: ids.from_leaf,
            from_zone: ZoneKind::Stock,
            to_location: ids.to_target,
            to_zone: ZoneKind::Pack,
            from_setting: setting(ids.route, ids.from_target, ZoneKind::Stock, 0),
            to_setting: setting(ids.route, ids.to_target, ZoneKind::Pack, 1),
            quantity: 0,
            direction: Direction::Forward,
            previous: None,
            occurred_at: Utc::now(),
        };
        assert!(matches!(Move::create(new.clone()), Err(DomainError::Validation(_))));
        new.quantity = 1;
        new.to_setting = new.from_setting.clone();
        assert!(matches!(Move::create(new), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn confirm_then_complete_records_destination() {
        let ids = ids();
        let mut mv = draft(&ids);
        let move_id = mv.id_typed();
        confirm(&ids, &mut mv).unwrap();
        assert_eq!(mv.status(), MoveStatus::Confirmed);

        let successor = MoveId::generate();
        run(
            &mut mv,
            MoveCommand::Complete(CompleteMove {
                move_id,
                destination: placement(ids.to_leaf, ids.to_target, ZoneKind::Pack, false),
                successor: Some(successor),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(mv.status(), MoveStatus::Done);
        assert_eq!(mv.to_location(), ids.to_leaf);
        assert_eq!(mv.next(), Some(successor));
        assert_eq!(mv.version(), 3);
    }

    #[test]
    fn confirm_outside_route_setting_is_a_state_guard() {
        let ids = ids();
        let mut mv = draft(&ids);
        let move_id = mv.id_typed();
        let err = run(
            &mut mv,
            MoveCommand::Confirm(ConfirmMove {
                move_id,
                source: placement(ids.from_leaf, ids.other, ZoneKind::Stock, false),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(err.is_state_guard());
        assert_eq!(mv.status(), MoveStatus::Draft);
    }

    #[test]
    fn complete_requires_concrete_destination_inside_target() {
        let ids = ids();
        let mut mv = draft(&ids);
        let move_id = mv.id_typed();
        confirm(&ids, &mut mv).unwrap();

        let virtual_dest = Placement {
            location: ids.to_target,
            zone: ZoneKind::Pack,
            is_virtual: true,
            lineage: vec![ids.to_target],
        };
        let err = run(
            &mut mv,
            MoveCommand::Complete(CompleteMove {
                move_id,
                destination: virtual_dest,
                successor: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::StateGuard(msg) if msg.contains("virtual")));

        let err = run(
            &mut mv,
            MoveCommand::Complete(CompleteMove {
                move_id,
                destination: placement(ids.to_leaf, ids.other, ZoneKind::Pack, false),
                successor: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(err.is_state_guard());
    }

    #[test]
    fn done_before_confirm_is_a_state_guard() {
        let ids = ids();
        let mut mv = draft(&ids);
        let move_id = mv.id_typed();
        let err = run(
            &mut mv,
            MoveCommand::Complete(CompleteMove {
                move_id,
                destination: placement(ids.to_leaf, ids.to_target, ZoneKind::Pack, false),
                successor: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::StateGuard(msg) if msg.contains("expected confirmed")));
    }

    #[test]
    fn cancel_needs_cancelled_procurement_and_reports_release() {
        let ids = ids();
        let mut mv = draft(&ids);
        confirm(&ids, &mut mv).unwrap();

        let move_id = mv.id_typed();
        let cancel = move |status| {
            MoveCommand::Cancel(CancelMove {
                move_id,
                procurement_status: status,
                successor: None,
                occurred_at: Utc::now(),
            })
        };
        assert!(mv.handle(&cancel(ProcurementStatus::Confirmed)).unwrap_err().is_state_guard());

        let events = mv.handle(&cancel(ProcurementStatus::Cancel)).unwrap();
        assert_eq!(events[0].event_type(), "stock.move.cancelled");
        assert_eq!(events[0].aggregate_kind(), "move");
        match &events[0] {
            MoveEvent::MoveCancelled(e) => assert!(e.released),
            other => panic!("unexpected event {other:?}"),
        }
        mv.apply(&events[0]);
        assert!(Move::states().is("cancelled", &mv).unwrap());

        // Terminal: nothing else applies.
        let again = mv.handle(&cancel(ProcurementStatus::Cancel)).unwrap_err();
        assert!(again.is_state_guard());
    }

    #[test]
    fn state_registry_tracks_lifecycle() {
        let ids = ids();
        let mut mv = draft(&ids);
        assert_eq!(Move::states().states_of(&mv), vec!["active"]);
        confirm(&ids, &mut mv).unwrap();
        assert_eq!(Move::states().states_of(&mv), vec!["active", "in_transit"]);
    }
}
