//! Inventory movement domain.
//!
//! Pure domain logic for the location tree, routes, moves and procurements
//! (no IO, no storage). Infrastructure composes these pieces in
//! `stockflow-infra`.

pub mod chain;
pub mod item;
pub mod location;
pub mod movement;
pub mod procurement;
pub mod route;
pub mod warehouse;
pub mod zone;

pub use chain::{next_waypoint, plan_after_cancel, plan_after_done};
pub use item::ItemRef;
pub use location::{Coordinate, Location, LocationId, LocationTree, NewLocation, Placement};
pub use movement::{
    CancelMove, CompleteMove, ConfirmMove, Direction, Move, MoveCancelled, MoveCommand,
    MoveConfirmed, MoveCreated, MoveDone, MoveEvent, MoveId, MoveStatus, NewMove,
};
pub use procurement::{
    AttachDetail, CancelProcurement, ConfirmProcurement, DetailAttached, MarkProcurementDone,
    NewProcurementDetail, Procurement, ProcurementCancelled, ProcurementCommand,
    ProcurementConfirmed, ProcurementCreated, ProcurementDetail, ProcurementDetailId,
    ProcurementDone, ProcurementEvent, ProcurementId, ProcurementStatus,
};
pub use route::{Route, RouteBook, RouteId, RouteSetting, RouteSettingId, RouteType};
pub use warehouse::{DEFAULT_ROUTES, ProvisionedWarehouse, provision_warehouse};
pub use zone::{ZoneKind, ZoneSet};
