//! Routes: ordered, warehouse-scoped chains of zone waypoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, Entity, WarehouseId};

use crate::location::{Location, LocationId};
use crate::zone::ZoneKind;

stockflow_core::aggregate_id!(
    /// Route identifier.
    RouteId
);

stockflow_core::aggregate_id!(
    /// Route setting (waypoint) identifier.
    RouteSettingId
);

/// Transfer class implied by a route's first and last waypoint zones.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteType {
    pub from: ZoneKind,
    pub to: ZoneKind,
}

impl RouteType {
    pub const fn new(from: ZoneKind, to: ZoneKind) -> Self {
        Self { from, to }
    }
}

impl core::fmt::Display for RouteType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// One waypoint of a route.
///
/// A virtual target location admits any descendant; a leaf target must be
/// matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSetting {
    pub id: RouteSettingId,
    pub route_id: RouteId,
    pub location: LocationId,
    pub zone: ZoneKind,
    pub sequence: u32,
}

/// A named chain of waypoints, kept sorted by sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    id: RouteId,
    warehouse_id: WarehouseId,
    name: String,
    /// Rank among routes of the same type; `0` marks the warehouse default.
    sequence: u32,
    settings: Vec<RouteSetting>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Route {
    pub fn new(
        id: RouteId,
        warehouse_id: WarehouseId,
        name: impl Into<String>,
        sequence: u32,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("route name cannot be empty"));
        }
        Ok(Self {
            id,
            warehouse_id,
            name,
            sequence,
            settings: Vec::new(),
            created_at: at,
            updated_at: at,
        })
    }

    pub fn id_typed(&self) -> RouteId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn settings(&self) -> &[RouteSetting] {
        &self.settings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Append or insert a waypoint targeting `location`.
    pub fn add_setting(
        &mut self,
        location: &Location,
        sequence: u32,
        at: DateTime<Utc>,
    ) -> DomainResult<RouteSettingId> {
        if location.warehouse_id() != self.warehouse_id {
            return Err(DomainError::validation(format!(
                "location {} is outside the route's warehouse",
                location.id_typed()
            )));
        }
        if self.settings.iter().any(|s| s.sequence == sequence) {
            return Err(DomainError::validation(format!(
                "route `{}` already has a waypoint at sequence {sequence}",
                self.name
            )));
        }
        let id = RouteSettingId::generate();
        let pos = self.settings.partition_point(|s| s.sequence < sequence);
        self.settings.insert(
            pos,
            RouteSetting {
                id,
                route_id: self.id,
                location: location.id_typed(),
                zone: location.zone(),
                sequence,
            },
        );
        self.updated_at = at;
        Ok(id)
    }

    pub fn route_type(&self) -> Option<RouteType> {
        let first = self.settings.first()?;
        let last = self.settings.last()?;
        Some(RouteType::new(first.zone, last.zone))
    }

    pub fn first(&self) -> Option<&RouteSetting> {
        self.settings.first()
    }

    pub fn last(&self) -> Option<&RouteSetting> {
        self.settings.last()
    }

    pub fn setting(&self, id: RouteSettingId) -> DomainResult<&RouteSetting> {
        self.settings
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| DomainError::not_found(format!("route setting {id} on route {}", self.id)))
    }

    /// Waypoint after `current` (or before it when `reverse`).
    ///
    /// Without `current`, forward yields the first waypoint and reverse the last.
    pub fn next(
        &self,
        current: Option<RouteSettingId>,
        reverse: bool,
    ) -> DomainResult<Option<&RouteSetting>> {
        let Some(current) = current else {
            return Ok(if reverse { self.last() } else { self.first() });
        };
        let seq = self.setting(current)?.sequence;
        Ok(if reverse {
            self.settings.iter().rev().find(|s| s.sequence < seq)
        } else {
            self.settings.iter().find(|s| s.sequence > seq)
        })
    }
}

impl Entity for Route {
    type Id = RouteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Every configured route.
#[derive(Debug, Clone, Default)]
pub struct RouteBook {
    routes: Vec<Route>,
}

impl RouteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route: Route) -> DomainResult<RouteId> {
        if self.routes.iter().any(|r| r.id == route.id) {
            return Err(DomainError::conflict(format!("route {} already exists", route.id)));
        }
        let id = route.id;
        self.routes.push(route);
        Ok(id)
    }

    pub fn get(&self, id: RouteId) -> DomainResult<&Route> {
        self.routes
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::not_found(format!("route {id}")))
    }

    pub fn for_warehouse(&self, warehouse_id: WarehouseId) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(move |r| r.warehouse_id == warehouse_id)
    }

    /// The warehouse's canonical route for `route_type` (`sequence == 0`).
    pub fn default_route(
        &self,
        warehouse_id: WarehouseId,
        route_type: RouteType,
    ) -> DomainResult<&Route> {
        let mut candidates = self
            .for_warehouse(warehouse_id)
            .filter(|r| r.sequence == 0 && r.route_type() == Some(route_type));
        let first = candidates.next().ok_or_else(|| {
            DomainError::configuration(format!("no default route for {route_type}"))
        })?;
        if candidates.next().is_some() {
            return Err(DomainError::configuration(format!(
                "more than one default route for {route_type}"
            )));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Coordinate, LocationTree, NewLocation};
    use proptest::prelude::*;

    fn zones(tree: &mut LocationTree, wh: WarehouseId, kinds: &[ZoneKind]) -> Vec<LocationId> {
        let now = Utc::now();
        let root = tree
            .insert(
                NewLocation {
                    id: LocationId::generate(),
                    warehouse_id: wh,
                    name: "root".into(),
                    zone: ZoneKind::Root,
                    is_virtual: true,
                    parent: None,
                    coordinate: Coordinate::default(),
                },
                now,
            )
            .unwrap();
        kinds
            .iter()
            .map(|z| tree.insert(NewLocation::group(wh, root, *z, z.as_str()), now).unwrap())
            .collect()
    }

    fn produce_route(seq: u32) -> (LocationTree, Route) {
        let wh = WarehouseId::new();
        let mut tree = LocationTree::new();
        let kinds = [ZoneKind::Produce, ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock];
        let ids = zones(&mut tree, wh, &kinds);
        let mut route = Route::new(RouteId::generate(), wh, "produce", seq, Utc::now()).unwrap();
        for (n, id) in ids.iter().enumerate() {
            route.add_setting(tree.get(*id).unwrap(), n as u32, Utc::now()).unwrap();
        }
        (tree, route)
    }

    #[test]
    fn next_walks_forward_and_backward() {
        let (_, route) = produce_route(0);
        let s = route.settings();
        assert_eq!(route.next(None, false).unwrap().unwrap().id, s[0].id);
        assert_eq!(route.next(None, true).unwrap().unwrap().id, s[3].id);
        assert_eq!(route.next(Some(s[1].id), false).unwrap().unwrap().id, s[2].id);
        assert_eq!(route.next(Some(s[1].id), true).unwrap().unwrap().id, s[0].id);
        assert!(route.next(Some(s[3].id), false).unwrap().is_none());
        assert!(route.next(Some(s[0].id), true).unwrap().is_none());
    }

    #[test]
    fn route_type_comes_from_endpoints() {
        let (_, route) = produce_route(0);
        assert_eq!(route.route_type(), Some(RouteType::new(ZoneKind::Produce, ZoneKind::Stock)));
        assert_eq!(route.route_type().unwrap().to_string(), "produce-stock");
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let (tree, mut route) = produce_route(0);
        let any = tree.iter().find(|l| l.zone() == ZoneKind::Stock).unwrap();
        let err = route.add_setting(any, 2, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn out_of_order_settings_stay_sorted() {
        let (tree, mut route) = produce_route(0);
        let wait = tree.iter().find(|l| l.zone() == ZoneKind::Pack).unwrap();
        route.add_setting(wait, 10, Utc::now()).unwrap();
        let seqs: Vec<u32> = route.settings().iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 10]);
    }

    #[test]
    fn default_route_requires_exactly_one_candidate() {
        let (_, route) = produce_route(0);
        let wh = route.warehouse_id();
        let ty = route.route_type().unwrap();
        let mut book = RouteBook::new();

        let err = book.default_route(wh, ty).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(msg) if msg.contains("no default")));

        book.insert(route.clone()).unwrap();
        assert_eq!(book.default_route(wh, ty).unwrap().id_typed(), route.id_typed());

        let mut twin = route.clone();
        twin.id = RouteId::generate();
        book.insert(twin).unwrap();
        let err = book.default_route(wh, ty).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(msg) if msg.contains("more than one")));
    }

    #[test]
    fn non_default_rank_is_ignored() {
        let (_, route) = produce_route(1);
        let mut book = RouteBook::new();
        let (wh, ty) = (route.warehouse_id(), route.route_type().unwrap());
        book.insert(route).unwrap();
        assert!(book.default_route(wh, ty).is_err());
    }

    proptest! {
        /// Property: for an interior waypoint, stepping forward then backward
        /// returns to it.
        #[test]
        fn forward_then_reverse_is_identity(
            seqs in prop::collection::btree_set(0u32..1000, 3..12),
            pick in any::<prop::sample::Index>(),
        ) {
            let wh = WarehouseId::new();
            let mut tree = LocationTree::new();
            let stock = zones(&mut tree, wh, &[ZoneKind::Stock])[0];
            let mut route = Route::new(RouteId::generate(), wh, "r", 0, Utc::now()).unwrap();
            let loc = tree.get(stock).unwrap().clone();
            for seq in seqs {
                route.add_setting(&loc, seq, Utc::now()).unwrap();
            }
            let interior = &route.settings()[1..route.settings().len() - 1];
            let setting = &interior[pick.index(interior.len())];

            let forward = route.next(Some(setting.id), false).unwrap().unwrap();
            let back = route.next(Some(forward.id), true).unwrap().unwrap();
            prop_assert_eq!(back.id, setting.id);
        }
    }
}
