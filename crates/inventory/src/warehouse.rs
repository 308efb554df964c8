//! Warehouse provisioning.
//!
//! Called explicitly by the service layer when a warehouse is registered. It
//! lays down the root node, one virtual node per zone kind and the default
//! route for each standard transfer class.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, WarehouseId};

use crate::location::{Coordinate, LocationId, LocationTree, NewLocation};
use crate::route::{Route, RouteBook, RouteId, RouteType};
use crate::zone::ZoneKind;

/// Default routes created at `sequence = 0`, as waypoint zone chains.
pub const DEFAULT_ROUTES: &[(&str, &[ZoneKind])] = &[
    ("receive from supplier", &[ZoneKind::Supplier, ZoneKind::Stock]),
    (
        "deliver to customer",
        &[
            ZoneKind::Stock,
            ZoneKind::Pick,
            ZoneKind::Pack,
            ZoneKind::Deliver,
            ZoneKind::Customer,
        ],
    ),
    (
        "receive from production",
        &[ZoneKind::Produce, ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock],
    ),
    (
        "customer return",
        &[ZoneKind::Customer, ZoneKind::Check, ZoneKind::Stock],
    ),
    ("initial inventory", &[ZoneKind::Initial, ZoneKind::Stock]),
    ("scrap", &[ZoneKind::Stock, ZoneKind::Scrap]),
    ("send to repair", &[ZoneKind::Stock, ZoneKind::Repair]),
    ("back from repair", &[ZoneKind::Repair, ZoneKind::Stock]),
];

/// Everything [`provision_warehouse`] created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedWarehouse {
    pub warehouse_id: WarehouseId,
    pub root: LocationId,
    pub zones: BTreeMap<ZoneKind, LocationId>,
    pub routes: BTreeMap<RouteType, RouteId>,
}

impl ProvisionedWarehouse {
    pub fn zone(&self, zone: ZoneKind) -> DomainResult<LocationId> {
        self.zones
            .get(&zone)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("zone node `{zone}`")))
    }

    pub fn route(&self, route_type: RouteType) -> DomainResult<RouteId> {
        self.routes
            .get(&route_type)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("route {route_type}")))
    }
}

/// Bootstrap a warehouse's locations and default routes.
///
/// Fails with `Conflict` when the warehouse already has a root.
pub fn provision_warehouse(
    tree: &mut LocationTree,
    routes: &mut RouteBook,
    warehouse_id: WarehouseId,
    name: &str,
    at: DateTime<Utc>,
) -> DomainResult<ProvisionedWarehouse> {
    if tree.root_of(warehouse_id).is_some() {
        return Err(DomainError::conflict(format!(
            "warehouse {warehouse_id} is already provisioned"
        )));
    }

    // Build into copies so a failure leaves the caller's state untouched.
    let mut staged_tree = tree.clone();
    let mut staged_routes = routes.clone();

    let root = staged_tree.insert(
        NewLocation {
            id: LocationId::generate(),
            warehouse_id,
            name: name.to_string(),
            zone: ZoneKind::Root,
            is_virtual: true,
            parent: None,
            coordinate: Coordinate::default(),
        },
        at,
    )?;

    let mut zones = BTreeMap::new();
    for zone in ZoneKind::PROVISIONED {
        let id = staged_tree.insert(
            NewLocation::group(warehouse_id, root, zone, format!("{name}/{zone}")),
            at,
        )?;
        zones.insert(zone, id);
    }

    let mut created = BTreeMap::new();
    for (route_name, chain) in DEFAULT_ROUTES {
        let mut route = Route::new(RouteId::generate(), warehouse_id, *route_name, 0, at)?;
        for (seq, zone) in chain.iter().enumerate() {
            let node = zones
                .get(zone)
                .copied()
                .ok_or_else(|| DomainError::configuration(format!("zone `{zone}` not provisioned")))?;
            route.add_setting(staged_tree.require(node)?, seq as u32, at)?;
        }
        let route_type = route
            .route_type()
            .ok_or_else(|| DomainError::configuration(format!("route `{route_name}` is empty")))?;
        created.insert(route_type, staged_routes.insert(route)?);
    }

    *tree = staged_tree;
    *routes = staged_routes;

    Ok(ProvisionedWarehouse {
        warehouse_id,
        root,
        zones,
        routes: created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioned() -> (LocationTree, RouteBook, ProvisionedWarehouse) {
        let mut tree = LocationTree::new();
        let mut routes = RouteBook::new();
        let wh = provision_warehouse(&mut tree, &mut routes, WarehouseId::new(), "main", Utc::now())
            .unwrap();
        (tree, routes, wh)
    }

    #[test]
    fn creates_root_and_one_node_per_zone() {
        let (tree, _, wh) = provisioned();
        assert_eq!(tree.len(), 1 + ZoneKind::PROVISIONED.len());
        let children = tree.children(wh.root).unwrap();
        assert_eq!(children.len(), ZoneKind::PROVISIONED.len());
        assert!(children.iter().all(|c| c.is_virtual()));
        assert_eq!(
            tree.zone_node(wh.warehouse_id, ZoneKind::Pack).map(|l| l.id_typed()),
            Some(wh.zone(ZoneKind::Pack).unwrap())
        );
    }

    #[test]
    fn every_default_route_resolves() {
        let (_, routes, wh) = provisioned();
        assert_eq!(wh.routes.len(), DEFAULT_ROUTES.len());
        let produce = RouteType::new(ZoneKind::Produce, ZoneKind::Stock);
        let route = routes.default_route(wh.warehouse_id, produce).unwrap();
        assert_eq!(route.id_typed(), wh.route(produce).unwrap());
        let zones: Vec<_> = route.settings().iter().map(|s| s.zone).collect();
        assert_eq!(
            zones,
            vec![ZoneKind::Produce, ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock]
        );
    }

    #[test]
    fn provisioning_twice_is_a_conflict() {
        let mut tree = LocationTree::new();
        let mut routes = RouteBook::new();
        let id = WarehouseId::new();
        provision_warehouse(&mut tree, &mut routes, id, "main", Utc::now()).unwrap();
        let err = provision_warehouse(&mut tree, &mut routes, id, "again", Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(routes.for_warehouse(id).count(), DEFAULT_ROUTES.len());
    }

    #[test]
    fn warehouses_are_isolated() {
        let mut tree = LocationTree::new();
        let mut routes = RouteBook::new();
        let a = provision_warehouse(&mut tree, &mut routes, WarehouseId::new(), "a", Utc::now()).unwrap();
        let b = provision_warehouse(&mut tree, &mut routes, WarehouseId::new(), "b", Utc::now()).unwrap();
        assert_eq!(tree.roots().len(), 2);
        let stock_to_scrap = RouteType::new(ZoneKind::Stock, ZoneKind::Scrap);
        assert_ne!(a.route(stock_to_scrap).unwrap(), b.route(stock_to_scrap).unwrap());
        assert!(!tree.is_within(a.zone(ZoneKind::Stock).unwrap(), b.root).unwrap());
    }
}
