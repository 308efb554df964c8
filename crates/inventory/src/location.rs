//! Location tree: a per-warehouse hierarchy kept in a flat arena.
//!
//! Every node stores its ancestor ids (root first) instead of a rendered path
//! string, so descendant queries are prefix matches on that list and
//! reparenting rewrites prefixes rather than substrings.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult, Entity, StateRegistry, ValueObject, WarehouseId};

use crate::zone::ZoneKind;

stockflow_core::aggregate_id!(
    /// Location identifier.
    LocationId
);

/// Physical coordinate triple (aisle / shelf / bin style).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ValueObject for Coordinate {}

/// A node of the location tree.
///
/// Virtual nodes aggregate their descendants and are the only nodes allowed to
/// have children; leaves hold quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    id: LocationId,
    warehouse_id: WarehouseId,
    name: String,
    zone: ZoneKind,
    is_virtual: bool,
    parent: Option<LocationId>,
    path: Vec<LocationId>,
    coordinate: Coordinate,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Location {
    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn zone(&self) -> ZoneKind {
        self.zone
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn parent(&self) -> Option<LocationId> {
        self.parent
    }

    /// Ancestor ids, root first. Empty for a warehouse root.
    pub fn path(&self) -> &[LocationId] {
        &self.path
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Rendered materialized index: empty for a root, `-<root>-<parent>-` otherwise.
    pub fn index_string(&self) -> String {
        if self.path.is_empty() {
            return String::new();
        }
        let mut out = String::from("-");
        for id in &self.path {
            out.push_str(&id.to_string());
            out.push('-');
        }
        out
    }

    fn subtree_prefix(&self) -> Vec<LocationId> {
        let mut prefix = self.path.clone();
        prefix.push(self.id);
        prefix
    }

    /// Named states: `virtual`, `leaf`, `root`.
    pub fn states() -> &'static StateRegistry<Location> {
        &LOCATION_STATES
    }
}

static LOCATION_STATES: LazyLock<StateRegistry<Location>> = LazyLock::new(|| {
    StateRegistry::new()
        .register("virtual", |l: &Location| l.is_virtual)
        .register("leaf", |l: &Location| !l.is_virtual)
        .register_child("root", "virtual", |l: &Location| {
            l.parent.is_none() && l.path.is_empty()
        })
});

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for [`LocationTree::insert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocation {
    pub id: LocationId,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub zone: ZoneKind,
    pub is_virtual: bool,
    pub parent: Option<LocationId>,
    pub coordinate: Coordinate,
}

impl NewLocation {
    /// A virtual aggregation node under `parent`.
    pub fn group(
        warehouse_id: WarehouseId,
        parent: LocationId,
        zone: ZoneKind,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: LocationId::generate(),
            warehouse_id,
            name: name.into(),
            zone,
            is_virtual: true,
            parent: Some(parent),
            coordinate: Coordinate::default(),
        }
    }

    /// A concrete, quantity-holding leaf under `parent`.
    pub fn bin(
        warehouse_id: WarehouseId,
        parent: LocationId,
        zone: ZoneKind,
        name: impl Into<String>,
        coordinate: Coordinate,
    ) -> Self {
        Self {
            id: LocationId::generate(),
            warehouse_id,
            name: name.into(),
            zone,
            is_virtual: false,
            parent: Some(parent),
            coordinate,
        }
    }
}

/// Snapshot of where a location sits in the tree, handed to aggregates so
/// their guards stay pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub location: LocationId,
    pub zone: ZoneKind,
    pub is_virtual: bool,
    /// Ancestors root first, then the location itself.
    pub lineage: Vec<LocationId>,
}

impl Placement {
    /// True when this location is `target` or one of its descendants.
    pub fn is_within(&self, target: LocationId) -> bool {
        self.lineage.contains(&target)
    }
}

impl ValueObject for Placement {}

/// Arena of all locations, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct LocationTree {
    nodes: BTreeMap<LocationId, Location>,
}

impl LocationTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: LocationId) -> Option<&Location> {
        self.nodes.get(&id)
    }

    pub fn require(&self, id: LocationId) -> DomainResult<&Location> {
        self.nodes
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.nodes.values()
    }

    /// Add a node. A node without a parent is a warehouse root and must be a
    /// virtual `root`-zone node; each warehouse has exactly one.
    pub fn insert(&mut self, new: NewLocation, at: DateTime<Utc>) -> DomainResult<LocationId> {
        if new.name.trim().is_empty() {
            return Err(DomainError::validation("location name cannot be empty"));
        }
        if self.nodes.contains_key(&new.id) {
            return Err(DomainError::conflict(format!("location {} already exists", new.id)));
        }

        let path = match new.parent {
            None => {
                if new.zone != ZoneKind::Root || !new.is_virtual {
                    return Err(DomainError::validation(
                        "a location without parent must be a virtual root-zone node",
                    ));
                }
                if self.root_of(new.warehouse_id).is_some() {
                    return Err(DomainError::conflict("warehouse already has a root location"));
                }
                Vec::new()
            }
            Some(parent_id) => {
                let parent = self.check_parent(new.warehouse_id, new.zone, parent_id)?;
                parent.subtree_prefix()
            }
        };

        let id = new.id;
        self.nodes.insert(
            id,
            Location {
                id,
                warehouse_id: new.warehouse_id,
                name: new.name,
                zone: new.zone,
                is_virtual: new.is_virtual,
                parent: new.parent,
                path,
                coordinate: new.coordinate,
                created_at: at,
                updated_at: at,
            },
        );
        Ok(id)
    }

    /// Parents must be virtual, in the same warehouse and of the same zone
    /// kind. A warehouse root accepts children of any zone kind.
    fn check_parent(
        &self,
        warehouse_id: WarehouseId,
        zone: ZoneKind,
        parent_id: LocationId,
    ) -> DomainResult<&Location> {
        let parent = self.require(parent_id)?;
        if !parent.is_virtual {
            return Err(DomainError::validation(format!(
                "parent location {parent_id} is not virtual"
            )));
        }
        if parent.warehouse_id != warehouse_id {
            return Err(DomainError::validation(format!(
                "parent location {parent_id} belongs to another warehouse"
            )));
        }
        if parent.zone != ZoneKind::Root && parent.zone != zone {
            return Err(DomainError::validation(format!(
                "parent location {parent_id} is a {} zone, child is {zone}",
                parent.zone
            )));
        }
        Ok(parent)
    }

    /// Move `id` (and its whole subtree) under `new_parent`.
    ///
    /// Every node whose path starts with the old prefix gets that prefix
    /// replaced by the new one.
    pub fn reparent(
        &mut self,
        id: LocationId,
        new_parent: LocationId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let node = self.require(id)?;
        if node.parent.is_none() {
            return Err(DomainError::validation("a warehouse root cannot be reparented"));
        }
        if new_parent == id || self.require(new_parent)?.path.contains(&id) {
            return Err(DomainError::validation(format!(
                "cannot move location {id} under its own subtree"
            )));
        }
        let parent = self.check_parent(node.warehouse_id, node.zone, new_parent)?;

        let old_prefix = node.subtree_prefix();
        let old_len = node.path.len();
        let new_path = parent.subtree_prefix();

        for loc in self.nodes.values_mut() {
            if loc.id == id {
                loc.path = new_path.clone();
                loc.parent = Some(new_parent);
                loc.updated_at = at;
            } else if loc.path.starts_with(&old_prefix) {
                let mut rewritten = new_path.clone();
                rewritten.extend_from_slice(&loc.path[old_len..]);
                loc.path = rewritten;
                loc.updated_at = at;
            }
        }
        Ok(())
    }

    /// The root of `warehouse_id`, if provisioned.
    pub fn root_of(&self, warehouse_id: WarehouseId) -> Option<&Location> {
        self.nodes
            .values()
            .find(|l| l.warehouse_id == warehouse_id && l.parent.is_none() && l.path.is_empty())
    }

    /// All warehouse roots.
    pub fn roots(&self) -> Vec<&Location> {
        self.nodes
            .values()
            .filter(|l| l.parent.is_none() && l.path.is_empty())
            .collect()
    }

    /// The canonical zone node of a warehouse: the root's child of that zone.
    pub fn zone_node(&self, warehouse_id: WarehouseId, zone: ZoneKind) -> Option<&Location> {
        let root = self.root_of(warehouse_id)?;
        self.nodes
            .values()
            .find(|l| l.parent == Some(root.id) && l.zone == zone)
    }

    pub fn children(&self, id: LocationId) -> DomainResult<Vec<&Location>> {
        self.require(id)?;
        Ok(self.nodes.values().filter(|l| l.parent == Some(id)).collect())
    }

    pub fn descendants(&self, id: LocationId) -> DomainResult<Vec<&Location>> {
        let prefix = self.require(id)?.subtree_prefix();
        Ok(self
            .nodes
            .values()
            .filter(|l| l.path.starts_with(&prefix))
            .collect())
    }

    /// Ancestors, root first.
    pub fn ancestors(&self, id: LocationId) -> DomainResult<Vec<&Location>> {
        self.require(id)?
            .path
            .iter()
            .map(|a| self.require(*a))
            .collect()
    }

    pub fn siblings(&self, id: LocationId) -> DomainResult<Vec<&Location>> {
        let node = self.require(id)?;
        Ok(self
            .nodes
            .values()
            .filter(|l| l.id != id && l.path == node.path && l.warehouse_id == node.warehouse_id)
            .collect())
    }

    /// Quantity-holding nodes at or below `id`.
    pub fn leaves_under(&self, id: LocationId) -> DomainResult<Vec<&Location>> {
        let node = self.require(id)?;
        if !node.is_virtual {
            return Ok(vec![node]);
        }
        Ok(self
            .descendants(id)?
            .into_iter()
            .filter(|l| !l.is_virtual)
            .collect())
    }

    /// `id` plus everything below it (the set a virtual read aggregates).
    pub fn subtree_ids(&self, id: LocationId) -> DomainResult<Vec<LocationId>> {
        let mut ids = vec![id];
        ids.extend(self.descendants(id)?.into_iter().map(|l| l.id));
        Ok(ids)
    }

    /// True when `candidate` is `target` or lies below it.
    pub fn is_within(&self, candidate: LocationId, target: LocationId) -> DomainResult<bool> {
        self.require(target)?;
        Ok(self.placement(candidate)?.is_within(target))
    }

    pub fn placement(&self, id: LocationId) -> DomainResult<Placement> {
        let node = self.require(id)?;
        Ok(Placement {
            location: id,
            zone: node.zone,
            is_virtual: node.is_virtual,
            lineage: node.subtree_prefix(),
        })
    }
}
