//! Zone kinds and the standard zone sets used by availability reads.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

/// Semantic category of a location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Root,
    Stock,
    Pick,
    Check,
    Pack,
    Wait,
    Deliver,
    Midway,
    Customer,
    Supplier,
    Produce,
    Repair,
    Scrap,
    Closeout,
    Initial,
}

impl ZoneKind {
    /// Every zone kind a provisioned warehouse gets a node for (all but `Root`).
    pub const PROVISIONED: [ZoneKind; 14] = [
        ZoneKind::Stock,
        ZoneKind::Pick,
        ZoneKind::Check,
        ZoneKind::Pack,
        ZoneKind::Wait,
        ZoneKind::Deliver,
        ZoneKind::Midway,
        ZoneKind::Customer,
        ZoneKind::Supplier,
        ZoneKind::Produce,
        ZoneKind::Repair,
        ZoneKind::Scrap,
        ZoneKind::Closeout,
        ZoneKind::Initial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ZoneKind::Root => "root",
            ZoneKind::Stock => "stock",
            ZoneKind::Pick => "pick",
            ZoneKind::Check => "check",
            ZoneKind::Pack => "pack",
            ZoneKind::Wait => "wait",
            ZoneKind::Deliver => "deliver",
            ZoneKind::Midway => "midway",
            ZoneKind::Customer => "customer",
            ZoneKind::Supplier => "supplier",
            ZoneKind::Produce => "produce",
            ZoneKind::Repair => "repair",
            ZoneKind::Scrap => "scrap",
            ZoneKind::Closeout => "closeout",
            ZoneKind::Initial => "initial",
        }
    }
}

impl core::fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        core::iter::once(ZoneKind::Root)
            .chain(ZoneKind::PROVISIONED)
            .find(|z| z.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown zone kind `{s}`")))
    }
}

/// Named group of zones summed together by availability reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ZoneSet(&'static [ZoneKind]);

impl ZoneSet {
    /// Everything on hand inside the warehouse.
    pub const ALL: ZoneSet = ZoneSet(&[
        ZoneKind::Stock,
        ZoneKind::Pick,
        ZoneKind::Check,
        ZoneKind::Pack,
        ZoneKind::Wait,
        ZoneKind::Deliver,
        ZoneKind::Midway,
    ]);

    /// Quantity that has left the warehouse for good.
    pub const SETTLED: ZoneSet = ZoneSet(&[ZoneKind::Customer, ZoneKind::Repair]);

    /// Quantity between the shelf and the dock.
    pub const TRANSPORTING: ZoneSet = ZoneSet(&[
        ZoneKind::Pick,
        ZoneKind::Check,
        ZoneKind::Pack,
        ZoneKind::Wait,
        ZoneKind::Deliver,
        ZoneKind::Midway,
    ]);

    pub const fn custom(zones: &'static [ZoneKind]) -> Self {
        Self(zones)
    }

    pub fn zones(&self) -> &'static [ZoneKind] {
        self.0
    }

    pub fn contains(&self, zone: ZoneKind) -> bool {
        self.0.contains(&zone)
    }
}

impl stockflow_core::ValueObject for ZoneSet {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_names_parse_back() {
        for zone in ZoneKind::PROVISIONED {
            assert_eq!(zone.as_str().parse::<ZoneKind>().unwrap(), zone);
        }
        assert_eq!("root".parse::<ZoneKind>().unwrap(), ZoneKind::Root);
        assert!("dock".parse::<ZoneKind>().is_err());
    }

    #[test]
    fn transporting_is_all_minus_stock() {
        for zone in ZoneSet::TRANSPORTING.zones() {
            assert!(ZoneSet::ALL.contains(*zone));
        }
        assert!(!ZoneSet::TRANSPORTING.contains(ZoneKind::Stock));
        assert!(!ZoneSet::ALL.contains(ZoneKind::Customer));
    }
}
