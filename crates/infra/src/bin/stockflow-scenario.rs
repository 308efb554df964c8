//! Walks one production receipt through a freshly provisioned warehouse and
//! logs the zone quantities after every hop.

use anyhow::Context;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockflow_core::{PartnerId, WarehouseId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::{EngineConfig, InMemoryLedger, NewDetail, StockEngine, open_store};
use stockflow_inventory::{Coordinate, ItemRef, NewLocation, RouteType, ZoneKind};

const TRACKED: [ZoneKind; 4] = [ZoneKind::Produce, ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock];

fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = EngineConfig::from_env().context("loading engine config")?;
    let store = open_store(&config).context("opening quantity cache")?;
    let warehouse_name = config.warehouse_name.clone();
    let engine = StockEngine::new(
        InMemoryLedger::new(),
        store,
        InMemoryEventBus::<EventEnvelope<JsonValue>>::new(),
        config,
    );

    let warehouse = engine.provision_warehouse(WarehouseId::new(), &warehouse_name)?;
    let wh = warehouse.warehouse_id;
    let mut bins = Vec::new();
    for zone in [ZoneKind::Pack, ZoneKind::Check, ZoneKind::Stock] {
        bins.push(engine.add_location(NewLocation::bin(
            wh,
            warehouse.zone(zone)?,
            zone,
            format!("{zone}-01"),
            Coordinate::default(),
        ))?);
    }

    let item = ItemRef::Product(Uuid::now_v7());
    let route = warehouse.route(RouteType::new(ZoneKind::Produce, ZoneKind::Stock))?;
    let procurement = engine.create_procurement(wh, PartnerId::new(), Vec::new())?;
    engine.add_detail(procurement, NewDetail::new(item, 5, route))?;
    engine.confirm_procurement(procurement)?;

    let mut next = engine.start_procurement(procurement)?.into_iter().next();
    let log_zones = |hop: usize| -> anyhow::Result<()> {
        for zone in TRACKED {
            let available = engine.zone_available(&item, zone)?;
            tracing::info!(hop, zone = %zone, available, "zone quantity");
        }
        Ok(())
    };
    log_zones(0)?;

    for (hop, bin) in bins.into_iter().enumerate() {
        let move_id = next.context("route ended before the last bin")?;
        let outcome = engine.complete_move(move_id, Some(bin))?;
        log_zones(hop + 1)?;
        next = outcome.successor;
    }

    let status = engine.procurement(procurement)?.status();
    tracing::info!(procurement_id = %procurement, status = %status, "scenario finished");
    Ok(())
}
