use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockflow_core::{PartnerId, WarehouseId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::{EngineConfig, InMemoryCacheStore, InMemoryLedger, NewDetail, StockEngine};
use stockflow_inventory::{Coordinate, ItemRef, NewLocation, RouteType, ZoneKind};

type Engine =
    StockEngine<InMemoryLedger, InMemoryCacheStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Engine with `receipts` settled supplier-to-stock receipts of one item.
fn seeded(receipts: usize) -> (Engine, ItemRef) {
    let engine = StockEngine::new(
        InMemoryLedger::new(),
        InMemoryCacheStore::new(),
        InMemoryEventBus::new(),
        EngineConfig::default(),
    );
    let warehouse = engine.provision_warehouse(WarehouseId::new(), "bench").unwrap();
    let wh = warehouse.warehouse_id;
    let bin = engine
        .add_location(NewLocation::bin(
            wh,
            warehouse.zone(ZoneKind::Stock).unwrap(),
            ZoneKind::Stock,
            "stock-01",
            Coordinate::default(),
        ))
        .unwrap();
    let route = warehouse
        .route(RouteType::new(ZoneKind::Supplier, ZoneKind::Stock))
        .unwrap();
    let item = ItemRef::Product(Uuid::now_v7());

    for _ in 0..receipts {
        let procurement = engine.create_procurement(wh, PartnerId::new(), Vec::new()).unwrap();
        engine.add_detail(procurement, NewDetail::new(item, 3, route)).unwrap();
        engine.confirm_procurement(procurement).unwrap();
        for move_id in engine.start_procurement(procurement).unwrap() {
            engine.complete_move(move_id, Some(bin)).unwrap();
        }
    }
    (engine, item)
}

fn bench_cached_read_vs_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("zone_quantity");

    for receipts in [10usize, 100, 1_000] {
        let (engine, item) = seeded(receipts);

        group.bench_with_input(BenchmarkId::new("cached_read", receipts), &receipts, |b, _| {
            b.iter(|| black_box(engine.zone_available(&item, ZoneKind::Stock).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("sync_item", receipts), &receipts, |b, _| {
            b.iter(|| black_box(engine.sync_item(&item).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cached_read_vs_rebuild);
criterion_main!(benches);
