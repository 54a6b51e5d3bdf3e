use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use stockflow_core::{PartyId, UserId};
use stockflow_events::{EventEnvelope, InMemoryEventBus};
use stockflow_infra::{ConsistencyCoordinator, CoordinatorConfig, InMemoryStore};
use stockflow_inventory::{
    LocationId, MovementId, MovementKind, MovementType, NewProduct, Product, ProductId,
    RecordMovement, StockLedger, StockMovement,
};
use stockflow_orders::{NewOrder, OrderStatus};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Coordinator = ConsistencyCoordinator<InMemoryStore, Bus>;

fn setup() -> Coordinator {
    ConsistencyCoordinator::new(
        InMemoryStore::new(),
        Arc::new(InMemoryEventBus::new()),
        CoordinatorConfig::default(),
    )
}

fn stocked(coordinator: &Coordinator, sku: &str, quantity: i64) -> Product {
    let product = coordinator
        .register_product(NewProduct::new(sku, "Bench product"))
        .unwrap();
    coordinator
        .record_movement(RecordMovement::new(
            product.id_typed(),
            MovementKind::In { quantity },
            UserId::new(),
        ))
        .unwrap();
    product
}

fn bench_movement_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_latency");
    group.sample_size(1000);

    group.bench_function("record_in", |b| {
        let coordinator = setup();
        let product = stocked(&coordinator, "BENCH-IN", 1);
        let actor = UserId::new();
        b.iter(|| {
            coordinator
                .record_movement(RecordMovement::new(
                    product.id_typed(),
                    MovementKind::In { quantity: black_box(1) },
                    actor,
                ))
                .unwrap();
        });
    });

    group.bench_function("transfer_pair", |b| {
        let coordinator = setup();
        let product = coordinator
            .register_product(NewProduct::new("BENCH-XFER", "Bench product"))
            .unwrap();
        let (a, z) = (LocationId::generate(), LocationId::generate());
        let actor = UserId::new();
        coordinator
            .record_movement(
                RecordMovement::new(product.id_typed(), MovementKind::In { quantity: 1_000 }, actor)
                    .at_location(a),
            )
            .unwrap();

        let mut forward = true;
        b.iter(|| {
            let (from, to) = if forward { (a, z) } else { (z, a) };
            forward = !forward;
            coordinator
                .record_movement(RecordMovement::new(
                    product.id_typed(),
                    MovementKind::Transfer { quantity: black_box(1_000), from, to },
                    actor,
                ))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_sale_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("sale_cascade");

    // Each iteration grows one confirmed item by a unit: one upsert plus one stock-out.
    group.bench_function("incremental_confirmed_sale", |b| {
        let coordinator = setup();
        let product = stocked(&coordinator, "BENCH-SALE", i64::MAX / 2);
        let order = coordinator
            .create_order(NewOrder::sale(PartyId::new(), UserId::new()))
            .unwrap();
        coordinator
            .transition_status(order.id_typed(), OrderStatus::Confirmed)
            .unwrap();

        let mut quantity = 0i64;
        b.iter(|| {
            quantity += 1;
            black_box(
                coordinator
                    .record_sale(order.id_typed(), product.id_typed(), quantity, 1)
                    .unwrap(),
            );
        });
    });

    for items in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*items as u64));
        group.bench_with_input(BenchmarkId::new("confirm_order", items), items, |b, &n| {
            let coordinator = setup();
            let products: Vec<Product> = (0..n)
                .map(|i| stocked(&coordinator, &format!("BENCH-C{i}"), i64::MAX / 2))
                .collect();

            b.iter(|| {
                let order = coordinator
                    .create_order(NewOrder::sale(PartyId::new(), UserId::new()))
                    .unwrap();
                for product in &products {
                    coordinator
                        .record_sale(order.id_typed(), product.id_typed(), 2, 10)
                        .unwrap();
                }
                black_box(
                    coordinator
                        .transition_status(order.id_typed(), OrderStatus::Confirmed)
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

fn bench_ledger_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_replay");

    for size in [100usize, 1_000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("replay", size), size, |b, &size| {
            let product_id = ProductId::generate();
            let actor = UserId::new();
            let movements: Vec<StockMovement> = (0..size)
                .map(|i| {
                    let signed_quantity: i64 = if i % 4 == 3 { -2 } else { 3 };
                    StockMovement {
                        id: MovementId::generate(),
                        product_id,
                        movement_type: if signed_quantity > 0 { MovementType::In } else { MovementType::Out },
                        quantity: signed_quantity.abs(),
                        signed_quantity,
                        location: None,
                        transfer_id: None,
                        reference: String::new(),
                        notes: String::new(),
                        actor,
                        occurred_at: Utc::now(),
                    }
                })
                .collect();

            b.iter(|| black_box(StockLedger::replay(&movements)));
        });
    }

    group.finish();
}

fn bench_contended_movements(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_movements");
    group.sample_size(20);
    let per_thread = 50;

    for threads in [1usize, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements((*threads * per_thread) as u64));
        group.bench_with_input(BenchmarkId::new("same_product", threads), threads, |b, &threads| {
            let coordinator = setup();
            let product = stocked(&coordinator, "BENCH-HOT", 1);

            b.iter(|| {
                std::thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..per_thread {
                                coordinator
                                    .record_movement(RecordMovement::new(
                                        product.id_typed(),
                                        MovementKind::In { quantity: 1 },
                                        UserId::new(),
                                    ))
                                    .unwrap();
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_movement_latency,
    bench_sale_cascade,
    bench_ledger_replay,
    bench_contended_movements
);
criterion_main!(benches);
