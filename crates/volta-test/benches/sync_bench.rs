//! Steady-state cost of one full clock exchange cycle

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use volta_core::{ClockSource, ManualClock, NodeId, SkewRegister, TimeDelta, WallTime};
use volta_time::ClockSynchronizer;

struct Node {
    id: NodeId,
    sync: ClockSynchronizer,
    clock: Arc<ManualClock>,
}

fn node(byte: u8, start: WallTime) -> Node {
    let id = NodeId::from_bytes([byte; 16]);
    let clock = Arc::new(ManualClock::new(start));
    let sync = ClockSynchronizer::new(
        id,
        Arc::new(SkewRegister::new()),
        Arc::clone(&clock) as Arc<dyn ClockSource>,
    );
    Node { id, sync, clock }
}

/// One round: challenge, response, regression over the whole history
fn cycle(a: &mut Node, b: &mut Node) {
    let one_way = TimeDelta::from_millis(3);
    for (_, payload) in a.sync.exchange_round() {
        a.clock.advance(one_way);
        b.clock.advance(one_way);
        let (_, response) = b
            .sync
            .handle_incoming(a.id, &payload)
            .expect("challenge yields response");
        a.clock.advance(one_way);
        b.clock.advance(one_way);
        a.sync.handle_incoming(b.id, &response);
    }
    a.clock.advance(TimeDelta::from_millis(10_000));
    b.clock.advance(TimeDelta::from_millis(10_000));
}

fn bench_exchange_cycle(c: &mut Criterion) {
    let start = WallTime::from_secs(1_000);
    let mut a = node(1, start);
    let mut b = node(2, start + TimeDelta::from_millis(100));
    a.sync.handle_peer_list(&[b.id]);

    // Warm the response history to the regression cap so the bench
    // measures the full 400-sample fit.
    for _ in 0..220 {
        cycle(&mut a, &mut b);
    }

    c.bench_function("clock_exchange_cycle_full_history", |bencher| {
        bencher.iter(|| cycle(&mut a, &mut b));
    });
}

criterion_group!(benches, bench_exchange_cycle);
criterion_main!(benches);
