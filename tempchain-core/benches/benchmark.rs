use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use tempchain_core::operation_counter::{OperationCounter, Outcome};
use tempchain_core::pending_set::PendingSet;
use tempchain_core::round::RoundResult;

fn bench_pending_set(c: &mut Criterion) {
    let ids: Vec<String> = (0..1000).map(|i| format!("0x{:040x}", i)).collect();
    c.bench_function("pending set: 1000 agents report", |b| {
        b.iter(|| {
            let mut pending = PendingSet::new(1, ids.clone(), Box::new(|_| {}));
            for id in &ids {
                pending.record_result(id, 1, RoundResult::IMPLICIT);
            }
            assert!(pending.is_complete());
        })
    });
}

fn bench_operation_counter(c: &mut Criterion) {
    c.bench_function("operation counter: 4 threads settle 10000 ops", |b| {
        b.iter(|| {
            let counter = Arc::new(OperationCounter::new(10_000));
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let counter = counter.clone();
                    std::thread::spawn(move || {
                        for _ in 0..2_500 {
                            counter.record(Outcome::Succeeded);
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
            assert!(counter.is_complete());
        })
    });
}

criterion_group!(benches, bench_pending_set, bench_operation_counter);
criterion_main!(benches);
