//! Benchmark: cycle pause time over heaps of growing size.
//!
//! Half of every heap hangs off a single root chain and survives; the other
//! half is garbage, so each iteration marks and sweeps the same amount.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use vm_gc::gc::{MarkBitmaps, Tracer};
use vm_gc::{
    ArrayData, CallStack, Collector, GcConfig, GcPolicy, Heap, HeapRef, ObjectData, RuntimeContext,
};

/// Allocate `live` reachable objects chained off one array, plus `live`
/// unreachable objects. Returns the root.
fn populate(heap: &Heap, live: usize) -> HeapRef {
    let mut next = None;
    for _ in 0..live {
        next = Some(heap.allocate_object(ObjectData::new(vec![next])));
        heap.allocate_object(ObjectData::default());
    }
    heap.allocate_array(ArrayData::new(vec![next]))
}

fn bench_pause_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("pause_time");
    for live in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let heap = Arc::new(Heap::new());
            let collector =
                Collector::new(RuntimeContext::with_heap(Arc::clone(&heap), 1), GcConfig::default())
                    .unwrap();
            let root = populate(&heap, live);
            let mut stack = CallStack::new();
            stack.push(0, 1).set_local(0, Some(root));

            b.iter(|| {
                for _ in 0..live {
                    heap.allocate_object(ObjectData::default());
                }
                collector.request_collection();
                black_box(collector.collect(&stack, GcPolicy::MarkAndSweep));
            });
        });
    }
    group.finish();
}

fn bench_mark_only(c: &mut Criterion) {
    let heap = Arc::new(Heap::new());
    let root = populate(&heap, 10_000);

    c.bench_function("mark_10000_chain", |b| {
        b.iter(|| {
            let tracer = Tracer::new(Arc::clone(&heap), Arc::new(MarkBitmaps::new()));
            black_box(tracer.mark(Some(root)))
        });
    });
}

criterion_group!(benches, bench_pause_time, bench_mark_only);
criterion_main!(benches);
