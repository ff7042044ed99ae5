//! Integration tests for GC tracing feature.
//!
//! These tests run collection cycles under a subscriber and check that the
//! cycle and phase spans are emitted.

#![cfg(feature = "tracing")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use vm_gc::{CallStack, Collector, GcConfig, GcPolicy, Heap, HeapRef, ObjectData, RuntimeContext};

#[derive(Default)]
struct SpanCounts {
    collections: AtomicUsize,
    phases: AtomicUsize,
}

struct CountingLayer(Arc<SpanCounts>);

impl<S> Layer<S> for CountingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        match attrs.metadata().name() {
            "gc_collect" => self.0.collections.fetch_add(1, Ordering::SeqCst),
            "gc_phase" => self.0.phases.fetch_add(1, Ordering::SeqCst),
            _ => 0,
        };
    }
}

fn collector(heap: &Arc<Heap>) -> Collector {
    Collector::new(RuntimeContext::with_heap(Arc::clone(heap), 1), GcConfig::new(2)).unwrap()
}

#[test]
fn test_cycle_emits_collect_and_phase_spans() {
    let counts = Arc::new(SpanCounts::default());
    let subscriber = tracing_subscriber::registry().with(CountingLayer(Arc::clone(&counts)));

    let heap = Arc::new(Heap::new());
    heap.insert_object(1, ObjectData::default());
    let collector = collector(&heap);

    tracing::subscriber::with_default(subscriber, || {
        collector.request_collection();
        collector.collect(&CallStack::new(), GcPolicy::MarkAndSweep);
        // No pressure: no spans.
        collector.collect(&CallStack::new(), GcPolicy::MarkAndSweep);
    });

    assert_eq!(counts.collections.load(Ordering::SeqCst), 1);
    assert_eq!(counts.phases.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cycles_run_under_fmt_subscriber() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();

    let heap = Arc::new(Heap::new());
    heap.insert_object(1, ObjectData::new(vec![Some(HeapRef::Object(1))]));
    heap.insert_object(2, ObjectData::default());
    let collector = collector(&heap);
    let mut stack = CallStack::new();
    stack.push(0, 1).set_local(0, Some(HeapRef::Object(1)));

    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..3 {
            collector.request_collection();
            assert!(collector.collect(&stack, GcPolicy::MarkAndSweep).is_some());
        }
    });

    assert!(heap.contains(HeapRef::Object(1)));
    assert!(!heap.contains(HeapRef::Object(2)));
}
