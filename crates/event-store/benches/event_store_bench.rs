use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, DomainEventEnvelope, SequenceNumber, store::EventStore, InMemoryEventStore,
};
use futures_util::TryStreamExt;

fn make_event(aggregate_id: AggregateId, sequence: i64) -> DomainEventEnvelope {
    DomainEventEnvelope::new(
        aggregate_id,
        SequenceNumber::new(sequence),
        "CounterIncremented",
        serde_json::json!({"amount": 1}),
    )
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let id = AggregateId::new();
                let events: Vec<_> = (0..10).map(|s| make_event(id, s)).collect();
                store
                    .append(id, SequenceNumber::zero(), events)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_tail_100(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = InMemoryEventStore::new();
    let id = AggregateId::new();
    rt.block_on(async {
        let events: Vec<_> = (0..100).map(|s| make_event(id, s)).collect();
        store
            .append(id, SequenceNumber::zero(), events)
            .await
            .unwrap();
    });

    c.bench_function("event_store/read_tail_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tail: Vec<_> = store
                    .read_tail(id, None)
                    .await
                    .unwrap()
                    .try_collect()
                    .await
                    .unwrap();
                assert_eq!(tail.len(), 100);
            });
        });
    });
}

criterion_group!(benches, bench_append_batch_10, bench_read_tail_100);
criterion_main!(benches);
