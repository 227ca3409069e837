use arrayvec::ArrayVec;

use super::{Aggregator, Edge};
use crate::config::EventKind;
use crate::decode::RawSample;
use crate::source::Batch;

fn raw(event: u8, ip: u64, delta: i64, time: u64) -> RawSample {
    RawSample {
        event,
        time,
        ip,
        pid: 1,
        tid: 1,
        delta,
        call_chain: ArrayVec::new(),
        lost: 0,
    }
}

fn workload() -> Vec<RawSample> {
    (0..100)
        .map(|i| raw(0, 0x1000 + (i % 3) * 0x10, 1000, i))
        .collect()
}

#[test]
fn test_ingest_counts_and_weights() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    for sample in workload() {
        agg.ingest(&sample);
    }
    let snap = agg.snapshot();

    assert_eq!(snap.entries.len(), 3);
    assert_eq!(snap.total_count(), 100);
    let hot = snap.entry(0x1000).unwrap();
    assert_eq!(hot.count, 34);
    assert_eq!(hot.weight[0], 34_000);
    assert_eq!(hot.last_seen, 99);
    assert_eq!(snap.totals[0], 100_000);
    assert_eq!(snap.counters.samples, 100);
    assert_eq!(snap.counters.dropped, 0);
}

#[test]
fn test_replay_is_deterministic() {
    let run = || {
        let agg = Aggregator::new(&[EventKind::Cycles]);
        for sample in workload() {
            agg.ingest(&sample);
        }
        agg.snapshot()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_call_chain_edges() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    let mut sample = raw(0, 0x30, 1, 0);
    sample.call_chain.extend([0x30, 0x20, 0x10]);
    agg.ingest(&sample);
    agg.ingest(&sample);

    let snap = agg.snapshot();
    assert_eq!(
        snap.edges,
        vec![
            Edge {
                parent: 0x10,
                child: 0x20,
                count: 2
            },
            Edge {
                parent: 0x20,
                child: 0x30,
                count: 2
            },
        ]
    );
}

#[test]
fn test_lost_tagged_samples_count_as_dropped() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    let mut sample = raw(0, 0x40, 10, 0);
    sample.lost = 7;
    agg.ingest(&sample);
    agg.ingest_batch(&Batch {
        samples: vec![raw(0, 0x40, 10, 1)],
        lost: 3,
        malformed: 2,
        anomalies: 1,
    });

    let snap = agg.snapshot();
    assert_eq!(snap.entry(0x40).unwrap().count, 2);
    assert_eq!(snap.counters.dropped, 10);
    assert_eq!(snap.counters.malformed, 2);
    assert_eq!(snap.counters.anomalies, 1);
}

#[test]
fn test_generation_strictly_increases() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    let mut last = 0;
    let mut last_count = 0;
    for sample in workload() {
        agg.ingest(&sample);
        let snap = agg.snapshot();
        assert!(snap.generation > last);
        assert!(snap.total_count() >= last_count);
        last = snap.generation;
        last_count = snap.total_count();
    }
}

#[test]
fn test_reset_then_snapshot() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    for sample in workload() {
        agg.ingest(&sample);
    }
    let before = agg.snapshot();
    agg.reset();
    let after = agg.snapshot();

    assert!(after.is_empty());
    assert_eq!(after.counters, Default::default());
    assert_eq!(after.generation, before.generation + 1);
    // Back to one step per snapshot.
    assert_eq!(agg.snapshot().generation, before.generation + 2);
}

#[test]
fn test_snapshot_is_a_copy() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    agg.ingest(&raw(0, 0x50, 1, 0));
    let snap = agg.snapshot();
    agg.ingest(&raw(0, 0x50, 1, 1));
    assert_eq!(snap.entry(0x50).unwrap().count, 1);
}

#[test]
fn test_concurrent_snapshots() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    std::thread::scope(|s| {
        s.spawn(|| {
            for sample in workload() {
                agg.ingest(&sample);
            }
        });
        for _ in 0..4 {
            s.spawn(|| {
                let mut last = 0;
                for _ in 0..50 {
                    let snap = agg.snapshot();
                    assert!(snap.generation > last);
                    last = snap.generation;
                }
            });
        }
    });
    assert_eq!(agg.snapshot().total_count(), 100);
    assert_eq!(agg.generation(), 201);
}

#[test]
fn test_concurrent_snapshots_after_reset() {
    let agg = Aggregator::new(&[EventKind::Cycles]);
    for _ in 0..3 {
        agg.snapshot();
    }
    for _ in 0..20 {
        agg.reset();
        let reset_to = agg.generation();
        let mut generations: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| agg.snapshot().generation)).collect();
            handles.into_iter().map(|it| it.join().unwrap()).collect()
        });
        generations.sort_unstable();
        // Exactly one snapshot reports the generation `reset` moved to.
        assert_eq!(generations, (reset_to..reset_to + 8).collect::<Vec<_>>());
    }
}

#[test]
fn test_derived_metrics() {
    let events = [
        EventKind::Cycles,
        EventKind::Instructions,
        EventKind::CacheMisses,
    ];
    let agg = Aggregator::new(&events);
    agg.ingest(&raw(0, 0x60, 3000, 0));
    agg.ingest(&raw(1, 0x60, 2000, 1));
    agg.ingest(&raw(2, 0x70, 4, 2));

    let snap = agg.snapshot();
    assert_eq!(snap.entry(0x60).unwrap().weight, [3000, 2000, 0, 0]);
    assert_eq!(snap.total_of(EventKind::CacheMisses), Some(4));
    assert_eq!(snap.total_of(EventKind::BranchMisses), None);

    let derived = snap.derived();
    assert_eq!(derived.cycles_per_instruction, Some(1.5));
    assert_eq!(derived.cache_miss_per_kilo_instruction, Some(2.0));
    assert_eq!(derived.branch_miss_ratio, None);
    assert_eq!(derived.stalls_per_kilo_instruction, None);
}
