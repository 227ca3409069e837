use std::time::{Duration, Instant};

use super::Session;
use crate::config::{CounterConfig, EventKind, SampleOn, SourceKind};
use crate::error::Error;
use crate::source::SyntheticSample;

fn config() -> CounterConfig {
    let mut config = CounterConfig::default();
    config.source = SourceKind::Synthetic;
    config.sample_on = SampleOn::Period(1000);
    config
}

fn samples(n: u64, chain: &[u64]) -> Vec<SyntheticSample<'_>> {
    (1..=n)
        .map(|i| SyntheticSample {
            ip: 0x1000 + (i % 2) * 0x100,
            time: i,
            value: i * 1000,
            call_chain: chain,
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_inject_poll_snapshot() {
    let session = Session::open(config()).unwrap();
    assert_eq!(session.inject(&samples(100, &[])).unwrap(), 100);
    assert_eq!(session.poll().unwrap(), 100);

    let snap = session.snapshot();
    assert_eq!(snap.entries.len(), 2);
    assert!(snap.entries.iter().all(|it| it.count == 50 && it.weight[0] == 50_000));
    assert_eq!(snap.totals[0], 100_000);
    assert_eq!(snap.counters.dropped, 0);

    assert_eq!(session.poll().unwrap(), 0);
}

#[test]
fn test_call_chains_reach_the_profile() {
    let mut config = config();
    config.call_chain_depth = 2;
    let session = Session::open(config).unwrap();
    session.inject(&samples(10, &[0x1000, 0x2000, 0x3000])).unwrap();
    session.poll().unwrap();

    let snap = session.snapshot();
    assert_eq!(snap.edges.len(), 1);
    assert_eq!((snap.edges[0].parent, snap.edges[0].child), (0x2000, 0x1000));
    assert_eq!(snap.edges[0].count, 10);
}

#[test]
fn test_backpressure_counts_dropped() {
    let mut config = config();
    config.buffer_exp = 0;
    let session = Session::open(config).unwrap();

    let mut last = session.snapshot();
    for round in 1..=5 {
        // Values keep increasing across rounds.
        let batch = samples(200 * round, &[]);
        session.inject(&batch[(batch.len() - 200)..]).unwrap();
        session.poll().unwrap();

        let snap = session.snapshot();
        assert!(snap.counters.dropped > last.counters.dropped);
        assert!(snap.total_count() > last.total_count());
        assert_eq!(snap.total_count() + snap.counters.dropped, 200 * round);
        last = snap;
    }
}

#[test]
fn test_inject_rejects() {
    let session = Session::open(config()).unwrap();
    let stray = SyntheticSample {
        event: 1,
        ..Default::default()
    };
    assert!(matches!(
        session.inject(&[stray]),
        Err(Error::InvalidConfig(_))
    ));
    assert_eq!(session.poll().unwrap(), 0);
}

#[test]
fn test_drain_thread() {
    let mut config = config();
    config.events.push(EventKind::Instructions);
    config.drain_interval = Some(Duration::from_millis(1));
    let session = Session::open(config).unwrap();
    session.inject(&samples(64, &[])).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while session.snapshot().total_count() < 64 {
        assert!(Instant::now() < deadline, "drain thread made no progress");
        std::thread::sleep(Duration::from_millis(1));
    }
    session.close();
}

#[test]
fn test_close() {
    let session = Session::open(config()).unwrap();
    session.inject(&samples(10, &[])).unwrap();
    session.close();
    session.close();

    assert!(session.is_closed());
    assert!(matches!(session.poll(), Err(Error::InvalidHandle)));
    assert!(matches!(
        session.inject(&samples(1, &[])),
        Err(Error::InvalidHandle)
    ));
    // Never ingested, so counted as dropped.
    let snap = session.snapshot();
    assert_eq!(snap.total_count(), 0);
    assert_eq!(snap.counters.dropped, 10);
}

#[test]
fn test_close_counts_overflow_of_every_event() {
    let mut config = config();
    config.events.push(EventKind::Instructions);
    config.buffer_exp = 0;
    let session = Session::open(config).unwrap();

    let cycles = samples(2000, &[]);
    let accepted = session.inject(&cycles).unwrap();
    assert!(accepted < 2000);
    let instructions: Vec<_> = samples(10, &[])
        .into_iter()
        .map(|it| SyntheticSample { event: 1, ..it })
        .collect();
    assert_eq!(session.inject(&instructions).unwrap(), 10);

    // Never polled: accepted, overflowed and second-event samples all count.
    session.close();
    let snap = session.snapshot();
    assert_eq!(snap.total_count(), 0);
    assert_eq!(snap.counters.dropped, 2010);
}
