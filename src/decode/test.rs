use super::{encode, Decoder, Record, WrapTracker, PERF_CONTEXT_MAX};
use crate::config::CounterConfig;
use crate::error::Error;

fn decoder(depth: u16) -> Decoder {
    let mut config = CounterConfig::default();
    config.call_chain_depth = depth;
    Decoder::new(0, &config)
}

fn sample_bytes(dec: &Decoder, ip: u64, value: u64, chain: &[u64]) -> Vec<u8> {
    let mut buf = vec![];
    encode::sample(&mut buf, dec.sample_type(), ip, (7, 8), 100, 1000, value, chain);
    buf
}

#[test]
fn test_decode_sample() {
    let mut dec = decoder(0);
    let bytes = sample_bytes(&dec, 0x4000, 1000, &[]);
    assert_eq!(bytes.len(), encode::sample_size(dec.sample_type(), 0));

    let Record::Sample(s) = dec.decode(&bytes).unwrap() else {
        panic!("not a sample");
    };
    assert_eq!(s.ip, 0x4000);
    assert_eq!((s.pid, s.tid), (7, 8));
    assert_eq!(s.time, 100);
    assert_eq!(s.delta, 1000);
    assert!(s.call_chain.is_empty());
    assert!(!s.is_lost_tagged());

    // Deltas are relative to the previous reading.
    let bytes = sample_bytes(&dec, 0x4000, 2500, &[]);
    let Record::Sample(s) = dec.decode(&bytes).unwrap() else {
        panic!("not a sample");
    };
    assert_eq!(s.delta, 1500);
}

#[test]
fn test_decode_truncates_call_chain() {
    let mut dec = decoder(2);
    let chain = [0x10, PERF_CONTEXT_MAX + 1, 0x20, 0x30, 0x40];
    let bytes = sample_bytes(&dec, 0x10, 1, &chain);

    let Record::Sample(s) = dec.decode(&bytes).unwrap() else {
        panic!("not a sample");
    };
    assert_eq!(s.call_chain.as_slice(), &[0x10, 0x20]);
}

#[test]
fn test_decode_lost() {
    let mut dec = decoder(0);
    let mut bytes = vec![];
    encode::lost(&mut bytes, 1, 42);
    assert_eq!(dec.decode(&bytes).unwrap(), Record::Lost(42));
}

#[test]
fn test_decode_other_record() {
    let mut dec = decoder(0);
    let mut bytes = vec![];
    bytes.extend_from_slice(&3_u32.to_ne_bytes()); // PERF_RECORD_COMM
    bytes.extend_from_slice(&0_u16.to_ne_bytes());
    bytes.extend_from_slice(&16_u16.to_ne_bytes());
    bytes.extend_from_slice(&[0; 8]);
    assert_eq!(dec.decode(&bytes).unwrap(), Record::Other(3));
}

#[test]
fn test_decode_malformed() {
    let mut dec = decoder(4);

    // Shorter than a header.
    assert!(matches!(
        dec.decode(&[0; 4]),
        Err(Error::MalformedRecord(_))
    ));

    // Header size disagrees with the record.
    let mut bytes = sample_bytes(&dec, 1, 1, &[]);
    bytes.truncate(bytes.len() - 8);
    assert!(matches!(dec.decode(&bytes), Err(Error::MalformedRecord(_))));

    // Call chain claims more frames than the record holds.
    let mut bytes = sample_bytes(&dec, 1, 2, &[1, 2]);
    let nr_at = bytes.len() - 3 * 8;
    bytes[nr_at..nr_at + 8].copy_from_slice(&1000_u64.to_ne_bytes());
    assert!(matches!(dec.decode(&bytes), Err(Error::MalformedRecord(_))));
}

#[test]
fn test_wrap_across_max() {
    let max = (1_u64 << 48) - 1;
    let mut wrap = WrapTracker::starting_at(48, max - 999);
    // 1000 steps to wrap around to 0, then 499 more.
    assert_eq!(wrap.delta(499).unwrap(), 1499);
    assert_eq!(wrap.delta(1499).unwrap(), 1000);
    assert_eq!(wrap.last(), 1499);
}

#[test]
fn test_wrap_full_width() {
    let mut wrap = WrapTracker::starting_at(64, u64::MAX - 9);
    assert_eq!(wrap.delta(10).unwrap(), 20);
}

#[test]
fn test_wrap_anomaly() {
    let mut wrap = WrapTracker::new(32);
    assert_eq!(wrap.delta(5000).unwrap(), 5000);
    // Going backwards looks like a jump of almost 2^32.
    assert!(matches!(
        wrap.delta(100),
        Err(Error::CounterAnomaly { last: 5000, raw: 100 })
    ));
    // Re-baselined on the reading that caused the anomaly.
    assert_eq!(wrap.delta(300).unwrap(), 200);
}
