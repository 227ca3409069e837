use std::time::Duration;

use super::{CounterConfig, EventKind, SampleOn, MAX_CALL_CHAIN};
use crate::config::attr;
use crate::error::Error;
use crate::ffi::bindings as b;

fn is_invalid(config: &CounterConfig) -> bool {
    matches!(config.validate(), Err(Error::InvalidConfig(_)))
}

#[test]
fn test_default_is_valid() {
    CounterConfig::default().validate().unwrap();
}

#[test]
fn test_reject_empty_and_duplicate_events() {
    let mut config = CounterConfig::default();
    config.events.clear();
    assert!(is_invalid(&config));

    config.events.push(EventKind::Cycles);
    config.events.push(EventKind::Cycles);
    assert!(is_invalid(&config));
}

#[test]
fn test_reject_zero_rate() {
    let mut config = CounterConfig::default();
    config.sample_on = SampleOn::Period(0);
    assert!(is_invalid(&config));
    config.sample_on = SampleOn::Freq(0);
    assert!(is_invalid(&config));
}

#[test]
fn test_reject_out_of_range_fields() {
    let mut config = CounterConfig::default();
    config.call_chain_depth = MAX_CALL_CHAIN as u16 + 1;
    assert!(is_invalid(&config));

    let mut config = CounterConfig::default();
    config.counter_width = 7;
    assert!(is_invalid(&config));

    let mut config = CounterConfig::default();
    config.buffer_exp = 17;
    assert!(is_invalid(&config));

    let mut config = CounterConfig::default();
    config.pid = -1;
    config.cpu = -1;
    assert!(is_invalid(&config));

    let mut config = CounterConfig::default();
    config.drain_interval = Some(Duration::ZERO);
    assert!(is_invalid(&config));
}

#[test]
fn test_counter_mask() {
    let mut config = CounterConfig::default();
    assert_eq!(config.counter_mask(), u64::MAX);
    config.counter_width = 48;
    assert_eq!(config.counter_mask(), 0xffff_ffff_ffff);
}

#[test]
fn test_event_code_round_trip() {
    for code in [1, 2, 3, 4, 5, 6, 7, 16, 17, 18, 19] {
        let ev = EventKind::from_code(code, 0).unwrap();
        assert_eq!(ev.code(), code);
    }
    assert_eq!(EventKind::from_code(255, 0x1c2), Some(EventKind::Raw(0x1c2)));
    assert_eq!(EventKind::from_code(42, 0), None);
}

#[test]
fn test_attr_from_config() {
    let mut config = CounterConfig::default();
    config.sample_on = SampleOn::Freq(997);
    config.call_chain_depth = 16;

    let attr = attr::from(EventKind::TaskClock, &config);
    assert_eq!(attr.type_, b::perf_type_id_PERF_TYPE_SOFTWARE);
    assert_eq!(attr.config, b::perf_sw_ids_PERF_COUNT_SW_TASK_CLOCK as u64);
    assert_eq!(unsafe { attr.__bindgen_anon_1.sample_freq }, 997);
    assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_events }, 1);
    assert_eq!(attr.freq(), 1);
    assert_eq!(attr.disabled(), 1);
    assert_eq!(attr.exclude_kernel(), 1);
    assert_eq!(attr.use_clockid(), 1);
    assert_ne!(attr.sample_type & b::perf_event_sample_format_PERF_SAMPLE_CALLCHAIN, 0);
    assert_eq!(attr.sample_max_stack, 16);
    assert_eq!(attr.size as usize, size_of::<crate::ffi::Attr>());
}

#[test]
fn test_attr_period_with_kernel() {
    let mut config = CounterConfig::default();
    config.sample_on = SampleOn::Period(4001);
    config.exclude_kernel = false;

    let attr = attr::from(EventKind::Cycles, &config);
    assert_eq!(attr.type_, b::perf_type_id_PERF_TYPE_HARDWARE);
    assert_eq!(unsafe { attr.__bindgen_anon_1.sample_period }, 4001);
    assert_eq!(attr.freq(), 0);
    assert_eq!(attr.exclude_kernel(), 0);
    assert_eq!(attr.exclude_callchain_kernel(), 0);
    assert_eq!(attr.exclude_hv(), 1);
    assert_eq!(attr.sample_id_all(), 1);
    assert_eq!(attr.sample_type & b::perf_event_sample_format_PERF_SAMPLE_CALLCHAIN, 0);
}
