use super::{CounterConfig, SampleOn};
use crate::config::EventKind;
use crate::ffi::bindings as b;
use crate::ffi::Attr;

/// Sample fields requested from the kernel, in record order:
/// ip, pid/tid, time, period, read value and (optionally) the call chain.
pub(crate) fn sample_type(config: &CounterConfig) -> u64 {
    let mut ty = b::perf_event_sample_format_PERF_SAMPLE_IP
        | b::perf_event_sample_format_PERF_SAMPLE_TID
        | b::perf_event_sample_format_PERF_SAMPLE_TIME
        | b::perf_event_sample_format_PERF_SAMPLE_PERIOD
        | b::perf_event_sample_format_PERF_SAMPLE_READ;
    if config.call_chain_depth > 0 {
        ty |= b::perf_event_sample_format_PERF_SAMPLE_CALLCHAIN;
    }
    ty
}

// A single `u64 value` per read, see `struct read_format`.
pub(crate) const READ_FORMAT: u64 = 0;

pub(crate) fn from(event: EventKind, config: &CounterConfig) -> Attr {
    let mut attr = Attr {
        size: size_of::<Attr>() as _,
        ..Default::default()
    };

    attr.type_ = event.perf_type();
    attr.config = event.perf_config();

    macro_rules! then {
        ($then:tt) => {
            attr.$then(1)
        };
    }

    // Counters start disabled and are enabled once the ring is mapped,
    // otherwise early samples would hit an unmapped buffer and be lost.
    then!(set_disabled);
    then!(set_sample_id_all);
    then!(set_exclude_hv);
    then!(set_use_clockid);
    if config.exclude_kernel {
        then!(set_exclude_kernel);
        then!(set_exclude_callchain_kernel);
    }

    match config.sample_on {
        SampleOn::Freq(hz) => {
            then!(set_freq);
            attr.__bindgen_anon_1.sample_freq = hz;
        }
        SampleOn::Period(n) => {
            attr.__bindgen_anon_1.sample_period = n;
        }
    }

    attr.sample_type = sample_type(config);
    attr.read_format = READ_FORMAT;
    attr.__bindgen_anon_2.wakeup_events = 1;
    attr.clockid = libc::CLOCK_MONOTONIC;
    // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L12460
    attr.sample_max_stack = config.call_chain_depth;

    attr
}
