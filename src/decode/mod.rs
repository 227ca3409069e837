use arrayvec::ArrayVec;

use crate::config::{attr, CounterConfig, MAX_CALL_CHAIN};
use crate::error::{Error, Result};
use crate::ffi::bindings::{
    perf_callchain_context_PERF_CONTEXT_MAX as PERF_CONTEXT_MAX,
    perf_event_sample_format_PERF_SAMPLE_ADDR as PERF_SAMPLE_ADDR,
    perf_event_sample_format_PERF_SAMPLE_CALLCHAIN as PERF_SAMPLE_CALLCHAIN,
    perf_event_sample_format_PERF_SAMPLE_CPU as PERF_SAMPLE_CPU,
    perf_event_sample_format_PERF_SAMPLE_ID as PERF_SAMPLE_ID,
    perf_event_sample_format_PERF_SAMPLE_IDENTIFIER as PERF_SAMPLE_IDENTIFIER,
    perf_event_sample_format_PERF_SAMPLE_IP as PERF_SAMPLE_IP,
    perf_event_sample_format_PERF_SAMPLE_PERIOD as PERF_SAMPLE_PERIOD,
    perf_event_sample_format_PERF_SAMPLE_READ as PERF_SAMPLE_READ,
    perf_event_sample_format_PERF_SAMPLE_STREAM_ID as PERF_SAMPLE_STREAM_ID,
    perf_event_sample_format_PERF_SAMPLE_TID as PERF_SAMPLE_TID,
    perf_event_sample_format_PERF_SAMPLE_TIME as PERF_SAMPLE_TIME,
    perf_event_type_PERF_RECORD_LOST as PERF_RECORD_LOST,
    perf_event_type_PERF_RECORD_LOST_SAMPLES as PERF_RECORD_LOST_SAMPLES,
    perf_event_type_PERF_RECORD_SAMPLE as PERF_RECORD_SAMPLE,
};

mod wrap;

pub use wrap::WrapTracker;

/// A decoded sample record.
///
/// Immutable once produced by a [`Decoder`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawSample {
    /// Slot of the event in [`CounterConfig::events`].
    pub event: u8,
    /// Kernel timestamp (`CLOCK_MONOTONIC` based) in nanoseconds.
    pub time: u64,
    /// Code location, the sampled instruction pointer.
    pub ip: u64,
    pub pid: u32,
    pub tid: u32,
    /// Counter progress since the previous sample of the same event,
    /// corrected for counter wraparound.
    pub delta: i64,
    /// Call chain, most recent frame first, truncated to the configured depth.
    pub call_chain: ArrayVec<u64, MAX_CALL_CHAIN>,
    /// Samples lost right before this one, non-zero marks the lost-sample flag.
    pub lost: u64,
}

impl RawSample {
    pub fn is_lost_tagged(&self) -> bool {
        self.lost > 0
    }
}

/// What a ring-buffer record decoded to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Sample(RawSample),
    /// The kernel (or the synthetic producer) dropped this many records.
    Lost(u64),
    /// A record type the profile has no use for.
    Other(u32),
}

/// Decodes ring-buffer records of one event stream.
///
/// The only state is the wraparound bookkeeping of the stream's counter.
#[derive(Clone, Debug)]
pub struct Decoder {
    event: u8,
    sample_type: u64,
    depth: usize,
    wrap: WrapTracker,
}

impl Decoder {
    pub fn new(event: u8, config: &CounterConfig) -> Self {
        Self {
            event,
            sample_type: attr::sample_type(config),
            depth: config.call_chain_depth as _,
            wrap: WrapTracker::new(config.counter_width),
        }
    }

    pub fn sample_type(&self) -> u64 {
        self.sample_type
    }

    /// Decodes one record, `bytes` must hold exactly one record including its header.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Record> {
        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L824
        // struct perf_event_header {
        //     u32 type;
        //     u16 misc;
        //     u16 size;
        // };
        let mut cur = Cursor::new(bytes);
        let ty = cur.u32()?;
        let _misc = cur.u16()?;
        let size = cur.u16()? as usize;
        if size != bytes.len() {
            return Err(Error::MalformedRecord("header size does not match record"));
        }

        match ty {
            PERF_RECORD_SAMPLE => self.decode_sample(cur).map(Record::Sample),
            // struct {
            //     struct perf_event_header header;
            //     u64 id;
            //     u64 lost;
            //     struct sample_id sample_id;
            // };
            PERF_RECORD_LOST => {
                let _id = cur.u64()?;
                Ok(Record::Lost(cur.u64()?))
            }
            // struct {
            //     struct perf_event_header header;
            //     u64 lost;
            //     struct sample_id sample_id;
            // };
            PERF_RECORD_LOST_SAMPLES => Ok(Record::Lost(cur.u64()?)),
            ty => Ok(Record::Other(ty)),
        }
    }

    // struct {
    //     struct perf_event_header header;
    //     { u64 id;        } && PERF_SAMPLE_IDENTIFIER
    //     { u64 ip;        } && PERF_SAMPLE_IP
    //     { u32 pid, tid;  } && PERF_SAMPLE_TID
    //     { u64 time;      } && PERF_SAMPLE_TIME
    //     { u64 addr;      } && PERF_SAMPLE_ADDR
    //     { u64 id;        } && PERF_SAMPLE_ID
    //     { u64 stream_id; } && PERF_SAMPLE_STREAM_ID
    //     { u32 cpu, res;  } && PERF_SAMPLE_CPU
    //     { u64 period;    } && PERF_SAMPLE_PERIOD
    //     { struct read_format values; } && PERF_SAMPLE_READ
    //     {
    //         u64 nr,
    //         u64 ips[nr];
    //     } && PERF_SAMPLE_CALLCHAIN
    //     ...
    // };
    fn decode_sample(&mut self, mut cur: Cursor<'_>) -> Result<RawSample> {
        let sample_type = self.sample_type;
        macro_rules! when {
            ($flag:ident, $then:expr) => {
                if sample_type & $flag > 0 {
                    Some($then)
                } else {
                    None
                }
            };
        }

        when!(PERF_SAMPLE_IDENTIFIER, cur.u64()?);
        let ip = when!(PERF_SAMPLE_IP, cur.u64()?).unwrap_or_default();
        let (pid, tid) = when!(PERF_SAMPLE_TID, (cur.u32()?, cur.u32()?)).unwrap_or_default();
        let time = when!(PERF_SAMPLE_TIME, cur.u64()?).unwrap_or_default();
        when!(PERF_SAMPLE_ADDR, cur.u64()?);
        when!(PERF_SAMPLE_ID, cur.u64()?);
        when!(PERF_SAMPLE_STREAM_ID, cur.u64()?);
        when!(PERF_SAMPLE_CPU, cur.u64()?);
        let period = when!(PERF_SAMPLE_PERIOD, cur.u64()?);
        // `read_format` is always 0 here, a single counter value.
        let value = when!(PERF_SAMPLE_READ, cur.u64()?);

        let mut call_chain = ArrayVec::new();
        if sample_type & PERF_SAMPLE_CALLCHAIN > 0 {
            let nr = cur.u64()? as usize;
            if nr > cur.remaining() / size_of::<u64>() {
                return Err(Error::MalformedRecord("call chain overruns record"));
            }
            for _ in 0..nr {
                let frame = cur.u64()?;
                // Skip `PERF_CONTEXT_USER` and friends, they are not code locations.
                if frame >= PERF_CONTEXT_MAX {
                    continue;
                }
                if call_chain.len() < self.depth {
                    call_chain.push(frame);
                }
            }
        }

        let delta = match (value, period) {
            (Some(value), _) => self.wrap.delta(value)?,
            (None, Some(period)) => period as i64,
            (None, None) => 1,
        };

        Ok(RawSample {
            event: self.event,
            time,
            ip,
            pid,
            tid,
            delta,
            call_chain,
            lost: 0,
        })
    }
}

/// Bounds-checked native-endian reader over one record.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty> {
            const N: usize = size_of::<$ty>();
            let bytes = self
                .buf
                .get(self.pos..self.pos + N)
                .ok_or(Error::MalformedRecord("record truncated"))?;
            self.pos += N;
            let mut val = [0; N];
            val.copy_from_slice(bytes);
            Ok(<$ty>::from_ne_bytes(val))
        }
    };
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    read!(u16, u16);
    read!(u32, u32);
    read!(u64, u64);
}

/// Encodes records in the kernel's ring-buffer format.
///
/// Used by the synthetic source so that injected samples travel through
/// the same ring and decoder as kernel samples.
pub(crate) mod encode {
    use super::{PERF_RECORD_LOST, PERF_RECORD_SAMPLE, PERF_SAMPLE_CALLCHAIN};

    fn header(buf: &mut Vec<u8>, ty: u32, size: usize) {
        buf.extend_from_slice(&ty.to_ne_bytes());
        buf.extend_from_slice(&0_u16.to_ne_bytes());
        buf.extend_from_slice(&(size as u16).to_ne_bytes());
    }

    /// Size in bytes of a sample record with `frames` call-chain entries.
    pub fn sample_size(sample_type: u64, frames: usize) -> usize {
        let mut size = 8 + 8 + 8 + 8 + 8 + 8;
        if sample_type & PERF_SAMPLE_CALLCHAIN > 0 {
            size += 8 + frames * 8;
        }
        size
    }

    /// Appends a sample laid out for the sample type produced by
    /// [`attr::sample_type`][crate::config::attr::sample_type].
    #[allow(clippy::too_many_arguments)]
    pub fn sample(
        buf: &mut Vec<u8>,
        sample_type: u64,
        ip: u64,
        (pid, tid): (u32, u32),
        time: u64,
        period: u64,
        value: u64,
        call_chain: &[u64],
    ) {
        header(buf, PERF_RECORD_SAMPLE, sample_size(sample_type, call_chain.len()));
        buf.extend_from_slice(&ip.to_ne_bytes());
        buf.extend_from_slice(&pid.to_ne_bytes());
        buf.extend_from_slice(&tid.to_ne_bytes());
        buf.extend_from_slice(&time.to_ne_bytes());
        buf.extend_from_slice(&period.to_ne_bytes());
        buf.extend_from_slice(&value.to_ne_bytes());
        if sample_type & PERF_SAMPLE_CALLCHAIN > 0 {
            buf.extend_from_slice(&(call_chain.len() as u64).to_ne_bytes());
            for ip in call_chain {
                buf.extend_from_slice(&ip.to_ne_bytes());
            }
        }
    }

    pub const LOST_SIZE: usize = 24;

    pub fn lost(buf: &mut Vec<u8>, id: u64, lost: u64) {
        header(buf, PERF_RECORD_LOST, LOST_SIZE);
        buf.extend_from_slice(&id.to_ne_bytes());
        buf.extend_from_slice(&lost.to_ne_bytes());
    }
}

#[cfg(test)]
mod test;
