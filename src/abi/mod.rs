//! The C ABI of `libpgos.so`.
//!
//! Every entry point returns a status code (`PGOS_OK` or a negative
//! `PGOS_ERR_*`) and never unwinds into the caller. Handles are integer ids;
//! snapshot buffers are allocated here and must be handed back to
//! [`pgos_release`] exactly once.

use std::collections::HashMap;
use std::ffi::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use crate::config::CounterConfig;
use crate::env;
use crate::error::Error;
use crate::session::Session;
use crate::source::{SyntheticSample, MAX_INJECT_FRAMES};

mod layout;
mod registry;

pub use layout::*;
use registry::Registry;

static SESSIONS: LazyLock<Registry<Session>> = LazyLock::new(Registry::default);

// Buffer address -> the buffer itself.
static LEASES: LazyLock<Mutex<HashMap<usize, Box<[u64]>>>> = LazyLock::new(Mutex::default);

fn leases() -> MutexGuard<'static, HashMap<usize, Box<[u64]>>> {
    LEASES.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Status(i32);

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        log::debug!("{}", err);
        Self(status_of(&err))
    }
}

const INVALID_ARGUMENT: Status = Status(PGOS_ERR_INVALID_ARGUMENT);

fn guard(f: impl FnOnce() -> Result<(), Status>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => PGOS_OK,
        Ok(Err(Status(code))) => code,
        Err(_) => {
            log::error!("panic caught at the C boundary");
            PGOS_ERR_PANIC
        }
    }
}

fn session(handle: u32) -> Result<Arc<Session>, Status> {
    SESSIONS
        .get(handle)
        .ok_or_else(|| Error::InvalidHandle.into())
}

/// Checks that the host can sample at all.
#[no_mangle]
pub extern "C" fn pgos_prepare_environment() -> i32 {
    guard(|| {
        env::prepare_environment()?;
        Ok(())
    })
}

/// Opens a handle and stores its id in `*out_handle`.
///
/// # Safety
///
/// `config` must point to a valid `pgos_config` and `out_handle` to
/// writable memory, or be null.
#[no_mangle]
pub unsafe extern "C" fn pgos_open(config: *const PgosConfig, out_handle: *mut u32) -> i32 {
    guard(|| {
        let raw = config.as_ref().ok_or(INVALID_ARGUMENT)?;
        let out = out_handle.as_mut().ok_or(INVALID_ARGUMENT)?;

        let config = CounterConfig::try_from(raw)?;
        let session = Session::open(config)?;
        let id = SESSIONS
            .insert(session)
            .ok_or(Error::Io(std::io::ErrorKind::OutOfMemory.into()))?;
        log::debug!("opened handle {}", id);
        *out = id;
        Ok(())
    })
}

/// Drains pending samples into the profile of `handle` without blocking.
///
/// # Safety
///
/// `out_ingested` must be null or point to writable memory.
#[no_mangle]
pub unsafe extern "C" fn pgos_poll(handle: u32, out_ingested: *mut u64) -> i32 {
    guard(|| {
        let n = session(handle)?.poll()?;
        if let Some(out) = out_ingested.as_mut() {
            *out = n as _;
        }
        Ok(())
    })
}

/// Copies the profile of `handle` into a new buffer.
///
/// On success `*out_ptr` points to a `pgos_snapshot` header followed by its
/// entries and edges, `*out_len` is the buffer size in bytes. The buffer
/// stays valid until passed to [`pgos_release`].
///
/// # Safety
///
/// Both out pointers must point to writable memory, or be null.
#[no_mangle]
pub unsafe extern "C" fn pgos_snapshot(
    handle: u32,
    out_ptr: *mut *const PgosSnapshotHeader,
    out_len: *mut usize,
) -> i32 {
    guard(|| {
        let out_ptr = out_ptr.as_mut().ok_or(INVALID_ARGUMENT)?;
        let out_len = out_len.as_mut().ok_or(INVALID_ARGUMENT)?;

        let snap = session(handle)?.snapshot();
        let buf = flatten(&snap);
        let ptr = buf.as_ptr();
        let len = size_of_val(&*buf);
        leases().insert(ptr as usize, buf);

        *out_ptr = ptr.cast();
        *out_len = len;
        Ok(())
    })
}

/// Frees a snapshot buffer. Releasing a pointer twice, or one that did not
/// come from [`pgos_snapshot`], fails with `PGOS_ERR_INVALID_HANDLE`.
#[no_mangle]
pub extern "C" fn pgos_release(ptr: *const PgosSnapshotHeader) -> i32 {
    guard(|| match leases().remove(&(ptr as usize)) {
        Some(_) => Ok(()),
        None => Err(Error::InvalidHandle.into()),
    })
}

/// Stops `handle` and frees its counters; closing a closed handle is a no-op.
#[no_mangle]
pub extern "C" fn pgos_close(handle: u32) -> i32 {
    guard(|| match SESSIONS.remove(handle) {
        Some(session) => {
            session.close();
            log::debug!("closed handle {}", handle);
            Ok(())
        }
        None if SESSIONS.was_issued(handle) => Ok(()),
        None => Err(Error::InvalidHandle.into()),
    })
}

/// Clears the profile of `handle`.
#[no_mangle]
pub extern "C" fn pgos_reset(handle: u32) -> i32 {
    guard(|| {
        session(handle)?.reset();
        Ok(())
    })
}

/// Feeds `count` samples to a handle opened with `PGOS_SOURCE_SYNTHETIC`.
///
/// Samples that do not fit in the ring are dropped and counted as lost,
/// `*out_accepted` receives how many were not.
///
/// # Safety
///
/// `samples` must point to `count` valid samples whose call chains are
/// valid for `call_chain_len` reads. `out_accepted` must be null or point
/// to writable memory.
#[no_mangle]
pub unsafe extern "C" fn pgos_inject(
    handle: u32,
    samples: *const PgosSample,
    count: usize,
    out_accepted: *mut usize,
) -> i32 {
    guard(|| {
        let raw = match count {
            0 => &[][..],
            _ if samples.is_null() => return Err(INVALID_ARGUMENT),
            n => std::slice::from_raw_parts(samples, n),
        };

        let mut batch = Vec::with_capacity(raw.len());
        for it in raw {
            let call_chain = match it.call_chain_len as usize {
                0 => &[][..],
                _ if it.call_chain.is_null() => return Err(INVALID_ARGUMENT),
                n => std::slice::from_raw_parts(it.call_chain, n.min(MAX_INJECT_FRAMES)),
            };
            batch.push(SyntheticSample {
                event: it.event.try_into().map_err(|_| INVALID_ARGUMENT)?,
                ip: it.ip,
                pid: it.pid,
                tid: it.tid,
                time: it.time,
                value: it.value,
                call_chain,
            });
        }

        let accepted = session(handle)?.inject(&batch)?;
        if let Some(out) = out_accepted.as_mut() {
            *out = accepted;
        }
        Ok(())
    })
}

/// Static, NUL-terminated description of a status code.
#[no_mangle]
pub extern "C" fn pgos_status_str(status: i32) -> *const c_char {
    let s = match status {
        PGOS_OK => c"ok",
        PGOS_ERR_ENVIRONMENT_UNSUPPORTED => c"environment unsupported",
        PGOS_ERR_PERMISSION_DENIED => c"permission denied",
        PGOS_ERR_UNSUPPORTED_EVENT => c"unsupported event",
        PGOS_ERR_COUNTER_ANOMALY => c"counter anomaly",
        PGOS_ERR_MALFORMED_RECORD => c"malformed record",
        PGOS_ERR_BUFFER_OVERFLOW_LOSS => c"samples lost to buffer overflow",
        PGOS_ERR_INVALID_HANDLE => c"invalid handle",
        PGOS_ERR_INVALID_CONFIG => c"invalid config",
        PGOS_ERR_IO => c"i/o error",
        PGOS_ERR_PANIC => c"internal panic",
        PGOS_ERR_INVALID_ARGUMENT => c"invalid argument",
        _ => c"unknown status",
    };
    s.as_ptr()
}

/// Installs a logger filtered by `PGOS_LOG` (`env_logger` syntax).
///
/// Does nothing if the process already has a logger.
#[no_mangle]
pub extern "C" fn pgos_init_logging() -> i32 {
    guard(|| {
        let env = env_logger::Env::new().filter("PGOS_LOG");
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("a logger is already installed");
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn pgos_abi_version() -> u32 {
    PGOS_ABI_VERSION
}
