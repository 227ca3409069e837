use std::io;

use thiserror::Error;

use crate::config::EventKind;

/// Errors produced by this crate.
///
/// Decode-level and overflow errors are recovered from locally and show up as
/// counters in the [snapshot][crate::profile::ProfileSnapshot]; the remaining
/// variants are fatal to the operation that produced them.
#[derive(Debug, Error)]
pub enum Error {
    /// The `perf_event` facility is missing or locked down on this host.
    #[error("environment unsupported: {0}")]
    EnvironmentUnsupported(String),
    /// The process lacks the privileges required for the requested scope.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The host PMU or kernel does not provide the event.
    #[error("unsupported event: {0:?}")]
    UnsupportedEvent(EventKind),
    /// Two successive counter readings imply an implausibly large delta,
    /// most likely the counter was reset underneath us.
    #[error("counter anomaly: {last} -> {raw}")]
    CounterAnomaly { last: u64, raw: u64 },
    /// A ring-buffer record whose header or body is inconsistent.
    #[error("malformed record: {0}")]
    MalformedRecord(&'static str),
    /// Samples were lost because the ring buffer was full.
    #[error("{0} samples lost to buffer overflow")]
    BufferOverflowLoss(u64),
    /// The handle (or lease) is unknown or already closed.
    #[error("invalid handle")]
    InvalidHandle,
    /// The configuration was rejected before touching the kernel.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Classifies a failed `perf_event_open` for `event`.
    pub(crate) fn from_open_errno(err: io::Error, event: EventKind) -> Self {
        // https://man7.org/linux/man-pages/man2/perf_event_open.2.html#ERRORS
        match err.raw_os_error() {
            Some(libc::EACCES | libc::EPERM) => {
                Self::PermissionDenied(format!("perf_event_open({:?}): {}", event, err))
            }
            Some(libc::ENOENT | libc::EOPNOTSUPP | libc::ENODEV) => Self::UnsupportedEvent(event),
            Some(libc::ENOSYS) => Self::EnvironmentUnsupported("perf_event_open is not implemented".into()),
            Some(libc::EINVAL) => Self::InvalidConfig(format!("kernel rejected {:?}: {}", event, err)),
            _ => Self::Io(err),
        }
    }
}

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;
