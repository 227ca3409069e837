use std::fs;
use std::io::ErrorKind;

use crate::config::{attr, CounterConfig, EventKind};
use crate::error::{Error, Result};
use crate::ffi::bindings as b;
use crate::ffi::syscall::{perf_event_open, pthread_sigmask_all};

const PARANOID: &str = "/proc/sys/kernel/perf_event_paranoid";
const STATUS: &str = "/proc/self/status";

// https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/capability.h
const CAP_SYS_ADMIN: u32 = 21;
const CAP_PERFMON: u32 = 38;

/// What the host allows this process to sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Environment {
    /// `kernel.perf_event_paranoid`.
    ///
    /// https://www.kernel.org/doc/html/v6.13/admin-guide/perf-security.html
    pub paranoid: i32,
    /// Holds `CAP_PERFMON` or `CAP_SYS_ADMIN`, which bypass the paranoid level.
    pub privileged: bool,
}

impl Environment {
    pub fn probe() -> Result<Self> {
        let paranoid = match fs::read_to_string(PARANOID) {
            Ok(text) => parse_paranoid(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::EnvironmentUnsupported(format!(
                    "{} is missing, the kernel has no perf_event support",
                    PARANOID
                )))
            }
            Err(e) => return Err(e.into()),
        };
        // No readable status means no effective capabilities.
        let privileged = fs::read_to_string(STATUS)
            .ok()
            .and_then(|it| parse_cap_eff(&it))
            .is_some_and(has_perf_caps);

        Ok(Self {
            paranoid,
            privileged,
        })
    }

    /// Checks that `config` may be sampled under this environment.
    pub fn check(&self, config: &CounterConfig) -> Result<()> {
        if self.privileged {
            return Ok(());
        }
        if self.paranoid >= 3 {
            return Err(Error::EnvironmentUnsupported(format!(
                "perf_event_paranoid is {}, unprivileged sampling is disabled",
                self.paranoid
            )));
        }
        if config.pid == -1 && self.paranoid > 0 {
            return Err(Error::PermissionDenied(format!(
                "observing every process needs perf_event_paranoid <= 0 (is {}) or CAP_PERFMON",
                self.paranoid
            )));
        }
        if !config.exclude_kernel && self.paranoid > 1 {
            return Err(Error::PermissionDenied(format!(
                "counting kernel space needs perf_event_paranoid <= 1 (is {}) or CAP_PERFMON",
                self.paranoid
            )));
        }
        Ok(())
    }
}

/// Validates once per process that counters can be opened at all.
///
/// Probes the host settings and opens (then closes) a user-space software
/// counter on the calling thread, the least privileged counter there is.
pub fn prepare_environment() -> Result<Environment> {
    let env = Environment::probe()?;
    let config = CounterConfig::default();
    env.check(&config)?;

    let attr = attr::from(EventKind::TaskClock, &config);
    let flags = b::PERF_FLAG_FD_CLOEXEC as _;
    if let Err(e) = perf_event_open(&attr, 0, -1, -1, flags) {
        return Err(Error::EnvironmentUnsupported(format!(
            "perf_event_open failed for a software counter: {}",
            e
        )));
    }

    log::debug!("{:?}", env);
    Ok(env)
}

/// Blocks asynchronous signals on the calling thread.
///
/// Called by drain threads so that the host process' handlers only ever
/// run on its own threads.
pub fn block_signals() -> Result<()> {
    Ok(pthread_sigmask_all()?)
}

fn parse_paranoid(text: &str) -> Result<i32> {
    let text = text.trim();
    text.parse().map_err(|_| {
        Error::EnvironmentUnsupported(format!("unexpected perf_event_paranoid value {:?}", text))
    })
}

fn parse_cap_eff(status: &str) -> Option<u64> {
    let hex = status
        .lines()
        .find_map(|it| it.strip_prefix("CapEff:"))?;
    u64::from_str_radix(hex.trim(), 16).ok()
}

fn has_perf_caps(caps: u64) -> bool {
    caps & (1 << CAP_SYS_ADMIN | 1 << CAP_PERFMON) > 0
}
