//! Performance-event sampling and profile aggregation for profile-guided
//! optimization, exposed to foreign runtimes through a C ABI.
//!
//! Samples are taken with `perf_event_open`, drained from the kernel ring
//! buffers, decoded and folded into a per-location profile that callers copy
//! out as immutable snapshots.
//!
//! ## Example
//!
//! Aggregate injected samples the same way kernel samples would be.
//!
//! ```rust
//! use pgos::config::{CounterConfig, SampleOn, SourceKind};
//! use pgos::session::Session;
//! use pgos::source::SyntheticSample;
//!
//! let mut config = CounterConfig::default(); // Sample cycles.
//! config.sample_on = SampleOn::Period(1000);
//! config.source = SourceKind::Synthetic; // Use `SourceKind::Kernel` for real counters.
//!
//! let session = Session::open(config).unwrap();
//! let samples: Vec<_> = (1..=10)
//!     .map(|i| SyntheticSample {
//!         ip: 0x1000,
//!         value: i * 1000,
//!         ..Default::default()
//!     })
//!     .collect();
//! session.inject(&samples).unwrap();
//! session.poll().unwrap(); // Drain the ring into the profile.
//!
//! let snap = session.snapshot();
//! assert_eq!(snap.entry(0x1000).unwrap().count, 10);
//! println!("generation {}: {:?}", snap.generation, snap.entries);
//! ```
//!
//! ## C ABI
//!
//! The `cdylib` exports the `pgos_*` functions declared in `include/pgos.h`,
//! see [`abi`]. Call `pgos_prepare_environment` once before opening kernel
//! counters.
//!
//! ## Privileges
//!
//! Unprivileged processes can sample their own user-space code as long as
//! `kernel.perf_event_paranoid` is at most 2. Kernel-space counting and
//! process-wide scopes need a lower level or `CAP_PERFMON`.

pub mod abi;
pub mod config;
pub mod decode;
pub mod env;
mod error;
mod ffi;
pub mod profile;
pub mod session;
pub mod source;

pub use error::{Error, Result};
