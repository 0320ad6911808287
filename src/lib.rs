//! Fibra: lightweight fibers, strand-blocking channels, and actors for Rust.
//!
//! # Overview
//!
//! Fibra multiplexes a large number of lightweight fibers over a small pool
//! of carrier threads. A fiber is an explicit resumable state machine (a
//! future); suspending parks the fiber, never its carrier, and resumption
//! may happen on any carrier. Every blocking primitive in the crate
//! (channels, dataflow values, timers, join handles) suspends *strands*:
//! the uniform execution unit that is either a fiber or a plain OS thread
//! driven through [`strand::block_on`].
//!
//! # Core Guarantees
//!
//! - **Strand uniformity**: every suspendable operation works identically
//!   from a fiber and from a heavyweight thread
//! - **Contained failure**: an uncaught panic terminates only its own
//!   fiber; it is retrievable from the handle and deliverable through
//!   supervision edges
//! - **Distinct outcomes**: `Timeout` and `Interrupted` are always
//!   separate conditions, and end-of-stream is a value, not an error
//! - **Message-shaped supervision**: links and watches turn termination
//!   into ordinary mailbox traffic
//!
//! # Module Structure
//!
//! - [`types`]: Core identifiers and the panic payload
//! - [`error`]: Error types
//! - [`runtime`]: Carrier pool, fiber scheduling, strand handles
//! - [`strand`]: Current-strand context, interruption, `block_on`
//! - [`suspend`]: Suspendability classification of callable graphs
//! - [`time`]: Sleep and timeout primitives
//! - [`channel`]: Queue channels, select, and the broadcast ring
//! - [`dataflow`]: Single-assignment `DelayedVal`
//! - [`actor`]: Mailboxes, supervision, servers, event sources
//! - [`monitor`]: Runtime lifecycle instrumentation hooks
//! - [`test_utils`]: Shared helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod actor;
pub mod channel;
pub mod dataflow;
pub mod error;
pub mod monitor;
pub mod runtime;
pub mod strand;
pub mod suspend;
pub mod test_utils;
pub mod time;
pub mod types;

pub use dataflow::DelayedVal;
pub use runtime::{spawn_thread, FiberRuntime, RuntimeBuilder, RuntimeStats, StrandHandle};
pub use strand::{block_on, Strand, StrandKind};
