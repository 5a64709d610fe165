//! # Vigilis
//!
//! **Vigilis** is the event-dispatch core of an RPC runtime: a
//! single-threaded callback loop that multiplexes descriptor
//! readiness, timers, cross-thread work injection and OS signals over
//! a portable poll(2) wait.
//!
//! The engine favors strict, observable semantics over throughput
//! tricks:
//!
//! - **One loop thread**: every callback runs serialized on the
//!   thread driving [`PollSet::run_one`]; other threads communicate
//!   through an [`Injector`] handle.
//! - **Deterministic dispatch order**: descriptors, then timers
//!   (deadline then scheduling order), then signals, every iteration.
//! - **No lost wakeups**: a self-pipe wakes the wait for injected
//!   work, and a three-state signal handshake makes signal delivery
//!   coalescible but never droppable.
//!
//! Two peripheral modules round out the runtime glue:
//!
//! - [`marshal`]: length-prefixed message framing with 4-byte
//!   zero padding,
//! - [`net`]: blocking DNS resolution and TCP connect/listen
//!   helpers.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use vigilis::PollSet;
//!
//! let mut ps = PollSet::new().unwrap();
//! ps.timeout_in(Duration::from_millis(250), |_ps| {
//!     println!("a quarter second passed");
//! });
//! while ps.pending() {
//!     ps.run_one(None);
//! }
//! ```

mod pollset;

pub mod marshal;
pub mod net;

pub use pollset::{Injector, Mode, PollSet, Timeout};
