//! The event-dispatch engine.
//!
//! A [`PollSet`] funnels four event sources onto one loop thread:
//! - descriptor readiness, via a dense poll(2) request array,
//! - timers, via an ordered deadline queue,
//! - callbacks injected from other threads, via a self-pipe-backed
//!   inbox,
//! - OS signals, via a process-wide ownership table with a
//!   signal-safe wake handshake.
//!
//! Callbacks run strictly sequentially on the loop thread; there is no
//! parallel callback execution within one engine. Several engines may
//! coexist in a process, each driven by its own thread.

mod core;
mod event;
mod inbox;
mod signal;
mod timer;

pub(crate) mod poller;

pub use self::core::PollSet;
pub use self::event::Mode;
pub use self::inbox::Injector;
pub use self::timer::Timeout;
