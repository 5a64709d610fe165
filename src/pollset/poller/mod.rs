//! Platform-specific polling primitives.
//!
//! This module confines every raw OS call used by the engine to a
//! small set of `sys_*` wrappers. The rest of the crate never touches
//! `libc` directly.
//!
//! The wrappers cover:
//! - the poll(2) readiness wait,
//! - self-pipe plumbing (pipe, fcntl, non-blocking reads and writes),
//! - signal disposition (sigaction, raise),
//! - the monotonic millisecond clock,
//! - blocking socket setup (socket, bind, listen, connect, getaddrinfo).

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
