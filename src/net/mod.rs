//! Blocking socket setup helpers.
//!
//! Everything in this module blocks and is meant to run before the
//! event loop starts (or on a thread of its own): name resolution,
//! connect-by-candidate-list, and passive socket setup. Errors use OS
//! error codes, except name-service failures which surface as
//! [`DnsError`] wrapped in [`std::io::Error`].

mod resolve;
mod tcp;

pub use resolve::{get_numinfo, AddrInfo, DnsError};
pub use tcp::{tcp_connect, tcp_connect1, tcp_connect_to, tcp_listen, Socket};

use crate::pollset::poller::platform::{
    sys_really_close, sys_set_cloexec, sys_set_nonblocking,
};

use std::io;
use std::os::fd::RawFd;

/// Puts `fd` into non-blocking mode.
pub fn set_nonblock(fd: RawFd) -> io::Result<()> {
    sys_set_nonblocking(fd)
}

/// Marks `fd` close-on-exec.
pub fn set_close_on_exec(fd: RawFd) -> io::Result<()> {
    sys_set_cloexec(fd)
}

/// Closes `fd`, retrying on EINTR and logging any other failure.
pub fn really_close(fd: RawFd) {
    sys_really_close(fd)
}
