use super::resolve::{dns_error, AddrInfo};
use crate::pollset::poller::platform::{
    sys_bind, sys_connect, sys_getsockname, sys_listen, sys_numeric_nameinfo, sys_really_close,
    sys_set_nonblocking, sys_socket,
};

use libc::{addrinfo, c_int, sockaddr, EADDRNOTAVAIL, EINPROGRESS, SOCK_STREAM};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

/// An owned socket descriptor, closed on drop.
#[derive(Debug)]
pub struct Socket {
    fd: RawFd,
}

impl Socket {
    /// Numeric `(host, service)` strings for the socket's local
    /// address; handy for learning an ephemerally bound port.
    pub fn local_addr(&self) -> io::Result<(String, String)> {
        let (storage, len) = sys_getsockname(self.fd)?;
        sys_numeric_nameinfo(&storage as *const _ as *const sockaddr, len)
            .map_err(|code| dns_error(code, "getnameinfo".to_owned()))
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Socket {
        Socket { fd }
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        sys_really_close(self.fd);
    }
}

/// Attempts a connection to a single resolver candidate.
///
/// With `ndelay` the socket is made non-blocking first, and an
/// `EINPROGRESS` connect counts as success; completion is then the
/// caller's to observe via write readiness.
pub fn tcp_connect1(ai: &addrinfo, ndelay: bool) -> io::Result<Socket> {
    let fd = sys_socket(ai.ai_family, ai.ai_socktype, ai.ai_protocol)?;
    let sock = Socket { fd };
    if ndelay {
        sys_set_nonblocking(fd)?;
    }
    if let Err(e) = sys_connect(fd, ai) {
        if !(ndelay && e.raw_os_error() == Some(EINPROGRESS)) {
            return Err(e);
        }
    }
    Ok(sock)
}

/// Connects to the first reachable candidate in the list.
///
/// Candidates are tried in resolver order; the error from the last
/// attempt is returned if none succeeds (`EADDRNOTAVAIL` for an empty
/// list).
pub fn tcp_connect_to(ai: &AddrInfo) -> io::Result<Socket> {
    let mut last = io::Error::from_raw_os_error(EADDRNOTAVAIL);
    for cand in ai.iter() {
        match tcp_connect1(cand, false) {
            Ok(sock) => return Ok(sock),
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// Resolves `host`/`service` and connects to the first reachable
/// candidate. Blocking; `family` is an `AF_*` constant.
pub fn tcp_connect(host: &str, service: &str, family: c_int) -> io::Result<Socket> {
    let ai = AddrInfo::lookup(Some(host), Some(service), SOCK_STREAM, family)?;
    tcp_connect_to(&ai)
}

/// Creates a passive socket bound to the local `service` port.
///
/// `service == None` binds an ephemeral port. The first passive
/// candidate is used.
pub fn tcp_listen(service: Option<&str>, family: c_int, backlog: c_int) -> io::Result<Socket> {
    let ai = AddrInfo::lookup_passive(service, SOCK_STREAM, family)?;
    let cand = ai.iter().next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no passive address candidate")
    })?;

    let fd = sys_socket(cand.ai_family, cand.ai_socktype, cand.ai_protocol)?;
    let sock = Socket { fd };
    sys_bind(fd, cand)?;
    sys_listen(fd, backlog)?;
    Ok(sock)
}
