use libc::{
    addrinfo, c_int, nfds_t, pollfd, sighandler_t, sockaddr, sockaddr_storage, socklen_t,
    CLOCK_MONOTONIC, FD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, NI_MAXHOST, NI_NUMERICHOST,
    NI_NUMERICSERV, O_NONBLOCK, SIG_DFL,
};

// Not exposed by this version of the `libc` crate; value matches glibc's netdb.h.
const NI_MAXSERV: usize = 32;
use log::error;
use std::ffi::CStr;
use std::os::fd::RawFd;
use std::{io, mem, ptr};

/// Waits for readiness on a set of descriptors using `poll(2)`.
///
/// `timeout_ms` follows the poll convention: `-1` blocks indefinitely,
/// `0` returns immediately. Returns the number of entries with non-zero
/// `revents`.
pub(crate) fn sys_poll(fds: &mut [pollfd], timeout_ms: c_int) -> io::Result<usize> {
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Creates a pipe, returning `(read_end, write_end)`.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read, or a negative value on error.
/// The file descriptor **must** be non-blocking.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written, or a negative value on error.
/// Async-signal-safe: a single `write(2)` call, nothing else.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { libc::write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

/// Closes a file descriptor, retrying on EINTR.
///
/// Other close errors are logged and swallowed; there is nothing a
/// caller can do with them at teardown.
pub(crate) fn sys_really_close(fd: RawFd) {
    loop {
        let rc = unsafe { libc::close(fd) };
        if rc == 0 {
            return;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            error!("close({fd}): {err}");
            return;
        }
    }
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Current monotonic time in whole milliseconds.
pub(crate) fn sys_now_ms() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) cannot fail");
    ts.tv_sec as i64 * 1_000 + ts.tv_nsec as i64 / 1_000_000
}

/// Installs `handler` as the disposition for `sig`.
pub(crate) fn sys_signal_handler(sig: c_int, handler: extern "C" fn(c_int)) -> io::Result<()> {
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = handler as usize as sighandler_t;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    sa.sa_flags = 0;

    let rc = unsafe { libc::sigaction(sig, &sa, ptr::null_mut()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Restores the default disposition for `sig`.
pub(crate) fn sys_signal_default(sig: c_int) -> io::Result<()> {
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = SIG_DFL;
    unsafe { libc::sigemptyset(&mut sa.sa_mask) };
    sa.sa_flags = 0;

    let rc = unsafe { libc::sigaction(sig, &sa, ptr::null_mut()) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Re-raises `sig` against the current process.
pub(crate) fn sys_raise(sig: c_int) {
    unsafe { libc::raise(sig) };
}

/// Creates a blocking stream socket for the given candidate address.
pub(crate) fn sys_socket(family: c_int, socktype: c_int, protocol: c_int) -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(family, socktype, protocol) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// Binds a socket to the address of a resolver candidate.
pub(crate) fn sys_bind(fd: RawFd, ai: &addrinfo) -> io::Result<()> {
    let rc = unsafe { libc::bind(fd, ai.ai_addr, ai.ai_addrlen) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    let rc = unsafe { libc::listen(fd, backlog) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Initiates a connection to the address of a resolver candidate.
pub(crate) fn sys_connect(fd: RawFd, ai: &addrinfo) -> io::Result<()> {
    let rc = unsafe { libc::connect(fd, ai.ai_addr, ai.ai_addrlen) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Returns the local address a socket is bound to.
pub(crate) fn sys_getsockname(fd: RawFd) -> io::Result<(sockaddr_storage, socklen_t)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok((storage, len))
    }
}

/// Resolves a host/service pair with `getaddrinfo(3)`.
///
/// On success the caller owns the returned list and must release it
/// with [`sys_freeaddrinfo`]. On failure the raw `EAI_*` code is
/// returned for the caller to classify.
pub(crate) fn sys_getaddrinfo(
    host: Option<&CStr>,
    service: Option<&CStr>,
    hints: &addrinfo,
) -> Result<*mut addrinfo, c_int> {
    let mut res: *mut addrinfo = ptr::null_mut();
    let err = unsafe {
        libc::getaddrinfo(
            host.map_or(ptr::null(), |h| h.as_ptr()),
            service.map_or(ptr::null(), |s| s.as_ptr()),
            hints,
            &mut res,
        )
    };
    if err != 0 {
        Err(err)
    } else {
        Ok(res)
    }
}

/// Releases a list returned by [`sys_getaddrinfo`].
pub(crate) fn sys_freeaddrinfo(res: *mut addrinfo) {
    if !res.is_null() {
        unsafe { libc::freeaddrinfo(res) };
    }
}

/// Renders a socket address as numeric host and service strings.
pub(crate) fn sys_numeric_nameinfo(
    sa: *const sockaddr,
    salen: socklen_t,
) -> Result<(String, String), c_int> {
    let mut hostbuf = [0 as libc::c_char; NI_MAXHOST as usize];
    let mut servbuf = [0 as libc::c_char; NI_MAXSERV as usize];

    let err = unsafe {
        libc::getnameinfo(
            sa,
            salen,
            hostbuf.as_mut_ptr(),
            hostbuf.len() as socklen_t,
            servbuf.as_mut_ptr(),
            servbuf.len() as socklen_t,
            NI_NUMERICHOST | NI_NUMERICSERV,
        )
    };
    if err != 0 {
        return Err(err);
    }

    let host = unsafe { CStr::from_ptr(hostbuf.as_ptr()) };
    let serv = unsafe { CStr::from_ptr(servbuf.as_ptr()) };
    Ok((
        host.to_string_lossy().into_owned(),
        serv.to_string_lossy().into_owned(),
    ))
}

/// Human-readable text for a `getaddrinfo`/`getnameinfo` failure code.
pub(crate) fn sys_gai_strerror(code: c_int) -> String {
    let msg = unsafe { libc::gai_strerror(code) };
    if msg.is_null() {
        return format!("unknown resolver error {code}");
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}
