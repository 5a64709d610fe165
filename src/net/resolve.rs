use crate::pollset::poller::platform::{
    sys_freeaddrinfo, sys_gai_strerror, sys_getaddrinfo, sys_numeric_nameinfo,
};

use libc::{addrinfo, c_int, AI_ADDRCONFIG, AI_PASSIVE};
use std::error::Error;
use std::ffi::CString;
use std::fmt;
use std::{io, mem};

/// A name-service failure, the "DNS" error category.
///
/// Carries the raw `EAI_*` code; `Display` renders the system's
/// `gai_strerror` text together with the lookup target. Always
/// delivered wrapped in an [`io::Error`].
#[derive(Debug)]
pub struct DnsError {
    code: c_int,
    target: String,
}

impl DnsError {
    /// The raw resolver error code.
    pub fn code(&self) -> c_int {
        self.code
    }
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DNS: {}: {}", self.target, sys_gai_strerror(self.code))
    }
}

impl Error for DnsError {}

pub(crate) fn dns_error(code: c_int, target: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, DnsError { code, target })
}

/// Lookup target rendered for diagnostics, `host:service` with
/// brackets around literal IPv6 hosts.
fn cat_host_service(host: Option<&str>, service: Option<&str>) -> String {
    let mut target = String::new();
    match host {
        Some(h) if h.contains(':') => {
            target.push('[');
            target.push_str(h);
            target.push(']');
        }
        Some(h) => target.push_str(h),
        None => target.push_str("localhost"),
    }
    if let Some(s) = service {
        target.push(':');
        target.push_str(s);
    }
    target
}

fn to_cstring(what: &str, s: Option<&str>) -> io::Result<Option<CString>> {
    s.map(|s| {
        CString::new(s).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{what} contains an interior NUL byte"),
            )
        })
    })
    .transpose()
}

/// An owned candidate list from `getaddrinfo(3)`.
///
/// Resolution is blocking. The list is released when the value drops;
/// candidates borrow from it and are tried in resolver order.
#[derive(Debug)]
pub struct AddrInfo {
    res: *mut addrinfo,
}

// The list is immutable after construction and freeaddrinfo is
// thread-agnostic.
unsafe impl Send for AddrInfo {}

impl AddrInfo {
    /// Resolves `host`/`service` into connect candidates.
    ///
    /// `host == None` resolves the loopback; `family` is an `AF_*`
    /// constant (`AF_UNSPEC` for either protocol).
    pub fn lookup(
        host: Option<&str>,
        service: Option<&str>,
        socktype: c_int,
        family: c_int,
    ) -> io::Result<AddrInfo> {
        Self::lookup_with_flags(host, service, socktype, family, AI_ADDRCONFIG)
    }

    /// Resolves a local address suitable for `bind`, the `AI_PASSIVE`
    /// variant of [`lookup`](Self::lookup).
    pub fn lookup_passive(
        service: Option<&str>,
        socktype: c_int,
        family: c_int,
    ) -> io::Result<AddrInfo> {
        Self::lookup_with_flags(
            None,
            service.or(Some("0")),
            socktype,
            family,
            AI_ADDRCONFIG | AI_PASSIVE,
        )
    }

    fn lookup_with_flags(
        host: Option<&str>,
        service: Option<&str>,
        socktype: c_int,
        family: c_int,
        flags: c_int,
    ) -> io::Result<AddrInfo> {
        let host_c = to_cstring("host", host)?;
        let service_c = to_cstring("service", service)?;

        let mut hints: addrinfo = unsafe { mem::zeroed() };
        hints.ai_socktype = socktype;
        hints.ai_family = family;
        hints.ai_flags = flags;

        match sys_getaddrinfo(host_c.as_deref(), service_c.as_deref(), &hints) {
            Ok(res) => Ok(AddrInfo { res }),
            Err(code) => Err(dns_error(code, cat_host_service(host, service))),
        }
    }

    /// Iterates the candidates in resolver order.
    pub fn iter(&self) -> impl Iterator<Item = &addrinfo> + '_ {
        let mut cur = self.res as *const addrinfo;
        std::iter::from_fn(move || {
            if cur.is_null() {
                return None;
            }
            let ai = unsafe { &*cur };
            cur = ai.ai_next;
            Some(ai)
        })
    }
}

impl Drop for AddrInfo {
    fn drop(&mut self) {
        sys_freeaddrinfo(self.res);
    }
}

/// Renders a candidate's address as numeric `(host, service)` strings.
pub fn get_numinfo(ai: &addrinfo) -> io::Result<(String, String)> {
    sys_numeric_nameinfo(ai.ai_addr, ai.ai_addrlen)
        .map_err(|code| dns_error(code, "getnameinfo".to_owned()))
}
