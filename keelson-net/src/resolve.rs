//! A `getaddrinfo` front-end.
//!
//! The front-end answers as much as it can without the platform resolver:
//! hints are canonicalized (socket type and protocol imply each other),
//! numeric services are parsed directly, an absent node name synthesizes
//! the wildcard or loopback address per requested family, and node names
//! that are v4 or v6 literals become records immediately.  Only a real
//! host name reaches the platform `getaddrinfo`.
//!
//! Platform results are post-processed to paper over two resolver bugs
//! that are probed at run time on first use: some systems reject numeric
//! ports when no socket type is hinted, and some leave the protocol field
//! zero in every result.  Both probes latch once and are never re-run.
//!
//! An asynchronous delegator hands requests to a resolver implementation
//! registered once at startup, falling back to a blocking resolve whose
//! result is delivered through the same callback shape.

#![allow(unsafe_code)]

use crate::addr::{parse_ipv4, parse_ipv6_scope, v4_is_local, v6_is_local};
use crate::addrinfo::{infer_protocols, AddrInfoList, AI_KEELSON_ALLOCATED};
use once_cell::sync::OnceCell;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once, PoisonError};
use thiserror::Error;
use tracing::debug;

/// A numeric resolver error: the platform's `EAI_*` family plus the
/// library's cancellation sentinel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{}", describe(*.0))]
pub struct GaiError(pub i32);

impl GaiError {
    /// An in-flight asynchronous resolve was cancelled.  Chosen well
    /// below every platform code so it can never collide.
    pub const CANCELLED: GaiError = GaiError(-90001);

    pub fn code(&self) -> i32 {
        self.0
    }
}

fn describe(code: i32) -> Cow<'static, str> {
    match code {
        c if c == GaiError::CANCELLED.0 => Cow::Borrowed("request canceled"),
        0 => Cow::Borrowed("no error"),
        libc::EAI_AGAIN => Cow::Borrowed("temporary failure in name resolution"),
        libc::EAI_BADFLAGS => Cow::Borrowed("invalid value for ai_flags"),
        libc::EAI_FAIL => Cow::Borrowed("non-recoverable failure in name resolution"),
        libc::EAI_FAMILY => Cow::Borrowed("ai_family not supported"),
        libc::EAI_MEMORY => Cow::Borrowed("memory allocation failure"),
        libc::EAI_NONAME => Cow::Borrowed("nodename nor servname provided, or not known"),
        libc::EAI_SERVICE => Cow::Borrowed("servname not supported for ai_socktype"),
        libc::EAI_SOCKTYPE => Cow::Borrowed("ai_socktype not supported"),
        libc::EAI_SYSTEM => Cow::Borrowed("system error"),
        other => {
            // SAFETY: gai_strerror returns a static string or null.
            let msg = unsafe { libc::gai_strerror(other) };
            if msg.is_null() {
                return Cow::Owned(format!("unknown resolver error {other}"));
            }
            // SAFETY: non-null gai_strerror results are NUL-terminated.
            Cow::Owned(unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned())
        }
    }
}

/// Caller preferences for [`getaddrinfo`], mirroring the fields of a
/// platform `addrinfo` used as hints.  Zero everywhere means "anything".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub flags: i32,
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
}

impl Hints {
    /// Fill in whichever of socket type and protocol the other implies.
    pub(crate) fn infer_protocols(&mut self) {
        infer_protocols(&mut self.socktype, &mut self.protocol);
    }
}

fn parse_numeric_servname(servname: &str) -> Option<u16> {
    if servname.is_empty() {
        return None;
    }
    servname.parse::<u32>().ok().and_then(|n| u16::try_from(n).ok())
}

fn protocol_name(proto: i32) -> Option<String> {
    match proto {
        0 => None,
        libc::IPPROTO_TCP => Some("tcp".to_owned()),
        libc::IPPROTO_UDP => Some("udp".to_owned()),
        libc::IPPROTO_SCTP => Some("sctp".to_owned()),
        other => {
            let _guard = netdb_lock();
            // SAFETY: getprotobynumber returns a static entry or null.
            let ent = unsafe { libc::getprotobynumber(other) };
            if ent.is_null() {
                return None;
            }
            // SAFETY: p_name of a non-null entry is NUL-terminated.
            let name = unsafe { CStr::from_ptr((*ent).p_name) };
            name.to_str().ok().map(str::to_owned)
        }
    }
}

// getservbyname and getprotobynumber share static result buffers.
static NETDB_LOCK: Mutex<()> = Mutex::new(());

fn netdb_lock() -> std::sync::MutexGuard<'static, ()> {
    NETDB_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lookup_service(servname: &str, proto: Option<&str>) -> Option<u16> {
    let name = CString::new(servname).ok()?;
    let proto = match proto {
        Some(p) => Some(CString::new(p).ok()?),
        None => None,
    };
    let _guard = netdb_lock();
    // SAFETY: both pointers are NUL-terminated or null.
    let ent = unsafe {
        libc::getservbyname(
            name.as_ptr(),
            proto.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
        )
    };
    if ent.is_null() {
        return None;
    }
    // SAFETY: s_port of a non-null entry holds a big-endian port.
    Some(u16::from_be(unsafe { (*ent).s_port } as u16))
}

/// Resolve a service string to a port: decimal first, then the services
/// database unless `AI_NUMERICSERV` forbids it.
fn parse_servname(servname: &str, hints: &Hints) -> Option<u16> {
    if let Some(port) = parse_numeric_servname(servname) {
        return Some(port);
    }
    if hints.flags & libc::AI_NUMERICSERV == 0 {
        let proto = protocol_name(hints.protocol);
        return lookup_service(servname, proto.as_deref());
    }
    None
}

enum CommonOutcome {
    Done(AddrInfoList),
    /// A DNS lookup is still needed; carries the already-parsed port.
    NeedResolve(u16),
}

/// The part of a lookup that needs no resolver: hint canonicalization,
/// service parsing, null-nodename synthesis, and literal addresses.
fn getaddrinfo_common(
    nodename: Option<&str>,
    servname: Option<&str>,
    hints: &mut Hints,
) -> Result<CommonOutcome, GaiError> {
    if nodename.is_none() && servname.is_none() {
        return Err(GaiError(libc::EAI_NONAME));
    }
    if !matches!(
        hints.family,
        libc::AF_UNSPEC | libc::AF_INET | libc::AF_INET6
    ) {
        return Err(GaiError(libc::EAI_FAMILY));
    }
    hints.infer_protocols();

    let mut port = 0u16;
    if let Some(serv) = servname {
        port = parse_servname(serv, hints).ok_or(GaiError(libc::EAI_NONAME))?;
    }

    let Some(node) = nodename else {
        // No node name: bind to the wildcard, or connect to loopback.
        let passive = hints.flags & libc::AI_PASSIVE != 0;
        let mut list = AddrInfoList::empty();
        if hints.family != libc::AF_INET6 {
            let ip = if passive { Ipv4Addr::UNSPECIFIED } else { Ipv4Addr::LOCALHOST };
            let sa = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(ip, port)));
            let one = AddrInfoList::new(&sa, hints.socktype, hints.protocol)
                .ok_or(GaiError(libc::EAI_MEMORY))?;
            list = list.append(one);
        }
        if hints.family != libc::AF_INET {
            let ip = if passive { Ipv6Addr::UNSPECIFIED } else { Ipv6Addr::LOCALHOST };
            let sa = SockAddr::from(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)));
            let one = AddrInfoList::new(&sa, hints.socktype, hints.protocol)
                .ok_or(GaiError(libc::EAI_MEMORY))?;
            list = list.append(one);
        }
        return Ok(CommonOutcome::Done(list));
    };

    if hints.family == libc::AF_INET6 || hints.family == libc::AF_UNSPEC {
        if let Some((addr, scope)) = parse_ipv6_scope(node) {
            let sa = SockAddr::from(SocketAddr::V6(SocketAddrV6::new(addr, port, 0, scope)));
            let list = AddrInfoList::new(&sa, hints.socktype, hints.protocol)
                .ok_or(GaiError(libc::EAI_MEMORY))?;
            return Ok(CommonOutcome::Done(list));
        }
    }
    if hints.family == libc::AF_INET || hints.family == libc::AF_UNSPEC {
        if let Some(addr) = parse_ipv4(node) {
            let sa = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(addr, port)));
            let list = AddrInfoList::new(&sa, hints.socktype, hints.protocol)
                .ok_or(GaiError(libc::EAI_MEMORY))?;
            return Ok(CommonOutcome::Done(list));
        }
    }

    if hints.flags & libc::AI_NUMERICHOST != 0 {
        return Err(GaiError(libc::EAI_NONAME));
    }
    Ok(CommonOutcome::NeedResolve(port))
}

// Which address families have a non-local interface configured; filled
// lazily by check_interfaces and never re-checked.
static INTERFACE_PROBE: Once = Once::new();
static HAD_IPV4: AtomicBool = AtomicBool::new(false);
static HAD_IPV6: AtomicBool = AtomicBool::new(false);

fn note_interface_addr(sa: &SockAddr) {
    match sa.as_socket() {
        Some(SocketAddr::V4(v4)) if !v4_is_local(v4.ip()) => {
            debug!("detected an IPv4 interface");
            HAD_IPV4.store(true, Ordering::Relaxed);
        }
        Some(SocketAddr::V6(v6)) if !v6_is_local(v6.ip()) => {
            debug!("detected an IPv6 interface");
            HAD_IPV6.store(true, Ordering::Relaxed);
        }
        _ => {}
    }
}

fn check_ifaddrs() -> Result<(), ()> {
    let mut ifa: *mut libc::ifaddrs = ptr::null_mut();
    // SAFETY: getifaddrs fills in a list we free below.
    if unsafe { libc::getifaddrs(&mut ifa) } < 0 {
        return Err(());
    }
    let mut cur = ifa;
    while !cur.is_null() {
        // SAFETY: cur walks the live list returned by getifaddrs.
        let entry = unsafe { &*cur };
        if !entry.ifa_addr.is_null() {
            // SAFETY: ifa_addr points at a sockaddr of at most
            // sockaddr_storage size for the families we read.
            unsafe {
                let family = i32::from((*entry.ifa_addr).sa_family);
                let len = match family {
                    f if f == libc::AF_INET => {
                        std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
                    }
                    f if f == libc::AF_INET6 => {
                        std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
                    }
                    _ => 0,
                };
                if len != 0 {
                    let mut storage =
                        std::mem::MaybeUninit::<libc::sockaddr_storage>::zeroed();
                    ptr::copy_nonoverlapping(
                        entry.ifa_addr.cast::<u8>(),
                        storage.as_mut_ptr().cast::<u8>(),
                        len as usize,
                    );
                    note_interface_addr(&SockAddr::new(storage.assume_init(), len));
                }
            }
        }
        cur = entry.ifa_next;
    }
    // SAFETY: ifa came from getifaddrs.
    unsafe { libc::freeifaddrs(ifa) };
    Ok(())
}

/// Connect a UDP socket toward a fixed public address and look at the
/// local address the kernel picked.  No packet is sent; the route lookup
/// alone tells us whether the family is usable.
fn probe_route(domain: Domain, target: SocketAddr) {
    let probe = || -> std::io::Result<()> {
        let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        sock.connect(&SockAddr::from(target))?;
        note_interface_addr(&sock.local_addr()?);
        Ok(())
    };
    // Failure just means the family stays unavailable.
    let _ = probe();
}

fn check_interfaces() {
    INTERFACE_PROBE.call_once(|| {
        if check_ifaddrs().is_ok() {
            return;
        }
        probe_route(
            Domain::IPV4,
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(18, 244, 0, 188), 53)),
        );
        probe_route(
            Domain::IPV6,
            SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::new(0x2001, 0x4860, 0xb002, 0, 0, 0, 0, 0x68),
                53,
                0,
                0,
            )),
        );
    });
}

/// Under `AI_ADDRCONFIG` with an unspecified family, restrict the family
/// to the single one that has a non-local interface, if there is exactly
/// one.
pub(crate) fn adjust_hints_for_addrconfig(hints: &mut Hints) {
    if hints.flags & libc::AI_ADDRCONFIG == 0 || hints.family != libc::AF_UNSPEC {
        return;
    }
    check_interfaces();
    let v4 = HAD_IPV4.load(Ordering::Relaxed);
    let v6 = HAD_IPV6.load(Ordering::Relaxed);
    if v4 && !v6 {
        hints.family = libc::AF_INET;
    } else if !v4 && v6 {
        hints.family = libc::AF_INET6;
    }
}

// Two platform-resolver bugs probed on first use and latched for the
// life of the process: rejecting numeric ports without a socket-type
// hint, and returning results with the protocol left zero.
static QUIRK_PROBE: Once = Once::new();
static NEED_NUMERIC_PORT_HACK: AtomicBool = AtomicBool::new(false);
static NEED_SOCKTYPE_PROTOCOL_HACK: AtomicBool = AtomicBool::new(false);

unsafe fn list_has_protocol(mut ai: *const libc::addrinfo) -> bool {
    while !ai.is_null() {
        if (*ai).ai_protocol != 0 {
            return true;
        }
        ai = (*ai).ai_next;
    }
    false
}

fn probe_platform_quirks() {
    QUIRK_PROBE.call_once(|| {
        let hints = Hints {
            flags: libc::AI_NUMERICHOST | libc::AI_NUMERICSERV,
            ..Hints::default()
        };
        let with_port = platform_getaddrinfo(Some("1.2.3.4"), Some("80"), &hints);
        let portless = platform_getaddrinfo(Some("1.2.3.4"), None, &hints);
        let with_socktype = platform_getaddrinfo(
            Some("1.2.3.4"),
            Some("80"),
            &Hints { socktype: libc::SOCK_STREAM, ..hints },
        );

        if with_socktype.is_ok() && with_port.is_err() {
            NEED_NUMERIC_PORT_HACK.store(true, Ordering::Relaxed);
        }
        // SAFETY: the pointers come straight from the platform resolver.
        unsafe {
            let missing = match (&with_socktype, &portless) {
                (Ok(a), Ok(b)) => !list_has_protocol(*a) || !list_has_protocol(*b),
                _ => false,
            };
            if missing {
                NEED_SOCKTYPE_PROTOCOL_HACK.store(true, Ordering::Relaxed);
            }
            for list in [with_port, portless, with_socktype].into_iter().flatten() {
                libc::freeaddrinfo(list);
            }
        }
    });
}

fn need_numeric_port_hack() -> bool {
    probe_platform_quirks();
    NEED_NUMERIC_PORT_HACK.load(Ordering::Relaxed)
}

fn need_socktype_protocol_hack() -> bool {
    probe_platform_quirks();
    NEED_SOCKTYPE_PROTOCOL_HACK.load(Ordering::Relaxed)
}

fn platform_getaddrinfo(
    nodename: Option<&str>,
    servname: Option<&str>,
    hints: &Hints,
) -> Result<*mut libc::addrinfo, GaiError> {
    let node = match nodename {
        Some(n) => Some(CString::new(n).map_err(|_| GaiError(libc::EAI_NONAME))?),
        None => None,
    };
    let serv = match servname {
        Some(s) => Some(CString::new(s).map_err(|_| GaiError(libc::EAI_SERVICE))?),
        None => None,
    };
    // SAFETY: addrinfo is plain data; an all-zero value is a valid hint.
    let mut raw_hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    raw_hints.ai_flags = hints.flags & !AI_KEELSON_ALLOCATED;
    raw_hints.ai_family = hints.family;
    raw_hints.ai_socktype = hints.socktype;
    raw_hints.ai_protocol = hints.protocol;

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: every pointer is null or NUL-terminated, and res is
    // writable.
    let rc = unsafe {
        libc::getaddrinfo(
            node.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
            serv.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            &raw_hints,
            &mut res,
        )
    };
    if rc != 0 {
        return Err(GaiError(rc));
    }
    Ok(res)
}

/// Blocking name resolution with the semantics of `getaddrinfo(3)`.
///
/// Literal addresses, numeric services, and absent node names are
/// answered without touching the platform resolver, and the resulting
/// lists are library-allocated.  Anything else goes to the platform,
/// with post-processing for the probed quirks.
pub fn getaddrinfo(
    nodename: Option<&str>,
    servname: Option<&str>,
    hints: Option<&Hints>,
) -> Result<AddrInfoList, GaiError> {
    let mut hints = hints.copied().unwrap_or_default();
    adjust_hints_for_addrconfig(&mut hints);

    let port = match getaddrinfo_common(nodename, servname, &mut hints)? {
        CommonOutcome::Done(list) => return Ok(list),
        CommonOutcome::NeedResolve(port) => port,
    };

    let need_np_hack = need_numeric_port_hack()
        && hints.socktype == 0
        && servname.map_or(false, |s| parse_numeric_servname(s).is_some());
    let serv_for_platform = if need_np_hack { None } else { servname };
    if need_socktype_protocol_hack() {
        hints.infer_protocols();
    }

    let raw = platform_getaddrinfo(nodename, serv_for_platform, &hints)?;
    let mut list = if need_socktype_protocol_hack() {
        // Convert to a library-owned copy so the protocol fix never mixes
        // allocators within one list.
        // SAFETY: raw came from the platform resolver just above.
        unsafe { AddrInfoList::adopt_platform(raw) }.ok_or(GaiError(libc::EAI_MEMORY))?
    } else {
        // SAFETY: as above.
        unsafe { AddrInfoList::from_platform(raw) }
    };
    if need_np_hack {
        list.set_ports(port);
    }
    Ok(list)
}

/// Opaque identifier for an in-flight asynchronous resolve, minted by
/// the registered resolver implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveToken(pub u64);

pub type ResolveCallback = Box<dyn FnOnce(Result<AddrInfoList, GaiError>) + Send + 'static>;

/// A non-blocking resolver that upper layers may register once, before
/// threads start.
pub trait AsyncResolve: Send + Sync {
    /// Start a resolve; the callback fires exactly once.  Returns a
    /// token when the request can later be cancelled.
    fn resolve(
        &self,
        nodename: Option<&str>,
        servname: Option<&str>,
        hints: Option<&Hints>,
        callback: ResolveCallback,
    ) -> Option<ResolveToken>;

    /// Cancel an in-flight request; its callback fires with
    /// [`GaiError::CANCELLED`].
    fn cancel(&self, token: ResolveToken);
}

static ASYNC_RESOLVER: OnceCell<Box<dyn AsyncResolve>> = OnceCell::new();

/// Install the process-wide asynchronous resolver.  The first caller
/// wins; later calls return false and change nothing.
pub fn register_async_resolver(resolver: Box<dyn AsyncResolve>) -> bool {
    ASYNC_RESOLVER.set(resolver).is_ok()
}

/// Resolve through the registered asynchronous resolver, or fall back to
/// a blocking [`getaddrinfo`] whose result is delivered through the same
/// callback.  The fallback always returns `None`: there is nothing left
/// to cancel once the callback has run.
pub fn getaddrinfo_async(
    nodename: Option<&str>,
    servname: Option<&str>,
    hints: Option<&Hints>,
    callback: ResolveCallback,
) -> Option<ResolveToken> {
    if let Some(resolver) = ASYNC_RESOLVER.get() {
        return resolver.resolve(nodename, servname, hints, callback);
    }
    callback(getaddrinfo(nodename, servname, hints));
    None
}

/// Cancel an asynchronous resolve started by [`getaddrinfo_async`].
pub fn getaddrinfo_cancel_async(token: ResolveToken) {
    if let Some(resolver) = ASYNC_RESOLVER.get() {
        resolver.cancel(token);
    }
}
