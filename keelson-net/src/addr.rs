//! Textual address codec for IPv4 and IPv6.
//!
//! Parsing is deliberately hand-rolled rather than delegated to the
//! platform (or to `std`), because platform parsers disagree about edge
//! cases: some `inet_aton`s accept `"1.2.3"`, some accept stray signs, and
//! scope-id handling varies.  The grammar here is fixed: IPv4 is exactly
//! four decimal octets; IPv6 follows RFC 4291 textual forms including one
//! `::` compression and an optional embedded dotted quad; output follows
//! RFC 5952 (longest zero run compressed, lowercase hex).
//!
//! Scope identifiers (`%eth0`, `%2`) survive a parse/format round trip.

#![allow(unsafe_code)]

use keelson_core::ascii;
use socket2::SockAddr;
use std::cmp::Ordering;
use std::ffi::CString;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Parse a strict dotted quad: four decimal octets 0-255, nothing else.
/// No leading signs, no whitespace, no trailing bytes.
pub fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for slot in &mut octets {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(ascii::is_digit) {
            return None;
        }
        let value: u16 = part.parse().ok()?;
        *slot = u8::try_from(value).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}

/// Parse an IPv6 literal: up to eight 16-bit hex fields of at most four
/// digits, at most one `::`, optionally ending in an embedded dotted quad
/// that stands in for the last two fields.
pub fn parse_ipv6(s: &str) -> Option<Ipv6Addr> {
    let b = s.as_bytes();
    let mut words = [0u16; 8];
    let mut gap_pos: Option<usize> = None;
    let mut set_words = 0usize;

    // An embedded dotted quad claims the tail of the string, back to the
    // first non-digit before the first dot.
    let dot = s.find('.');
    let eow = match dot {
        Some(0) => return None,
        None => b.len(),
        Some(dot) => {
            let mut start = dot;
            while start > 0 && ascii::is_digit(b[start - 1]) {
                start -= 1;
            }
            let quad = parse_ipv4(&s[start..])?;
            let octets = quad.octets();
            words[6] = u16::from_be_bytes([octets[0], octets[1]]);
            words[7] = u16::from_be_bytes([octets[2], octets[3]]);
            set_words += 2;
            start
        }
    };

    let mut i = 0usize;
    let mut pos = 0usize;
    while pos < eow {
        if i > 7 {
            return None;
        }
        if ascii::is_xdigit(b[pos]) {
            let mut end = pos;
            while end < eow && ascii::is_xdigit(b[end]) {
                end += 1;
            }
            if end - pos > 4 {
                return None;
            }
            let mut value = 0u16;
            for &digit in &b[pos..end] {
                value = value << 4 | u16::from(ascii::hex_value(digit)?);
            }
            words[i] = value;
            i += 1;
            set_words += 1;
            pos = end;
            if pos != eow {
                if b[pos] != b':' {
                    return None;
                }
                pos += 1;
            }
        } else if b[pos] == b':' && i > 0 && gap_pos.is_none() {
            gap_pos = Some(i);
            pos += 1;
        } else if b[pos] == b':' && i == 0 && pos + 1 < b.len() && b[pos + 1] == b':'
            && gap_pos.is_none()
        {
            gap_pos = Some(0);
            pos += 2;
        } else {
            return None;
        }
    }

    match gap_pos {
        Some(_) if set_words >= 8 => return None,
        None if set_words != 8 => return None,
        _ => {}
    }

    if let Some(gap) = gap_pos {
        // Insert (8 - set_words) zero fields at the gap.  The embedded
        // quad already sits at fields 6 and 7 and never moves.
        let hex_after_gap = set_words - if dot.is_some() { 2 } else { 0 } - gap;
        let gap_len = 8 - set_words;
        words.copy_within(gap..gap + hex_after_gap, gap + gap_len);
        for w in &mut words[gap..gap + gap_len] {
            *w = 0;
        }
    }
    Some(Ipv6Addr::from(words))
}

/// Parse an IPv6 literal with an optional `%zone` suffix.  The zone is
/// resolved as an interface name first, then as a decimal index; either
/// way the index must be positive.  Returns scope id 0 when no zone is
/// present.
pub fn parse_ipv6_scope(s: &str) -> Option<(Ipv6Addr, u32)> {
    let Some((addr_part, zone)) = s.split_once('%') else {
        return parse_ipv6(s).map(|addr| (addr, 0));
    };
    let if_index = match interface_index(zone) {
        Some(idx) => idx,
        None => zone.parse::<u32>().ok().filter(|&idx| idx > 0)?,
    };
    parse_ipv6(addr_part).map(|addr| (addr, if_index))
}

fn interface_index(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `cname` is a valid NUL-terminated string for the call.
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    (idx != 0).then_some(idx)
}

/// Format an IPv4 address as `d.d.d.d`.
pub fn format_ipv4(addr: &Ipv4Addr) -> String {
    let o = addr.octets();
    format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
}

/// Format an IPv6 address: the longest run of two or more zero fields is
/// compressed to `::` (the earliest run wins ties), hex is lowercase, and
/// v4-mapped / v4-compatible addresses are printed with an embedded dotted
/// quad.
pub fn format_ipv6(addr: &Ipv6Addr) -> String {
    let words = addr.segments();
    let octets = addr.octets();

    // Embedded-v4 forms.  The `words[6] != 0 && words[7] != 0` condition
    // intentionally matches existing callers rather than the RFC: a
    // v4-compatible address with a zero word in its quad falls through to
    // plain hex formatting.
    if words[..5].iter().all(|&w| w == 0)
        && ((words[5] == 0 && words[6] != 0 && words[7] != 0) || words[5] == 0xffff)
    {
        let quad = format!(
            "{}.{}.{}.{}",
            octets[12], octets[13], octets[14], octets[15]
        );
        return if words[5] == 0 {
            format!("::{quad}")
        } else {
            format!("::ffff:{quad}")
        };
    }

    let mut longest: Option<(usize, usize)> = None; // (pos, len)
    let mut i = 0;
    while i < 8 {
        if words[i] == 0 {
            let start = i;
            while i < 8 && words[i] == 0 {
                i += 1;
            }
            let len = i - start;
            if len > longest.map_or(0, |(_, l)| l) {
                longest = Some((start, len));
            }
        } else {
            i += 1;
        }
    }
    let gap = longest.filter(|&(_, len)| len >= 2);

    let mut out = String::with_capacity(45);
    let mut i = 0;
    while i < 8 {
        if let Some((pos, len)) = gap {
            if i == pos {
                out.push_str(if i == 0 { "::" } else { ":" });
                i += len;
                continue;
            }
        }
        out.push_str(&format!("{:x}", words[i]));
        if i != 7 {
            out.push(':');
        }
        i += 1;
    }
    out
}

/// Parse one of `[v6]:port`, `[v6]`, `v6`, `v4:port`, `v4`.
///
/// An explicit port must be 1..=65535; no port means 0.  A bare string
/// containing more than one colon is treated as an IPv6 literal.  Scope
/// identifiers are carried into the returned address.
pub fn parse_sockaddr_port(s: &str) -> Option<SocketAddr> {
    let (addr_part, port_part, is_ipv6) = if let Some(rest) = s.strip_prefix('[') {
        let (inner, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p),
            None if tail.is_empty() => None,
            None => return None,
        };
        (inner, port, true)
    } else {
        match s.match_indices(':').count() {
            0 => (s, None, false),
            1 => {
                let (addr, port) = s.split_once(':')?;
                (addr, Some(port), false)
            }
            _ => (s, None, true),
        }
    };

    let port = match port_part {
        None => 0,
        Some(p) => {
            let port: u32 = p.parse().ok()?;
            if port == 0 || port > 65535 {
                return None;
            }
            port as u16
        }
    };

    if is_ipv6 {
        let (addr, scope) = parse_ipv6_scope(addr_part)?;
        Some(SocketAddr::V6(SocketAddrV6::new(addr, port, 0, scope)))
    } else {
        let addr = parse_ipv4(addr_part)?;
        Some(SocketAddr::V4(SocketAddrV4::new(addr, port)))
    }
}

/// Format an address-and-port pair: `a.b.c.d:port` or `[v6]:port`.
pub fn format_addr_port(sa: &SocketAddr) -> String {
    match sa {
        SocketAddr::V4(v4) => format!("{}:{}", format_ipv4(v4.ip()), v4.port()),
        SocketAddr::V6(v6) => format!("[{}]:{}", format_ipv6(v6.ip()), v6.port()),
    }
}

/// [`format_addr_port`] over a raw socket address; families this codec
/// does not understand come out as `<addr with socktype N>`.
pub fn format_sockaddr_port(sa: &SockAddr) -> String {
    match sa.as_socket() {
        Some(addr) => format_addr_port(&addr),
        None => format!("<addr with socktype {}>", sa.family()),
    }
}

/// Order two socket addresses: family first, then address bytes (IPv4 by
/// 32-bit value, IPv6 bytewise), then the port when `include_port`.  The
/// ordering is only meaningful within one address family.
pub fn sockaddr_cmp(sa1: &SockAddr, sa2: &SockAddr, include_port: bool) -> Ordering {
    match sa1.family().cmp(&sa2.family()) {
        Ordering::Equal => {}
        other => return other,
    }
    match (sa1.as_socket(), sa2.as_socket()) {
        (Some(SocketAddr::V4(a)), Some(SocketAddr::V4(b))) => {
            u32::from(*a.ip())
                .cmp(&u32::from(*b.ip()))
                .then(if include_port {
                    a.port().cmp(&b.port())
                } else {
                    Ordering::Equal
                })
        }
        (Some(SocketAddr::V6(a)), Some(SocketAddr::V6(b))) => a
            .ip()
            .octets()
            .cmp(&b.ip().octets())
            .then(if include_port {
                a.port().cmp(&b.port())
            } else {
                Ordering::Equal
            }),
        // Same unknown family: no byte-level order is defined.
        _ => Ordering::Greater,
    }
}

/// True for IPv4 addresses that cannot identify this host to a remote
/// peer: unspecified, loopback, link-local (RFC 3927), or class D.
pub fn v4_is_local(addr: &Ipv4Addr) -> bool {
    let a = u32::from(*addr);
    a == 0 || a >> 24 == 127 || (a & 0xffff_0000) == 0xa9fe_0000 || (a >> 24) & 0xf0 == 0xe0
}

/// True for IPv6 addresses that cannot identify this host to a remote
/// peer: high 8 bytes zero (unspecified, loopback, v4-embedded),
/// unique-local fc00::/7, link-local fe80::/10, site-local fec0::/10, or
/// multicast ff00::/8.
pub fn v6_is_local(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[..8].iter().all(|&b| b == 0)
        || (o[0] & 0xfe) == 0xfc
        || (o[0] == 0xfe && (o[1] & 0xc0) == 0x80)
        || (o[0] == 0xfe && (o[1] & 0xc0) == 0xc0)
        || o[0] == 0xff
}

/// True when the address is 127.0.0.0/8 or `::1`.
pub fn sockaddr_is_loopback(sa: &SockAddr) -> bool {
    match sa.as_socket() {
        Some(SocketAddr::V4(v4)) => u32::from(*v4.ip()) >> 24 == 127,
        Some(SocketAddr::V6(v6)) => *v6.ip() == Ipv6Addr::LOCALHOST,
        None => false,
    }
}
