//! Address-info lists with explicit allocation provenance.
//!
//! [`AddrInfoList`] owns a `struct addrinfo` chain that came from one of
//! two allocators: the platform `getaddrinfo` or this library.  Which one
//! is encoded in a reserved bit of `ai_flags` on every library node, so a
//! list can be released correctly by looking at its head.  A list is
//! always homogeneous; the resolver converts platform lists it needs to
//! edit structurally into library-owned copies instead of mixing nodes.
//!
//! Library nodes are a single allocation holding the `addrinfo` record
//! with its socket address in the same block, so a node frees in one
//! call.  Canonical names are separate C strings.

#![allow(unsafe_code)]

use socket2::SockAddr;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::CStr;
use std::marker::PhantomData;
use std::mem::{align_of, size_of, MaybeUninit};
use std::os::raw::c_char;
use std::ptr;

/// Flag bit marking an `addrinfo` node as allocated by this library
/// rather than by the platform resolver.
pub const AI_KEELSON_ALLOCATED: i32 = 0x8000_0000_u32 as i32;

const NATIVE_AI_FLAGS: i32 = libc::AI_PASSIVE
    | libc::AI_CANONNAME
    | libc::AI_NUMERICHOST
    | libc::AI_NUMERICSERV
    | libc::AI_ADDRCONFIG
    | libc::AI_ALL
    | libc::AI_V4MAPPED;

// The provenance bit must not collide with any flag the platform defines.
const _: () = assert!(NATIVE_AI_FLAGS & AI_KEELSON_ALLOCATED == 0);

fn node_layout(addrlen: libc::socklen_t) -> Layout {
    // A node is the addrinfo record followed by its sockaddr bytes.
    // sockaddr alignment never exceeds addrinfo alignment (both pointer
    // sized), so one layout covers the pair.
    let size = size_of::<libc::addrinfo>() + addrlen as usize;
    // SAFETY: size is small and nonzero, alignment is a power of two.
    unsafe { Layout::from_size_align_unchecked(size, align_of::<libc::addrinfo>()) }
}

/// Allocate one library node holding `sa` with the given type/protocol.
/// Returns null when the allocator fails.
unsafe fn alloc_node(sa: &SockAddr, socktype: i32, protocol: i32) -> *mut libc::addrinfo {
    let layout = node_layout(sa.len());
    let node = alloc_zeroed(layout).cast::<libc::addrinfo>();
    if node.is_null() {
        return node;
    }
    let addr = node.add(1).cast::<libc::sockaddr>();
    ptr::copy_nonoverlapping(sa.as_ptr().cast::<u8>(), addr.cast::<u8>(), sa.len() as usize);
    (*node).ai_flags = AI_KEELSON_ALLOCATED;
    (*node).ai_family = i32::from(sa.family());
    (*node).ai_socktype = socktype;
    (*node).ai_protocol = protocol;
    (*node).ai_addrlen = sa.len();
    (*node).ai_addr = addr;
    node
}

unsafe fn dup_cstring(s: *const c_char) -> Option<*mut c_char> {
    if s.is_null() {
        return Some(ptr::null_mut());
    }
    let len = CStr::from_ptr(s).to_bytes_with_nul().len();
    // SAFETY: len >= 1, alignment 1.
    let layout = Layout::from_size_align_unchecked(len, 1);
    let copy = alloc_zeroed(layout).cast::<c_char>();
    if copy.is_null() {
        return None;
    }
    ptr::copy_nonoverlapping(s, copy, len);
    Some(copy)
}

/// Free one library node, including its canonical-name string.
unsafe fn free_library_node(node: *mut libc::addrinfo) {
    debug_assert!((*node).ai_flags & AI_KEELSON_ALLOCATED != 0);
    if !(*node).ai_canonname.is_null() {
        let name = (*node).ai_canonname;
        let len = CStr::from_ptr(name).to_bytes_with_nul().len();
        dealloc(name.cast(), Layout::from_size_align_unchecked(len, 1));
    }
    dealloc(node.cast(), node_layout((*node).ai_addrlen));
}

/// An owned `addrinfo` chain.  Dropping it releases every node through
/// the allocator that produced the list.
pub struct AddrInfoList {
    head: *mut libc::addrinfo,
}

// The list is an owned chain of heap nodes with no thread affinity.
unsafe impl Send for AddrInfoList {}

impl AddrInfoList {
    pub(crate) fn empty() -> Self {
        AddrInfoList { head: ptr::null_mut() }
    }

    /// Take ownership of a chain returned by the platform resolver.
    ///
    /// # Safety
    /// `head` must come from the platform `getaddrinfo` and not be freed
    /// elsewhere.
    pub(crate) unsafe fn from_platform(head: *mut libc::addrinfo) -> Self {
        AddrInfoList { head }
    }

    /// Build a single-address list.  When both `socktype` and `protocol`
    /// are zero the caller gave no preference, so the address is listed
    /// twice, once stream/TCP and once datagram/UDP.  `None` means the
    /// allocator failed.
    pub(crate) fn new(sa: &SockAddr, socktype: i32, protocol: i32) -> Option<Self> {
        if socktype == 0 && protocol == 0 {
            // SAFETY: alloc_node only reads `sa`.
            let tcp = unsafe { alloc_node(sa, libc::SOCK_STREAM, libc::IPPROTO_TCP) };
            if tcp.is_null() {
                return None;
            }
            // SAFETY: as above.
            let udp = unsafe { alloc_node(sa, libc::SOCK_DGRAM, libc::IPPROTO_UDP) };
            if udp.is_null() {
                // SAFETY: tcp is a live library node.
                unsafe { free_library_node(tcp) };
                return None;
            }
            // SAFETY: tcp is live and owned here.
            unsafe { (*tcp).ai_next = udp };
            return Some(AddrInfoList { head: tcp });
        }
        // SAFETY: as above.
        let node = unsafe { alloc_node(sa, socktype, protocol) };
        if node.is_null() {
            return None;
        }
        Some(AddrInfoList { head: node })
    }

    /// Splice `tail` onto the end of this list.  Both lists must be
    /// library-owned (or empty).
    pub(crate) fn append(mut self, mut tail: AddrInfoList) -> AddrInfoList {
        if self.head.is_null() {
            return tail;
        }
        debug_assert!(tail.head.is_null() || tail.is_library_allocated());
        debug_assert!(self.is_library_allocated());
        let mut cur = self.head;
        // SAFETY: cur walks nodes this list owns.
        unsafe {
            while !(*cur).ai_next.is_null() {
                cur = (*cur).ai_next;
            }
            (*cur).ai_next = tail.head;
        }
        tail.head = ptr::null_mut();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// True when the list head carries the library-allocation tag.
    pub fn is_library_allocated(&self) -> bool {
        // SAFETY: head is a live node when non-null.
        !self.head.is_null() && unsafe { (*self.head).ai_flags } & AI_KEELSON_ALLOCATED != 0
    }

    pub fn iter(&self) -> AddrInfoIter<'_> {
        AddrInfoIter { cur: self.head, _list: PhantomData }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Install `port` on every v4/v6 record and drop records of any other
    /// family, where a numeric port makes no sense.
    pub(crate) fn set_ports(&mut self, port: u16) {
        let mut link: *mut *mut libc::addrinfo = &mut self.head;
        // SAFETY: link always points at a live next-pointer of this list.
        unsafe {
            while !(*link).is_null() {
                let node = *link;
                let sa = (*node).ai_addr;
                match if sa.is_null() { -1 } else { i32::from((*sa).sa_family) } {
                    af if af == libc::AF_INET => {
                        (*sa.cast::<libc::sockaddr_in>()).sin_port = port.to_be();
                        link = &mut (*node).ai_next;
                    }
                    af if af == libc::AF_INET6 => {
                        (*sa.cast::<libc::sockaddr_in6>()).sin6_port = port.to_be();
                        link = &mut (*node).ai_next;
                    }
                    _ => {
                        *link = (*node).ai_next;
                        (*node).ai_next = ptr::null_mut();
                        if (*node).ai_flags & AI_KEELSON_ALLOCATED != 0 {
                            free_library_node(node);
                        } else {
                            libc::freeaddrinfo(node);
                        }
                    }
                }
            }
        }
    }

    /// Deep-copy a platform chain into a library-owned list, inferring
    /// missing socket types and protocols on the way and expanding any
    /// record that still has neither into a stream/TCP and a datagram/UDP
    /// pair.  The platform chain is released before returning.  `None`
    /// means the allocator failed.
    pub(crate) unsafe fn adopt_platform(head: *mut libc::addrinfo) -> Option<Self> {
        let mut out = AddrInfoList::empty();
        let mut cur = head;
        while !cur.is_null() {
            let node = &*cur;
            let sa = node_sockaddr(node);
            let (mut socktype, mut protocol) = (node.ai_socktype, node.ai_protocol);
            infer_protocols(&mut socktype, &mut protocol);
            let Some(copied) = AddrInfoList::new(&sa, socktype, protocol) else {
                libc::freeaddrinfo(head);
                return None;
            };
            (*copied.head).ai_flags = (node.ai_flags & NATIVE_AI_FLAGS) | AI_KEELSON_ALLOCATED;
            let Some(name) = dup_cstring(node.ai_canonname) else {
                libc::freeaddrinfo(head);
                return None;
            };
            (*copied.head).ai_canonname = name;
            out = out.append(copied);
            cur = node.ai_next;
        }
        libc::freeaddrinfo(head);
        Some(out)
    }
}

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if self.head.is_null() {
            return;
        }
        // SAFETY: the list owns every node it links to, and a list is
        // homogeneous, so the head's tag decides the allocator for all.
        unsafe {
            if (*self.head).ai_flags & AI_KEELSON_ALLOCATED == 0 {
                libc::freeaddrinfo(self.head);
                return;
            }
            let mut cur = self.head;
            while !cur.is_null() {
                let next = (*cur).ai_next;
                free_library_node(cur);
                cur = next;
            }
        }
    }
}

impl std::fmt::Debug for AddrInfoList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a AddrInfoList {
    type Item = AddrInfoView<'a>;
    type IntoIter = AddrInfoIter<'a>;
    fn into_iter(self) -> AddrInfoIter<'a> {
        self.iter()
    }
}

unsafe fn node_sockaddr(node: &libc::addrinfo) -> SockAddr {
    let mut storage = MaybeUninit::<libc::sockaddr_storage>::zeroed();
    if !node.ai_addr.is_null() {
        ptr::copy_nonoverlapping(
            node.ai_addr.cast::<u8>(),
            storage.as_mut_ptr().cast::<u8>(),
            node.ai_addrlen as usize,
        );
    }
    SockAddr::new(storage.assume_init(), node.ai_addrlen)
}

pub(crate) fn infer_protocols(socktype: &mut i32, protocol: &mut i32) {
    if *protocol == 0 && *socktype != 0 {
        if *socktype == libc::SOCK_DGRAM {
            *protocol = libc::IPPROTO_UDP;
        } else if *socktype == libc::SOCK_STREAM {
            *protocol = libc::IPPROTO_TCP;
        }
    }
    if *socktype == 0 && *protocol != 0 {
        if *protocol == libc::IPPROTO_UDP {
            *socktype = libc::SOCK_DGRAM;
        } else if *protocol == libc::IPPROTO_TCP || *protocol == libc::IPPROTO_SCTP {
            *socktype = libc::SOCK_STREAM;
        }
    }
}

/// A borrowed view of one record in an [`AddrInfoList`].
#[derive(Clone, Copy)]
pub struct AddrInfoView<'a> {
    raw: &'a libc::addrinfo,
}

impl<'a> AddrInfoView<'a> {
    pub fn family(&self) -> i32 {
        self.raw.ai_family
    }

    pub fn socktype(&self) -> i32 {
        self.raw.ai_socktype
    }

    pub fn protocol(&self) -> i32 {
        self.raw.ai_protocol
    }

    pub fn flags(&self) -> i32 {
        self.raw.ai_flags
    }

    pub fn is_library_allocated(&self) -> bool {
        self.raw.ai_flags & AI_KEELSON_ALLOCATED != 0
    }

    pub fn sockaddr(&self) -> SockAddr {
        // SAFETY: the node keeps its sockaddr alive as long as the list.
        unsafe { node_sockaddr(self.raw) }
    }

    pub fn socket_addr(&self) -> Option<std::net::SocketAddr> {
        self.sockaddr().as_socket()
    }

    pub fn canonname(&self) -> Option<&'a str> {
        if self.raw.ai_canonname.is_null() {
            return None;
        }
        // SAFETY: canonname is a NUL-terminated string owned by the node.
        unsafe { CStr::from_ptr(self.raw.ai_canonname) }.to_str().ok()
    }
}

impl std::fmt::Debug for AddrInfoView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddrInfoView")
            .field("family", &self.family())
            .field("socktype", &self.socktype())
            .field("protocol", &self.protocol())
            .field("addr", &self.socket_addr())
            .finish()
    }
}

pub struct AddrInfoIter<'a> {
    cur: *const libc::addrinfo,
    _list: PhantomData<&'a AddrInfoList>,
}

impl<'a> Iterator for AddrInfoIter<'a> {
    type Item = AddrInfoView<'a>;

    fn next(&mut self) -> Option<AddrInfoView<'a>> {
        if self.cur.is_null() {
            return None;
        }
        // SAFETY: cur is a live node owned by the borrowed list.
        let raw = unsafe { &*self.cur };
        self.cur = raw.ai_next;
        Some(AddrInfoView { raw })
    }
}
