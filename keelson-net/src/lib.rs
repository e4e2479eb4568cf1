//! Keelson Net
//!
//! The platform-facing half of the keelson support library:
//! - Textual address codec for IPv4/IPv6, with scope identifiers, combined
//!   address-and-port forms, an address comparator, and locality tests
//!   (`addr`)
//! - Socket-configuration helpers sharing one blocking/error convention
//!   (`socket`)
//! - Address-info lists with explicit allocation provenance (`addrinfo`)
//! - A `getaddrinfo` front-end with literal fast paths and runtime
//!   workarounds for buggy platform resolvers (`resolve`)
//!
//! Raw descriptor and `libc` access is confined to the modules that need
//! it; everything is synchronous and safe to call from multiple threads
//! unless a type says otherwise.

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod addrinfo;
pub mod resolve;
pub mod socket;

// Minimal prelude for downstream crates.
pub mod prelude {
    pub use crate::addr::{
        format_sockaddr_port, parse_ipv4, parse_ipv6, parse_ipv6_scope, parse_sockaddr_port,
        sockaddr_cmp,
    };
    pub use crate::addrinfo::{AddrInfoList, AddrInfoView};
    pub use crate::resolve::{getaddrinfo, GaiError, Hints};
    pub use crate::socket::{
        make_internal_pipe, make_socket_closeonexec, make_socket_nonblocking, socket_connect,
        ConnectProgress,
    };
}
