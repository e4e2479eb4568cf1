//! # Keelson
//!
//! Portable utilities for event-driven networking code: a secure random
//! stream, monotonic timekeeping, a strict textual IP address codec, a
//! `getaddrinfo` front-end, and socket-configuration helpers.
//!
//! ## Architecture
//!
//! Keelson is split into small implementation crates with one public
//! surface:
//!
//! - **`keelson-core`**: process-local utilities with no network surface:
//!   secure and weak random number generators, monotonic timers, ASCII
//!   classification, date formatting, memory and environment hygiene
//! - **`keelson-net`**: the platform-facing half: address parsing and
//!   formatting, address-info lists, the resolver front-end, socket
//!   helpers
//! - **`keelson`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ### Parse and format addresses
//!
//! ```rust
//! use keelson::prelude::*;
//!
//! let sa = parse_sockaddr_port("[2001:db8::1]:443").unwrap();
//! assert_eq!(sa.port(), 443);
//!
//! let v6 = parse_ipv6("2001:0DB8:0:0:0:0:0:1").unwrap();
//! assert_eq!(keelson::addr::format_ipv6(&v6), "2001:db8::1");
//! ```
//!
//! ### Resolve a name
//!
//! ```rust,no_run
//! use keelson::prelude::*;
//!
//! let hints = Hints { socktype: libc::SOCK_STREAM, ..Hints::default() };
//! let list = getaddrinfo(Some("example.com"), Some("443"), Some(&hints))?;
//! for record in &list {
//!     println!("{:?}", record.socket_addr());
//! }
//! # Ok::<(), GaiError>(())
//! ```
//!
//! ### Draw random bytes
//!
//! ```rust
//! let mut key = [0u8; 32];
//! keelson::entropy::secure_rng_get_bytes(&mut key);
//! ```
//!
//! ## Safety
//!
//! `unsafe` code is confined to the modules that talk to the platform:
//! descriptor configuration, `addrinfo` ownership, and the libc clock and
//! entropy calls.  The address codec, both RNG keystreams, and the timer
//! arithmetic are safe Rust.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use keelson_core::{ascii, date, entropy, env, fs, mem, time, weak_rand};
pub use keelson_net::{addr, addrinfo, resolve, socket};

pub mod dev_tracing;

/// The most commonly used names from every module.
pub mod prelude {
    pub use keelson_core::prelude::*;
    pub use keelson_net::prelude::*;
}
