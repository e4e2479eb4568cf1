//! Keelson Core
//!
//! This crate contains the platform-independent leaves of the keelson
//! support library:
//! - Locale-independent ASCII classification and case folding (`ascii`)
//! - A weak linear-congruential RNG for non-security uses (`weak_rand`)
//! - A seeded stream-cipher RNG with reseeding and fork detection (`entropy`)
//! - A monotonic timer with a ratcheting wall-clock fallback (`time`)
//! - Small utilities: secure memory wipe (`mem`), set-id-guarded environment
//!   reads (`env`), whole-file slurping (`fs`), RFC 1123 dates (`date`)
//!
//! Nothing here sits on a hot event-dispatch path; these are the primitives
//! an event loop, resolver, or buffered-I/O layer builds on.

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod ascii;
pub mod date;
pub mod entropy;
pub mod env;
pub mod fs;
pub mod mem;
pub mod time;
pub mod weak_rand;

// Minimal prelude for downstream crates.  Keep it small to avoid API lock-in.
pub mod prelude {
    pub use crate::date::date_rfc1123;
    pub use crate::entropy::{
        secure_rng_add_bytes, secure_rng_get_bytes, secure_rng_init,
        secure_rng_set_urandom_path,
    };
    pub use crate::mem::secure_memzero;
    pub use crate::time::{MonotonicFlags, MonotonicTimer};
    pub use crate::weak_rand::WeakRng;
}
