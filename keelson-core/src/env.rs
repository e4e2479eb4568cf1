//! Environment lookups guarded against set-id execution.

#![allow(unsafe_code)]

use std::env;
use std::ffi::OsString;

/// True if the process looks like it is running set-uid or set-gid.
///
/// When the effective and real ids differ, environment variables are
/// attacker-controlled input and must not influence library behavior.
fn is_set_ugid() -> bool {
    // SAFETY: these getters cannot fail and take no pointers.
    unsafe { libc::getuid() != libc::geteuid() || libc::getgid() != libc::getegid() }
}

/// Read an environment variable, unless the process is set-uid or set-gid,
/// in which case every lookup reports absent.
pub fn secure_getenv(name: &str) -> Option<OsString> {
    if is_set_ugid() {
        return None;
    }
    env::var_os(name)
}
