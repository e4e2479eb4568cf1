//! Wiping memory that held secrets.

#![allow(unsafe_code)]

use std::sync::atomic::{compiler_fence, Ordering};

/// Zero `buf` in a way the optimizer must not elide.
///
/// A plain `fill(0)` on a buffer that is about to go out of scope is a dead
/// store, and compilers delete dead stores.  Volatile writes followed by a
/// compiler fence keep the zeroing in the emitted code, so entropy buffers
/// and key material do not linger on the stack.
pub fn secure_memzero(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        // SAFETY: `b` is a valid, exclusive reference into `buf`.
        unsafe { std::ptr::write_volatile(b, 0) };
    }
    compiler_fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroes_every_byte() {
        let mut buf = *b"super secret keystream bytes";
        secure_memzero(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_buffer_is_fine() {
        let mut buf: [u8; 0] = [];
        secure_memzero(&mut buf);
    }
}
