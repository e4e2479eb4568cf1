//! Monotonic time with a ratcheting wall-clock fallback.
//!
//! `clock_gettime(CLOCK_MONOTONIC)` is the portable way to measure
//! intervals, and Linux adds `CLOCK_MONOTONIC_COARSE`, which trades
//! millisecond resolution for a much cheaper read.  Some hosts have
//! neither working, so a timer can also run on the wall clock with a
//! trivial ratchet that folds backward jumps into a cumulative adjustment.
//! Whatever the backing, a single timer never reports a smaller value than
//! it already reported.

#![allow(unsafe_code)]

use std::io;
use std::mem::MaybeUninit;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How to choose a backing clock for a [`MonotonicTimer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonotonicFlags {
    /// Skip the coarse clock even when it is available.
    pub precise: bool,
    /// Skip every native clock and use the ratcheting wall-clock.
    pub fallback: bool,
}

impl MonotonicFlags {
    pub const PRECISE: Self = Self { precise: true, fallback: false };
    pub const FALLBACK: Self = Self { precise: false, fallback: true };
}

/// A source of non-decreasing microsecond-granularity timestamps.
///
/// Reads take `&mut self`, so sharing one timer between threads requires
/// external locking; a process may instead hold any number of independent
/// timers, each with its own ratchet state.
#[derive(Debug)]
pub struct MonotonicTimer {
    clock: Option<libc::clockid_t>,
    adjust: Duration,
    last: Duration,
}

fn clock_read(clock: libc::clockid_t) -> io::Result<Duration> {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: `ts` points at writable storage for one timespec.
    let rc = unsafe { libc::clock_gettime(clock, ts.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: clock_gettime succeeded, so `ts` is initialized.
    let ts = unsafe { ts.assume_init() };
    // Microsecond granularity, like the rest of the library.
    Ok(Duration::new(ts.tv_sec as u64, (ts.tv_nsec as u32 / 1000) * 1000))
}

fn clock_works(clock: libc::clockid_t) -> bool {
    clock_read(clock).is_ok()
}

impl MonotonicTimer {
    /// Pick a backing clock.  With default flags the coarse clock wins when
    /// it works; `precise` skips it; `fallback` forces the ratcheting wall
    /// clock.  Older kernels can expose a clock id that fails at runtime,
    /// which is why each candidate is probed with a real read.
    pub fn new(flags: MonotonicFlags) -> Self {
        let mut clock = None;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        if !flags.precise && !flags.fallback && clock_works(libc::CLOCK_MONOTONIC_COARSE) {
            clock = Some(libc::CLOCK_MONOTONIC_COARSE);
        }

        if clock.is_none() && !flags.fallback && clock_works(libc::CLOCK_MONOTONIC) {
            clock = Some(libc::CLOCK_MONOTONIC);
        }

        Self {
            clock,
            adjust: Duration::ZERO,
            last: Duration::ZERO,
        }
    }

    /// True when this timer runs on the ratcheting wall-clock fallback.
    pub fn is_fallback(&self) -> bool {
        self.clock.is_none()
    }

    /// Current time.  Values from one timer never decrease, though the
    /// fallback path is not guaranteed to be evenly paced while the wall
    /// clock is stepping backward.
    pub fn gettime(&mut self) -> io::Result<Duration> {
        match self.clock {
            Some(clock) => clock_read(clock),
            None => {
                let raw = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let raw = Duration::from_micros(raw.as_micros() as u64);
                Ok(self.ratchet(raw))
            }
        }
    }

    /// Fold a possibly-backward raw reading into the monotonic sequence.
    fn ratchet(&mut self, raw: Duration) -> Duration {
        let adjusted = raw + self.adjust;
        if adjusted < self.last {
            // Guess it wasn't monotonic after all.
            self.adjust += self.last - adjusted;
            return self.last;
        }
        self.last = adjusted;
        adjusted
    }
}

/// Convert a duration to whole milliseconds, rounding up.  `None` when the
/// result would not fit a signed millisecond count.
pub fn duration_to_msec(d: Duration) -> Option<i64> {
    const MAX_SECONDS_IN_MSEC: u64 = ((i64::MAX - 999) / 1000) as u64;
    if d.as_secs() > MAX_SECONDS_IN_MSEC {
        return None;
    }
    Some(d.as_secs() as i64 * 1000 + (i64::from(d.subsec_micros()) + 999) / 1000)
}
