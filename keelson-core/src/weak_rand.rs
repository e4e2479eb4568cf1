//! A weak, fast pseudo-random generator for non-security uses.
//!
//! This is a linear congruential generator with modulus 2^31, multiplier
//! 1103515245, and addend 12345 (the same parameters OpenBSD and glibc's
//! TYPE_0 generator use).  It is not an industrial-strength RNG: the low
//! bits have short periods, which is why [`WeakRng::range`] divides instead
//! of taking a remainder.  For anything security-sensitive, use
//! [`crate::entropy`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Largest value [`WeakRng::next`] can return.
pub const WEAKRAND_MAX: i32 = 0x7fff_ffff;

/// Single-threaded LCG state.  Cheap to create; not `Sync`.
#[derive(Debug, Clone)]
pub struct WeakRng {
    seed: u32,
}

impl WeakRng {
    /// Create a generator from `seed`.  A zero seed is replaced with a mix
    /// of wall-clock seconds, microseconds, and the process id, so that two
    /// zero-seeded generators in different processes diverge.
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { Self::auto_seed() } else { seed };
        Self { seed }
    }

    fn auto_seed() -> u32 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let pid = std::process::id();
        (now.as_secs() as u32)
            .wrapping_add(now.subsec_micros())
            .wrapping_add(pid)
    }

    /// The seed actually in use (useful for logging a replayable value).
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Next value in `0..=WEAKRAND_MAX`.
    pub fn next(&mut self) -> i32 {
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12345) & 0x7fff_ffff;
        self.seed as i32
    }

    /// Uniform value in `0..top`.
    ///
    /// Dividing by `WEAKRAND_MAX / top` and rejecting overlarge results
    /// keeps the low-bit periodicity of the LCG out of the output; a plain
    /// `next() % top` would expose it whenever `top` is even.
    ///
    /// # Panics
    ///
    /// Panics if `top` is not in `1..=WEAKRAND_MAX`.
    pub fn range(&mut self, top: i32) -> i32 {
        assert!(top > 0, "range top must be positive");
        let divisor = WEAKRAND_MAX / top;
        loop {
            let result = self.next() / divisor;
            if result < top {
                return result;
            }
        }
    }
}

impl Default for WeakRng {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_deterministic_for_fixed_seed() {
        let mut a = WeakRng::new(12345);
        let mut b = WeakRng::new(12345);
        for _ in 0..100 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn zero_seed_is_replaced() {
        let rng = WeakRng::new(0);
        assert_ne!(rng.seed(), 0);
    }

    #[test]
    fn next_is_nonnegative_31_bit() {
        let mut rng = WeakRng::new(7);
        for _ in 0..10_000 {
            let v = rng.next();
            assert!((0..=WEAKRAND_MAX).contains(&v));
        }
    }

    #[test]
    fn range_stays_in_bounds() {
        let mut rng = WeakRng::new(99);
        for top in [1, 2, 3, 7, 100, 1 << 20, WEAKRAND_MAX] {
            for _ in 0..200 {
                let v = rng.range(top);
                assert!((0..top).contains(&v), "top={top} v={v}");
            }
        }
    }

    #[test]
    fn range_is_roughly_uniform() {
        // Chi-squared-ish sanity check: with 10 buckets and 50k samples the
        // expected count is 5000 per bucket; allow a generous 10% band.
        let mut rng = WeakRng::new(424_242);
        const TOP: i32 = 10;
        const SAMPLES: usize = 50_000;
        let mut buckets = [0usize; TOP as usize];
        for _ in 0..SAMPLES {
            buckets[rng.range(TOP) as usize] += 1;
        }
        let expected = SAMPLES / TOP as usize;
        for (i, &count) in buckets.iter().enumerate() {
            assert!(
                count > expected * 9 / 10 && count < expected * 11 / 10,
                "bucket {i} count {count} out of tolerance"
            );
        }
    }
}
