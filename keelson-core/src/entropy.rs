//! A seeded stream-cipher pseudo-random generator.
//!
//! The generator is an RC4-style byte permutation seeded from the OS,
//! reseeded every 1.6 million emitted bytes, and reseeded immediately when
//! the process id changes (so a fork never yields two processes emitting
//! the same keystream).  All operations serialize on one process-wide lock.
//!
//! This is good enough for transaction ids, DNS cookies, and port
//! randomization.  It is **not** sufficient for serious cryptographic use:
//! RC4 keystream bias is well documented, and the pool falls back to an
//! unseeded permutation when every entropy source fails.

#![allow(unsafe_code)]

use crate::fs::open_cloexec;
use crate::mem::secure_memzero;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Platform entropy is mixed in 32 bytes (256 bits) at a time.
const ADD_ENTROPY: usize = 32;

/// Reseed from the platform after emitting this many bytes.
const BYTES_BEFORE_RESEED: i64 = 1_600_000;

/// Early-keystream bytes to discard after seeding.  Mironov's "(Not So)
/// Random Shuffles of RC4" suggests at least 2*256; 12*256 is the
/// conservative choice.
const KEYSTREAM_DISCARD: usize = 12 * 256;

const DEVICE_CANDIDATES: [&str; 3] = ["/dev/srandom", "/dev/urandom", "/dev/random"];
const KERNEL_UUID_FILE: &str = "/proc/sys/kernel/random/uuid";

/// The byte-permutation stream cipher itself, free of any seeding policy.
struct ArcFour {
    i: u8,
    j: u8,
    s: [u8; 256],
}

impl ArcFour {
    fn new() -> Self {
        let mut s = [0u8; 256];
        for (n, slot) in s.iter_mut().enumerate() {
            *slot = n as u8;
        }
        Self { i: 0, j: 0, s }
    }

    /// Mix `dat` into the permutation with one full 256-step pass.  Only
    /// the first 256 bytes of `dat` are consulted; callers with more data
    /// run one pass per chunk.
    fn add_random(&mut self, dat: &[u8]) {
        debug_assert!(!dat.is_empty());
        self.i = self.i.wrapping_sub(1);
        for n in 0..256usize {
            self.i = self.i.wrapping_add(1);
            let si = self.s[usize::from(self.i)];
            self.j = self
                .j
                .wrapping_add(si)
                .wrapping_add(dat[n % dat.len()]);
            self.s[usize::from(self.i)] = self.s[usize::from(self.j)];
            self.s[usize::from(self.j)] = si;
        }
        self.j = self.i;
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        let si = self.s[usize::from(self.i)];
        self.j = self.j.wrapping_add(si);
        let sj = self.s[usize::from(self.j)];
        self.s[usize::from(self.i)] = sj;
        self.s[usize::from(self.j)] = si;
        self.s[usize::from(si.wrapping_add(sj))]
    }
}

struct SecureRng {
    pool: ArcFour,
    initialized: bool,
    countdown: i64,
    stir_pid: u32,
    urandom_path: Option<PathBuf>,
}

static RNG: Lazy<Mutex<SecureRng>> = Lazy::new(|| {
    Mutex::new(SecureRng {
        pool: ArcFour::new(),
        initialized: false,
        countdown: 0,
        stir_pid: 0,
        urandom_path: None,
    })
});

fn all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

impl SecureRng {
    /// Mix 32 bytes from the getrandom(2) syscall.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn seed_getrandom(&mut self) -> bool {
        let mut buf = [0u8; ADD_ENTROPY];
        let mut filled = 0usize;
        while filled < buf.len() {
            // SAFETY: the pointer/length pair describes the unfilled tail
            // of a live stack buffer.
            let r = unsafe {
                libc::getrandom(
                    buf.as_mut_ptr().add(filled).cast(),
                    buf.len() - filled,
                    0,
                )
            };
            if r <= 0 {
                return false;
            }
            filled += r as usize;
        }
        // A degenerate RNG on the other side could hand back zeroes and
        // claim success; refuse to count that as entropy.
        if all_zero(&buf) {
            return false;
        }
        self.pool.add_random(&buf);
        secure_memzero(&mut buf);
        true
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn seed_getrandom(&mut self) -> bool {
        false
    }

    fn seed_device_from(&mut self, path: &Path) -> bool {
        let mut buf = [0u8; ADD_ENTROPY];
        let ok = (|| {
            let mut file = open_cloexec(path).ok()?;
            file.read_exact(&mut buf).ok()?;
            Some(())
        })()
        .is_some()
            && !all_zero(&buf);
        if ok {
            self.pool.add_random(&buf);
        }
        secure_memzero(&mut buf);
        ok
    }

    /// Mix 32 bytes from a random character device: the user-override path
    /// if one was set, otherwise the first built-in candidate that works.
    fn seed_device(&mut self) -> bool {
        if let Some(path) = self.urandom_path.clone() {
            return self.seed_device_from(&path);
        }
        DEVICE_CANDIDATES
            .iter()
            .any(|name| self.seed_device_from(Path::new(name)))
    }

    /// Occasionally somebody makes /proc/sys readable in a chroot but not
    /// /dev/urandom.  The uuid pseudo-file is hex with punctuation, so
    /// decode nybbles and keep reading until 32 bytes have been mixed.
    fn seed_kernel_uuid(&mut self) -> bool {
        let mut mixed = 0usize;
        while mixed < ADD_ENTROPY {
            let mut text = [0u8; 128];
            let n = match open_cloexec(Path::new(KERNEL_UUID_FILE))
                .and_then(|mut f| f.read(&mut text))
            {
                Ok(0) | Err(_) => return false,
                Ok(n) => n,
            };
            let mut entropy = [0u8; 64];
            let mut nybbles = 0usize;
            for &b in &text[..n] {
                if let Some(nyb) = crate::ascii::hex_value(b) {
                    if nybbles & 1 == 1 {
                        entropy[nybbles / 2] |= nyb;
                    } else {
                        entropy[nybbles / 2] |= nyb << 4;
                    }
                    nybbles += 1;
                }
            }
            if nybbles < 2 {
                return false;
            }
            self.pool.add_random(&entropy[..nybbles / 2]);
            mixed += nybbles / 2;
            secure_memzero(&mut entropy);
            secure_memzero(&mut text);
        }
        true
    }

    /// Try every entropy source; do not stop at the first success.  There
    /// is no harm in over-seeding, and any one source could be broken.
    /// Fails only when every source failed.
    fn seed(&mut self) -> bool {
        let mut ok = false;
        if self.seed_getrandom() {
            ok = true;
        }
        if self.seed_device() {
            ok = true;
        }
        if self.urandom_path.is_none() && self.seed_kernel_uuid() {
            ok = true;
        }
        ok
    }

    fn stir(&mut self) -> bool {
        if !self.initialized {
            self.pool = ArcFour::new();
            self.initialized = true;
        }
        if !self.seed() {
            return false;
        }
        // Discard early keystream, per Fluhrer/Mantin/Shamir and Mironov.
        for _ in 0..KEYSTREAM_DISCARD {
            self.pool.next_byte();
        }
        self.countdown = BYTES_BEFORE_RESEED;
        true
    }

    fn stir_if_needed(&mut self) {
        let pid = std::process::id();
        if self.countdown <= 0 || !self.initialized || self.stir_pid != pid {
            self.stir_pid = pid;
            self.stir();
        }
    }

    fn get_bytes(&mut self, buf: &mut [u8]) {
        self.stir_if_needed();
        for b in buf.iter_mut() {
            self.countdown -= 1;
            if self.countdown <= 0 {
                self.stir();
            }
            *b = self.pool.next_byte();
        }
    }

    fn add_bytes(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if !self.initialized {
            self.stir();
        }
        // One mix pass only reads 256 bytes, so walk the input in 256-byte
        // strides; nothing the caller hands us gets silently discarded.
        let mut off = 0;
        while off < data.len() {
            self.pool.add_random(&data[off..]);
            off += 256;
        }
    }
}

/// Seed the generator now, returning an error if every entropy source
/// failed.  Calling this is optional; generation seeds lazily.
pub fn secure_rng_init() -> io::Result<()> {
    let mut rng = RNG.lock();
    if rng.stir() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            "every entropy source failed",
        ))
    }
}

/// Fill `buf` with keystream bytes.  Never fails: if seeding fails the
/// pool still holds a permutation, just not a well-seeded one.
pub fn secure_rng_get_bytes(buf: &mut [u8]) {
    RNG.lock().get_bytes(buf);
}

/// Mix caller-provided bytes into the pool.  Useful for stirring in
/// application-specific entropy; never weakens the pool.
pub fn secure_rng_add_bytes(data: &[u8]) {
    RNG.lock().add_bytes(data);
}

/// Override the random-device path used for seeding.  Intended to be
/// called once, before other threads start using the generator.
pub fn secure_rng_set_urandom_path(path: impl Into<PathBuf>) {
    RNG.lock().urandom_path = Some(path.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// First 16 keystream bytes after mixing "seed" into an identity pool,
    /// with no OS entropy and no early-keystream discard.
    const GOLDEN: [u8; 16] = [
        0x60, 0xc4, 0x9b, 0x74, 0xb0, 0x7b, 0x88, 0x37, 0x01, 0x8b, 0xff, 0x2b, 0xf6, 0xb9,
        0x28, 0x85,
    ];

    fn unseeded() -> SecureRng {
        SecureRng {
            pool: ArcFour::new(),
            initialized: true,
            countdown: BYTES_BEFORE_RESEED,
            stir_pid: std::process::id(),
            urandom_path: None,
        }
    }

    #[test]
    fn keystream_matches_golden_vector() {
        let mut pool = ArcFour::new();
        pool.add_random(b"seed");
        let out: Vec<u8> = (0..16).map(|_| pool.next_byte()).collect();
        assert_eq!(out, GOLDEN);
    }

    #[test]
    fn pool_stays_a_permutation() {
        let mut pool = ArcFour::new();
        pool.add_random(b"anything at all");
        pool.add_random(&[0xff; 256]);
        let mut seen = [false; 256];
        for &v in &pool.s {
            assert!(!seen[usize::from(v)], "duplicate byte {v}");
            seen[usize::from(v)] = true;
        }
    }

    #[test]
    fn add_bytes_walks_long_buffers_in_chunks() {
        // 600 bytes: three mix passes.  Equivalent to mixing the three
        // remaining-suffixes by hand.
        let data: Vec<u8> = (0..600u32).map(|v| (v * 7) as u8).collect();
        let mut via_add_bytes = unseeded();
        via_add_bytes.add_bytes(&data);

        let mut by_hand = ArcFour::new();
        by_hand.add_random(&data[0..]);
        by_hand.add_random(&data[256..]);
        by_hand.add_random(&data[512..]);

        let a: Vec<u8> = (0..32).map(|_| via_add_bytes.pool.next_byte()).collect();
        let b: Vec<u8> = (0..32).map(|_| by_hand.next_byte()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_keystream_without_os_entropy() {
        let mut rng = unseeded();
        rng.add_bytes(b"seed");
        let mut out = [0u8; 16];
        rng.get_bytes(&mut out);
        assert_eq!(out, GOLDEN);
    }

    #[test]
    fn pid_change_triggers_reseed() {
        let mut rng = unseeded();
        // Emit a little keystream, then pretend we are a fork child.
        let mut scratch = [0u8; 64];
        rng.get_bytes(&mut scratch);
        assert_eq!(rng.countdown, BYTES_BEFORE_RESEED - 64);
        rng.stir_pid = rng.stir_pid.wrapping_add(1);
        rng.get_bytes(&mut scratch);
        // A stir happened: pid was re-latched and the countdown snapped
        // back to full before the second pull.  Without the reseed it
        // would read BYTES_BEFORE_RESEED - 128 here.
        assert_eq!(rng.stir_pid, std::process::id());
        assert_eq!(rng.countdown, BYTES_BEFORE_RESEED - 64);
    }

    #[test]
    fn countdown_exhaustion_triggers_reseed() {
        let mut rng = unseeded();
        rng.countdown = 8;
        let mut out = [0u8; 64];
        rng.get_bytes(&mut out);
        assert!(rng.countdown >= BYTES_BEFORE_RESEED - 64);
    }

    #[test]
    fn device_seeding_reads_exactly_32_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xabu8; 64]).unwrap();
        let mut rng = unseeded();
        assert!(rng.seed_device_from(tmp.path()));

        // A short file cannot satisfy the 32-byte read.
        let mut short = tempfile::NamedTempFile::new().unwrap();
        short.write_all(&[0x01u8; 8]).unwrap();
        let mut rng = unseeded();
        assert!(!rng.seed_device_from(short.path()));
    }

    #[test]
    fn all_zero_entropy_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        let mut rng = unseeded();
        assert!(!rng.seed_device_from(tmp.path()));
    }

    #[test]
    fn global_api_round_trips() {
        // The global generator seeds itself from the real OS; just check
        // the API surface behaves: output is produced and two pulls differ.
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        secure_rng_get_bytes(&mut a);
        secure_rng_get_bytes(&mut b);
        assert_ne!(a, b);
        secure_rng_add_bytes(&[0u8; 1024]);
        secure_rng_init().unwrap();
    }
}
