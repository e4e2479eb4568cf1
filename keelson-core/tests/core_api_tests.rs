//! Integration tests for the keelson-core public surface

use keelson_core::time::{duration_to_msec, MonotonicFlags, MonotonicTimer};
use keelson_core::weak_rand::WeakRng;
use keelson_core::{date, entropy, mem};
use std::time::{Duration, UNIX_EPOCH};

#[test]
fn secure_rng_produces_distinct_blocks() {
    entropy::secure_rng_init().expect("OS entropy available");
    let mut blocks = Vec::new();
    for _ in 0..8 {
        let mut buf = [0u8; 16];
        entropy::secure_rng_get_bytes(&mut buf);
        blocks.push(buf);
    }
    blocks.sort();
    blocks.dedup();
    assert_eq!(blocks.len(), 8, "keystream repeated a 16-byte block");
}

#[test]
fn secure_rng_accepts_arbitrary_caller_entropy() {
    entropy::secure_rng_add_bytes(b"");
    entropy::secure_rng_add_bytes(b"x");
    entropy::secure_rng_add_bytes(&vec![0x5a; 4096]);
    let mut buf = [0u8; 8];
    entropy::secure_rng_get_bytes(&mut buf);
}

#[test]
fn timers_are_independent() {
    let mut coarse = MonotonicTimer::new(MonotonicFlags::default());
    let mut precise = MonotonicTimer::new(MonotonicFlags::PRECISE);
    let mut fallback = MonotonicTimer::new(MonotonicFlags::FALLBACK);
    for timer in [&mut coarse, &mut precise, &mut fallback] {
        let a = timer.gettime().unwrap();
        let b = timer.gettime().unwrap();
        assert!(b >= a);
    }
    assert!(fallback.is_fallback());
}

#[test]
fn weak_rng_seed_is_replayable() {
    let mut rng = WeakRng::new(0);
    let seed = rng.seed();
    let run: Vec<i32> = (0..32).map(|_| rng.next()).collect();
    let mut replay = WeakRng::new(seed);
    let rerun: Vec<i32> = (0..32).map(|_| replay.next()).collect();
    assert_eq!(run, rerun);
}

#[test]
fn date_and_msec_helpers() {
    let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
    assert_eq!(date::date_rfc1123(Some(t)), "Sun, 09 Sep 2001 01:46:40 GMT");
    assert_eq!(duration_to_msec(Duration::from_millis(1500)), Some(1500));
}

#[test]
fn memzero_on_heap_buffer() {
    let mut v = vec![0xa5u8; 512];
    mem::secure_memzero(&mut v);
    assert!(v.iter().all(|&b| b == 0));
}
