//! End-to-end checks through the public `keelson` surface.

use keelson::prelude::*;
use keelson::{addr, dev_tracing, entropy, time, weak_rand};
use std::net::{Ipv6Addr, SocketAddr};

#[test]
fn address_codec_round_trips_through_the_facade() {
    dev_tracing::init_tracing();

    let sa = parse_sockaddr_port("[::1]:8080").unwrap();
    assert_eq!(sa, "[::1]:8080".parse::<SocketAddr>().unwrap());

    let sa = parse_sockaddr_port("1.2.3.4").unwrap();
    assert_eq!(sa.port(), 0);

    // Hex-driven construction keeps the expected bytes visible.
    let bytes: [u8; 16] = hex::decode("20010db8000000000000000000000001")
        .unwrap()
        .try_into()
        .unwrap();
    let addr6 = Ipv6Addr::from(bytes);
    assert_eq!(addr::format_ipv6(&addr6), "2001:db8::1");
    assert_eq!(parse_ipv6("2001:db8::1"), Some(addr6));
}

#[test]
fn resolver_literal_path_through_the_facade() {
    let hints = Hints {
        flags: libc::AI_NUMERICHOST,
        socktype: libc::SOCK_STREAM,
        ..Hints::default()
    };
    let list = getaddrinfo(Some("127.0.0.1"), Some("1"), Some(&hints)).unwrap();
    assert!(list.is_library_allocated());
    let recs: Vec<_> = list.iter().collect();
    assert_eq!(recs.len(), 1);
    assert_eq!(
        recs[0].socket_addr().unwrap(),
        "127.0.0.1:1".parse::<SocketAddr>().unwrap()
    );
}

#[test]
fn randomness_through_the_facade() {
    let mut block = [0u8; 32];
    entropy::secure_rng_get_bytes(&mut block);
    assert_ne!(hex::encode(block), hex::encode([0u8; 32]));

    let mut rng = weak_rand::WeakRng::new(12345);
    for _ in 0..1000 {
        let v = rng.range(10);
        assert!(v < 10);
    }
}

#[test]
fn monotonic_time_through_the_facade() {
    let mut timer = time::MonotonicTimer::new(time::MonotonicFlags::default());
    let a = timer.gettime().unwrap();
    let b = timer.gettime().unwrap();
    assert!(b >= a);
}
