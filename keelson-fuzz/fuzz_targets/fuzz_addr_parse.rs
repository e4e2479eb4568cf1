#![no_main]

use keelson_net::addr::{format_ipv6, parse_ipv4, parse_ipv6, parse_sockaddr_port};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // The parsers must never panic, whatever the input.
    let _ = parse_ipv4(text);
    let _ = parse_sockaddr_port(text);

    // Anything the v6 parser accepts must survive a format/parse cycle.
    if let Some(addr) = parse_ipv6(text) {
        let canonical = format_ipv6(&addr);
        assert_eq!(parse_ipv6(&canonical), Some(addr));
    }
});
