#![no_main]

use libfuzzer_sys::fuzz_target;
use tangle_protocol::Handshake;

fuzz_target!(|data: &[u8]| {
    // A body that parses must re-encode to the same bytes.
    if let Ok(handshake) = Handshake::parse(data) {
        assert_eq!(handshake.to_bytes(), data);
        let _ = handshake.negotiate_version();
    }
});
