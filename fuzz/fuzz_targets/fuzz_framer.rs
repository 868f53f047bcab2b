#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tangle_protocol::Framer;

#[derive(Arbitrary, Debug)]
struct Input {
    data: Vec<u8>,
    /// Chunk sizes the stream is fed in; cycled, zero treated as one.
    chunks: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Feeding the stream whole or in pieces must yield the same messages
    // up to the first error.
    let whole = Framer::new().feed(&input.data);

    let mut framer = Framer::new();
    let mut pieced = Vec::new();
    let mut rest = input.data.as_slice();
    let mut sizes = input.chunks.iter().cycle();
    let mut failed = false;
    while !rest.is_empty() {
        let size = sizes
            .next()
            .map(|s| usize::from(*s).max(1))
            .unwrap_or(rest.len())
            .min(rest.len());
        let (chunk, tail) = rest.split_at(size);
        rest = tail;
        match framer.feed(chunk) {
            Ok(messages) => pieced.extend(messages),
            Err(_) => {
                failed = true;
                break;
            }
        }
    }

    if let Ok(messages) = whole {
        assert!(!failed);
        assert_eq!(messages, pieced);
    }
});
