#![no_main]

use libfuzzer_sys::fuzz_target;
use tangle_protocol::{legacy, sting, Heartbeat};

fuzz_target!(|data: &[u8]| {
    // Body parsers must reject, never panic.
    let _ = legacy::split_transaction_and_request(data);
    let _ = sting::parse_transaction_request(data);
    let _ = sting::parse_milestone_request(data);
    let _ = Heartbeat::parse(data);
});
