//! Fuzz target: monitor console reply cleaning.
//!
//! Arbitrary bytes stand in for whatever a misbehaving console prints. The
//! cleaner must never panic and must never let an escape byte through.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmctl_engine::control::{strip_control_sequences, ConsoleReply, GuestStatus};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    let cleaned = strip_control_sequences(&raw);
    assert!(!cleaned.contains('\u{1b}'), "escape byte survived cleaning");
    assert!(!cleaned.contains('\r'), "carriage return survived cleaning");

    let reply = ConsoleReply::from_raw("info status", &raw);
    let _ = reply.failure();
    let _ = GuestStatus::from_reply(&reply);
});
