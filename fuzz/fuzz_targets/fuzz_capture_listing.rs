//! Fuzz target: capture listing parsers.
//!
//! Both the console and disk-tool parsers see the same input. Neither may
//! panic, and every capture they return must carry a non-empty name.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmctl_engine::{parse_console_listing, parse_tool_listing};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    for capture in parse_console_listing(&text).into_iter().chain(parse_tool_listing(&text)) {
        assert!(!capture.name.is_empty(), "parsed capture without a name");
    }
});
