//! Fuzz target: JSON deserialization of `MachineBody`.
//!
//! Verifies that arbitrary byte sequences fed to the JSON parser never cause
//! panics, and that any architecture string is either parsed or rejected.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vmctl_core::Architecture;
use vmctl_gateway::routes::MachineBody;

fuzz_target!(|data: &[u8]| {
    // Errors are expected and fine; panics are not.
    if let Ok(body) = serde_json::from_slice::<MachineBody>(data) {
        let _ = body.architecture.parse::<Architecture>();
    }
});
