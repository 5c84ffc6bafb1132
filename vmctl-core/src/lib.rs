//! Core types for the vmctl hypervisor control layer.
//!
//! Defines machine identity, the declarative machine configuration, and the
//! state-capture model shared by the live and offline capture paths.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod capture;
pub mod error;
pub mod examples;
pub mod id;
pub mod machine;

pub use capture::{parse_capture_timestamp, CaptureName, StateCapture, CAPTURE_TIMESTAMP_FORMAT};
pub use error::CoreError;
pub use id::VmId;
pub use machine::{Architecture, DisplayMode, IsaFamily, VirtualMachineConfig};
