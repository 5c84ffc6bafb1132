//! Engine process supervision and state capture for vmctl.
//!
//! Compiles machine configurations into QEMU command lines, supervises the
//! resulting processes, talks to their monitor console, and takes captures
//! either live (through the console) or offline (on the disk image).

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod capture;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod paths;
pub mod profile;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use capture::{
    parse_console_listing, parse_tool_listing, DiskTool, ImageInfo, LiveCoordinator, OfflineCoordinator, QemuImg,
    ToolOutput,
};
pub use config::{EngineBinaries, EngineSettings};
pub use control::{ConsoleReply, ConsoleTransport, ControlChannel, GuestStatus, UnixConsole};
pub use controller::{CaptureLabel, CaptureMode, Controller};
pub use error::{CaptureError, ControlError, ControllerError, SettingsError, SupervisorError};
pub use paths::{expand_home, ControlSocketPaths};
pub use profile::{Accelerator, CompilerSettings, ProfileCompiler};
pub use supervisor::{
    EngineLauncher, EngineProcess, InstanceState, LifecycleEvent, ProcessExit, RunningInstance, StopOutcome,
    Supervisor, TokioLauncher,
};
