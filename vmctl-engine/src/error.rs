//! Error types for the engine crate.

use std::path::PathBuf;
use std::time::Duration;

use vmctl_core::{CoreError, VmId};

/// Errors raised while starting, stopping, or tracking engine processes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    /// An engine process is already registered for this machine.
    #[error("VM {0} is already running")]
    AlreadyRunning(VmId),

    /// No engine process is registered for this machine.
    #[error("VM {0} is not running")]
    NotRunning(VmId),

    /// A stop request for this machine is already in flight.
    #[error("VM {0} is already stopping")]
    StopInProgress(VmId),

    /// Engine binary not found at the configured path or in `$PATH`.
    #[error("engine binary not found at {path}")]
    BinaryNotFound { path: PathBuf },

    /// The engine process could not be started.
    #[error("engine spawn failed: {0}")]
    SpawnFailed(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by a control-channel round trip.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ControlError {
    /// No control socket exists; the engine is dead or not ready yet.
    #[error("control socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    /// The command could not be delivered or its reply could not be read.
    #[error("relaying '{command}' failed: {reason}")]
    CommandRelayFailed { command: String, reason: String },

    /// The console did not finish replying in time.
    #[error("no reply to '{command}' within {}ms", after.as_millis())]
    Timeout { command: String, after: Duration },
}

/// Errors raised by the live and offline capture coordinators.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CaptureError {
    /// The control channel itself failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The console accepted the command but printed an error.
    #[error("engine rejected capture '{name}': {message}")]
    Rejected { name: String, message: String },

    /// The capture succeeded but the guest could not be resumed.
    #[error("capture '{name}' taken but resume failed: {reason}")]
    ResumeFailed { name: String, reason: String },

    /// A capture with this name already exists.
    #[error("capture '{0}' already exists")]
    DuplicateName(String),

    /// The disk-image tool could not be launched.
    #[error("disk tool {} unavailable: {reason}", tool.display())]
    ToolUnavailable { tool: PathBuf, reason: String },

    /// The disk-image tool exited with a failure status.
    #[error("disk tool {operation} failed (exit code {code:?}): {stderr}")]
    ToolExitNonZero {
        operation: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    /// The disk-image tool printed output that could not be decoded.
    #[error("malformed disk tool output: {0}")]
    MalformedToolOutput(String),

    /// A capture name failed validation.
    #[error(transparent)]
    Name(#[from] CoreError),
}

/// Errors surfaced by the [`Controller`](crate::Controller) facade.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ControllerError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Errors raised while loading [`EngineSettings`](crate::EngineSettings).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SettingsError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
