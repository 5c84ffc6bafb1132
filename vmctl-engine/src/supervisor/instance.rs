//! Running instance records and lifecycle states.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vmctl_core::{Architecture, VmId};

use super::launcher::ProcessExit;

/// A running engine as seen by the supervisor.
///
/// Dropping this value does NOT stop the engine; it is a snapshot of the
/// supervisor's record. Call [`Supervisor::stop`](super::Supervisor::stop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct RunningInstance {
    /// Machine this engine runs.
    pub id: VmId,

    /// Architecture the engine was launched for.
    pub architecture: Architecture,

    /// Control socket bound by the engine.
    pub socket_path: PathBuf,

    /// OS process id at spawn time.
    pub pid: Option<u32>,

    /// Timestamp when the engine was spawned.
    pub started_at: DateTime<Utc>,
}

impl RunningInstance {
    #[must_use]
    pub fn new(id: VmId, architecture: Architecture, socket_path: PathBuf, pid: Option<u32>) -> Self {
        Self {
            id,
            architecture,
            socket_path,
            pid,
            started_at: Utc::now(),
        }
    }
}

/// Lifecycle state of one machine.
///
/// `Stopped → Starting → Running → Stopping → Stopped`, or
/// `Running → Crashed` when the engine exits on its own with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl InstanceState {
    /// State after the engine exits without being asked to.
    #[must_use]
    pub fn after_unrequested_exit(exit: ProcessExit) -> Self {
        if exit.success() {
            Self::Stopped
        } else {
            Self::Crashed
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub id: VmId,
    pub state: InstanceState,
    /// Set when the transition was caused by process exit.
    pub exit: Option<ProcessExit>,
}

/// How [`Supervisor::stop`](super::Supervisor::stop) ended the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The engine honoured `quit` within the grace period.
    Graceful,
    /// The engine had to be killed.
    Forced,
}
