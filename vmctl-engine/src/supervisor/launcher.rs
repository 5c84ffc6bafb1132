//! Engine process spawning abstraction.
//!
//! Allows swapping the real `tokio::process` spawner for a fake without
//! changing the supervisor.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::SupervisorError;

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    #[must_use]
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// Starts engine processes.
pub trait EngineLauncher: Send + Sync {
    /// Spawn `program` with `args`. Must return once the OS has accepted the
    /// exec, not once the engine is ready.
    ///
    /// # Errors
    /// Returns [`SupervisorError::SpawnFailed`] if the process cannot start.
    fn launch(&self, program: &Path, args: &[String]) -> Result<Box<dyn EngineProcess>, SupervisorError>;
}

/// A spawned engine process.
#[async_trait]
pub trait EngineProcess: Send {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit.
    ///
    /// # Cancel Safety
    /// Must be cancel safe: the supervisor polls it inside `select!`.
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Send a forced termination signal without waiting.
    ///
    /// # Errors
    /// Returns the OS error if the signal could not be delivered.
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// Spawns engines with `tokio::process::Command`.
///
/// Engines are not killed when their handle drops: an engine outlives an
/// application restart and is found again through its control socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl EngineLauncher for TokioLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<Box<dyn EngineProcess>, SupervisorError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("exec {}: {e}", program.display())))?;
        Ok(Box::new(TokioProcess { child }))
    }
}

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl EngineProcess for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit { code: status.code() })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Resolve an executable either at the given path or in `$PATH`.
///
/// # Errors
/// Returns [`SupervisorError::BinaryNotFound`] if no executable exists in
/// either place.
pub fn resolve_binary(path: &Path) -> Result<PathBuf, SupervisorError> {
    which::which(path).map_err(|e| {
        tracing::debug!(binary = %path.display(), error = %e, "engine binary lookup failed");
        SupervisorError::BinaryNotFound { path: path.to_owned() }
    })
}
