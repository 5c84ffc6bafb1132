//! Control channel to a running engine's monitor console.
//!
//! One round trip = one command line in, one cleaned [`ConsoleReply`] out.
//! The transport is pluggable so tests can stand in for a real engine.

mod reply;
mod unix;

use std::path::Path;

use async_trait::async_trait;
use vmctl_core::CaptureName;

use crate::error::ControlError;

pub use reply::{strip_control_sequences, ConsoleReply, GuestStatus, PROMPT};
pub use unix::UnixConsole;

/// Carries a single command line to a monitor socket and back.
///
/// # Cancel Safety
/// Implementations need not be cancel safe: an interrupted round trip may
/// leave a half-read reply on the socket. Callers await every round trip.
#[async_trait]
pub trait ConsoleTransport: Send + Sync {
    /// Deliver `command` and return everything the console printed for it,
    /// raw and unfiltered.
    ///
    /// # Errors
    /// Returns [`ControlError::CommandRelayFailed`] if the socket cannot be
    /// reached or the exchange breaks, [`ControlError::Timeout`] if the reply
    /// never completes.
    async fn round_trip(&self, socket_path: &Path, command: &str) -> Result<String, ControlError>;
}

/// Typed client for the monitor console.
#[derive(Debug, Clone)]
pub struct ControlChannel<T> {
    transport: T,
}

impl<T: ConsoleTransport> ControlChannel<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one command and clean the reply.
    ///
    /// # Errors
    /// Returns [`ControlError::SocketNotFound`] if nothing exists at
    /// `socket_path`, or whatever the transport reports.
    pub async fn send(&self, socket_path: &Path, command: &str) -> Result<ConsoleReply, ControlError> {
        if !tokio::fs::try_exists(socket_path).await.unwrap_or(false) {
            return Err(ControlError::SocketNotFound {
                path: socket_path.to_path_buf(),
            });
        }

        tracing::debug!(socket = %socket_path.display(), %command, "console command");
        let raw = self.transport.round_trip(socket_path, command).await?;
        let reply = ConsoleReply::from_raw(command, &raw);
        tracing::trace!(%command, reply = %reply.text(), "console reply");
        Ok(reply)
    }

    /// Pause guest execution (`stop`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn pause(&self, socket_path: &Path) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, "stop").await
    }

    /// Resume guest execution (`cont`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn resume(&self, socket_path: &Path) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, "cont").await
    }

    /// Query the guest run state (`info status`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn status(&self, socket_path: &Path) -> Result<GuestStatus, ControlError> {
        let reply = self.send(socket_path, "info status").await?;
        Ok(GuestStatus::from_reply(&reply))
    }

    /// Save memory and disk state under `name` (`savevm`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn capture_create(
        &self,
        socket_path: &Path,
        name: &CaptureName,
    ) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, &format!("savevm {name}")).await
    }

    /// Load the capture `name` (`loadvm`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn capture_restore(
        &self,
        socket_path: &Path,
        name: &CaptureName,
    ) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, &format!("loadvm {name}")).await
    }

    /// Delete the capture `name` (`delvm`).
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn capture_delete(
        &self,
        socket_path: &Path,
        name: &CaptureName,
    ) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, &format!("delvm {name}")).await
    }

    /// List captures (`info snapshots`). The reply is tabular text.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn capture_list(&self, socket_path: &Path) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, "info snapshots").await
    }

    /// Ask the engine to exit (`quit`). The console usually closes instead
    /// of printing a reply.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn quit(&self, socket_path: &Path) -> Result<ConsoleReply, ControlError> {
        self.send(socket_path, "quit").await
    }
}
