//! Captures of a running guest, taken through the control channel.

use std::path::Path;
use std::sync::Arc;

use vmctl_core::{CaptureName, StateCapture};

use super::listing::parse_console_listing;
use crate::control::{ConsoleTransport, ControlChannel};
use crate::error::CaptureError;

/// Takes, restores, deletes and lists captures of a running guest.
///
/// Memory is part of the capture, so the guest is paused while it is taken.
/// Callers must serialize operations against one machine.
pub struct LiveCoordinator<T> {
    channel: Arc<ControlChannel<T>>,
}

impl<T: ConsoleTransport> LiveCoordinator<T> {
    #[must_use]
    pub fn new(channel: Arc<ControlChannel<T>>) -> Self {
        Self { channel }
    }

    /// Take a capture named `name`: pause, save, resume.
    ///
    /// Each step completes before the next is sent. Resume is sent whatever
    /// happened to pause or save, so the guest is never left paused by this
    /// call.
    ///
    /// # Errors
    /// Returns [`CaptureError::DuplicateName`] if `name` is already listed,
    /// [`CaptureError::Rejected`] if the console reported a save failure,
    /// [`CaptureError::ResumeFailed`] if the save worked but resume did not,
    /// or [`CaptureError::Control`] if the channel failed.
    pub async fn capture(&self, socket_path: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        if self.list(socket_path).await?.iter().any(|c| c.name == name.as_str()) {
            return Err(CaptureError::DuplicateName(name.to_string()));
        }

        tracing::info!(socket = %socket_path.display(), capture = %name, "taking live capture");

        match self.channel.pause(socket_path).await {
            Ok(reply) => {
                if let Some(message) = reply.failure() {
                    tracing::warn!(capture = %name, %message, "pause reported an error, continuing");
                }
            }
            Err(e) => {
                self.resume_after_failure(socket_path, name).await;
                return Err(e.into());
            }
        }

        let saved = self.channel.capture_create(socket_path, name).await;
        let resumed = self.channel.resume(socket_path).await;

        let reply = match saved {
            Ok(reply) => reply,
            Err(e) => {
                if let Err(resume_err) = resumed {
                    tracing::error!(capture = %name, error = %resume_err, "resume after failed save also failed");
                }
                return Err(e.into());
            }
        };
        if let Some(message) = reply.failure() {
            tracing::warn!(capture = %name, %message, "engine rejected live capture");
            return Err(CaptureError::Rejected {
                name: name.to_string(),
                message: message.to_owned(),
            });
        }

        match resumed {
            Ok(reply) => match reply.failure() {
                Some(message) => Err(CaptureError::ResumeFailed {
                    name: name.to_string(),
                    reason: message.to_owned(),
                }),
                None => {
                    tracing::info!(capture = %name, "live capture taken");
                    Ok(())
                }
            },
            Err(e) => Err(CaptureError::ResumeFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Restore memory and disk state from `name`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Rejected`] if the console reported a failure,
    /// or [`CaptureError::Control`] if the channel failed.
    pub async fn restore(&self, socket_path: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        tracing::info!(socket = %socket_path.display(), capture = %name, "restoring live capture");
        let reply = self.channel.capture_restore(socket_path, name).await?;
        reject_on_failure(name, reply.failure())
    }

    /// Delete the capture `name`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Rejected`] if the console reported a failure,
    /// or [`CaptureError::Control`] if the channel failed.
    pub async fn delete(&self, socket_path: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        tracing::info!(socket = %socket_path.display(), capture = %name, "deleting live capture");
        let reply = self.channel.capture_delete(socket_path, name).await?;
        reject_on_failure(name, reply.failure())
    }

    /// List captures known to the running engine.
    ///
    /// # Errors
    /// Returns [`CaptureError::Control`] if the channel failed.
    pub async fn list(&self, socket_path: &Path) -> Result<Vec<StateCapture>, CaptureError> {
        let reply = self.channel.capture_list(socket_path).await?;
        Ok(parse_console_listing(&reply.text()))
    }

    async fn resume_after_failure(&self, socket_path: &Path, name: &CaptureName) {
        if let Err(e) = self.channel.resume(socket_path).await {
            tracing::error!(capture = %name, error = %e, "resume after failed pause also failed");
        }
    }
}

fn reject_on_failure(name: &CaptureName, failure: Option<&str>) -> Result<(), CaptureError> {
    match failure {
        Some(message) => Err(CaptureError::Rejected {
            name: name.to_string(),
            message: message.to_owned(),
        }),
        None => Ok(()),
    }
}
