//! Facade tying the supervisor, control channel and both capture modes
//! together.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use vmctl_core::{CaptureName, StateCapture, VirtualMachineConfig, VmId};

use crate::capture::{DiskTool, LiveCoordinator, OfflineCoordinator, QemuImg};
use crate::config::EngineSettings;
use crate::control::{ConsoleTransport, ControlChannel, GuestStatus, UnixConsole};
use crate::error::{ControlError, ControllerError};
use crate::profile::ProfileCompiler;
use crate::supervisor::{
    EngineLauncher, InstanceState, LifecycleEvent, RunningInstance, StopOutcome, Supervisor, TokioLauncher,
};

/// Timestamp layout of generated capture names.
const CAPTURE_NAME_FORMAT: &str = "snap-%Y%m%d-%H%M%S";

/// Which coordinator serves capture operations for a machine right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    /// An engine is reachable through this control socket.
    Live(PathBuf),
    /// No engine; operate on the disk image.
    Offline,
}

/// Human label chosen for a generated capture name.
///
/// Labels are reported, never stored; whoever persists them listens on the
/// sink given to [`Controller::with_label_sink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureLabel {
    pub vm: VmId,
    pub label: String,
    pub internal_name: String,
}

/// Front door for everything a machine can do.
pub struct Controller<L, T, D> {
    supervisor: Supervisor<L, T>,
    live: LiveCoordinator<T>,
    offline: OfflineCoordinator<D>,
    labels: Option<mpsc::UnboundedSender<CaptureLabel>>,
}

impl Controller<TokioLauncher, UnixConsole, QemuImg> {
    /// Wire up the real engine, console and disk tool.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let channel = Arc::new(ControlChannel::new(UnixConsole::new(settings.console_timeout)));
        let supervisor = Supervisor::new(
            TokioLauncher,
            ProfileCompiler::new(settings.compiler_settings()),
            settings.binaries.clone(),
            channel,
        )
        .with_stop_timeouts(settings.stop_grace, settings.kill_wait);
        let offline = OfflineCoordinator::new(QemuImg::new(settings.qemu_img.clone()), dirs::home_dir());
        Self::new(supervisor, offline)
    }
}

impl<L, T, D> Controller<L, T, D>
where
    L: EngineLauncher,
    T: ConsoleTransport,
    D: DiskTool,
{
    #[must_use]
    pub fn new(supervisor: Supervisor<L, T>, offline: OfflineCoordinator<D>) -> Self {
        let live = LiveCoordinator::new(Arc::clone(supervisor.channel()));
        Self {
            supervisor,
            live,
            offline,
            labels: None,
        }
    }

    /// Report labels of generated captures to `sink`.
    #[must_use]
    pub fn with_label_sink(mut self, sink: mpsc::UnboundedSender<CaptureLabel>) -> Self {
        self.labels = Some(sink);
        self
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor<L, T> {
        &self.supervisor
    }

    /// Disk-image operations that do not depend on the machine's mode.
    #[must_use]
    pub fn offline_coordinator(&self) -> &OfflineCoordinator<D> {
        &self.offline
    }

    /// # Errors
    /// See [`Supervisor::start`].
    pub async fn start(&self, config: &VirtualMachineConfig) -> Result<RunningInstance, ControllerError> {
        Ok(self.supervisor.start(config).await?)
    }

    /// # Errors
    /// See [`Supervisor::stop`].
    pub async fn stop(&self, id: VmId) -> Result<StopOutcome, ControllerError> {
        Ok(self.supervisor.stop(id).await?)
    }

    pub async fn is_running(&self, id: VmId) -> bool {
        self.supervisor.is_running(id).await
    }

    pub async fn state(&self, id: VmId) -> InstanceState {
        self.supervisor.state(id).await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.supervisor.subscribe()
    }

    /// Guest run state as the engine reports it.
    ///
    /// # Errors
    /// Returns [`ControlError::SocketNotFound`] when no engine is reachable.
    pub async fn status(&self, id: VmId) -> Result<GuestStatus, ControlError> {
        let socket = self.supervisor.socket_path(id);
        self.supervisor.channel().status(&socket).await
    }

    /// Live if the supervisor tracks a running engine OR its control socket
    /// exists. The socket check finds engines that outlived an application
    /// restart.
    pub async fn mode(&self, id: VmId) -> CaptureMode {
        let socket = self.supervisor.socket_path(id);
        if self.supervisor.is_running(id).await || tokio::fs::try_exists(&socket).await.unwrap_or(false) {
            CaptureMode::Live(socket)
        } else {
            CaptureMode::Offline
        }
    }

    /// Take a capture under a generated name, optionally reporting `label`.
    ///
    /// # Errors
    /// See [`capture_create_named`](Self::capture_create_named).
    pub async fn capture_create(
        &self,
        config: &VirtualMachineConfig,
        label: Option<&str>,
    ) -> Result<CaptureName, ControllerError> {
        let existing = self.capture_list(config).await?;
        let name = generated_capture_name(Local::now().naive_local(), &existing)?;
        self.capture_create_named(config, &name).await?;

        if let (Some(label), Some(sink)) = (label, &self.labels) {
            let report = CaptureLabel {
                vm: config.id,
                label: label.to_owned(),
                internal_name: name.to_string(),
            };
            if sink.send(report).is_err() {
                tracing::warn!(vm_id = %config.id, capture = %name, "label sink closed, label dropped");
            }
        }
        Ok(name)
    }

    /// Take a capture called `name` in whichever mode applies.
    ///
    /// # Errors
    /// Returns [`CaptureError::DuplicateName`](crate::CaptureError::DuplicateName)
    /// if `name` exists, or the failure of the chosen coordinator.
    pub async fn capture_create_named(
        &self,
        config: &VirtualMachineConfig,
        name: &CaptureName,
    ) -> Result<(), ControllerError> {
        match self.mode(config.id).await {
            CaptureMode::Live(socket) => self.live.capture(&socket, name).await?,
            CaptureMode::Offline => self.offline.create(&config.disk_path, name).await?,
        }
        Ok(())
    }

    /// # Errors
    /// Returns the failure of the chosen coordinator.
    pub async fn capture_list(&self, config: &VirtualMachineConfig) -> Result<Vec<StateCapture>, ControllerError> {
        let captures = match self.mode(config.id).await {
            CaptureMode::Live(socket) => self.live.list(&socket).await?,
            CaptureMode::Offline => self.offline.list(&config.disk_path).await?,
        };
        Ok(captures)
    }

    /// # Errors
    /// Returns the failure of the chosen coordinator.
    pub async fn capture_restore(
        &self,
        config: &VirtualMachineConfig,
        name: &CaptureName,
    ) -> Result<(), ControllerError> {
        match self.mode(config.id).await {
            CaptureMode::Live(socket) => self.live.restore(&socket, name).await?,
            CaptureMode::Offline => self.offline.restore(&config.disk_path, name).await?,
        }
        Ok(())
    }

    /// # Errors
    /// Returns the failure of the chosen coordinator.
    pub async fn capture_delete(
        &self,
        config: &VirtualMachineConfig,
        name: &CaptureName,
    ) -> Result<(), ControllerError> {
        match self.mode(config.id).await {
            CaptureMode::Live(socket) => self.live.delete(&socket, name).await?,
            CaptureMode::Offline => self.offline.delete(&config.disk_path, name).await?,
        }
        Ok(())
    }
}

/// `snap-YYYYmmdd-HHMMSS`, with `-2`, `-3`, … appended until it is unused.
fn generated_capture_name(
    now: NaiveDateTime,
    existing: &[StateCapture],
) -> Result<CaptureName, ControllerError> {
    let base = now.format(CAPTURE_NAME_FORMAT).to_string();
    let taken = |candidate: &str| existing.iter().any(|c| c.name == candidate);

    let mut candidate = base.clone();
    let mut suffix = 2u32;
    while taken(&candidate) {
        candidate = format!("{base}-{suffix}");
        suffix += 1;
    }
    CaptureName::new(candidate).map_err(|e| ControllerError::Capture(e.into()))
}
