//! Engine process supervision.
//!
//! One engine process per [`VmId`]. The supervisor owns the instance table;
//! each spawned process gets a monitor task that waits on it, and a single
//! reaper task turns unrequested exits into `Stopped`/`Crashed` records.

mod instance;
mod launcher;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::time::Instant;
use vmctl_core::{VirtualMachineConfig, VmId};

use crate::config::EngineBinaries;
use crate::control::{ConsoleTransport, ControlChannel};
use crate::error::SupervisorError;
use crate::profile::ProfileCompiler;

pub use instance::{InstanceState, LifecycleEvent, RunningInstance, StopOutcome};
pub use launcher::{resolve_binary, EngineLauncher, EngineProcess, ProcessExit, TokioLauncher};

/// Buffered lifecycle events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 64;

/// Message from a monitor task to the reaper.
#[derive(Debug)]
struct ExitNotice {
    id: VmId,
    generation: u64,
    exit: ProcessExit,
}

struct Slot {
    instance: RunningInstance,
    state: InstanceState,
    generation: u64,
    kill: mpsc::Sender<()>,
    exited: watch::Receiver<Option<ProcessExit>>,
}

#[derive(Default)]
struct Table {
    live: HashMap<VmId, Slot>,
    /// Last terminal state of machines with no live slot.
    last: HashMap<VmId, InstanceState>,
    generation: u64,
}

impl Table {
    fn state(&self, id: VmId) -> InstanceState {
        self.live
            .get(&id)
            .map(|slot| slot.state)
            .or_else(|| self.last.get(&id).copied())
            .unwrap_or_default()
    }

    /// Record a transition and publish it.
    fn transition(
        &mut self,
        events: &broadcast::Sender<LifecycleEvent>,
        id: VmId,
        state: InstanceState,
        exit: Option<ProcessExit>,
    ) {
        match self.live.get_mut(&id) {
            Some(slot) => slot.state = state,
            None => {
                self.last.insert(id, state);
            }
        }
        // No subscribers is fine.
        let _ = events.send(LifecycleEvent { id, state, exit });
    }
}

/// Starts, stops and tracks engine processes.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Supervisor<L, T> {
    launcher: L,
    compiler: ProfileCompiler,
    binaries: EngineBinaries,
    channel: Arc<ControlChannel<T>>,
    stop_grace: Duration,
    kill_wait: Duration,
    table: Arc<Mutex<Table>>,
    exits: mpsc::UnboundedSender<ExitNotice>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl<L, T> Supervisor<L, T>
where
    L: EngineLauncher,
    T: ConsoleTransport,
{
    /// Build a supervisor and spawn its reaper task.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        launcher: L,
        compiler: ProfileCompiler,
        binaries: EngineBinaries,
        channel: Arc<ControlChannel<T>>,
    ) -> Self {
        let table = Arc::new(Mutex::new(Table::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (exits, notices) = mpsc::unbounded_channel();
        tokio::spawn(reap(Arc::clone(&table), events.clone(), notices));

        Self {
            launcher,
            compiler,
            binaries,
            channel,
            stop_grace: Duration::from_secs(1),
            kill_wait: Duration::from_secs(2),
            table,
            exits,
            events,
        }
    }

    /// Override how long [`stop`](Self::stop) waits before and after killing.
    #[must_use]
    pub fn with_stop_timeouts(mut self, stop_grace: Duration, kill_wait: Duration) -> Self {
        self.stop_grace = stop_grace;
        self.kill_wait = kill_wait;
        self
    }

    #[must_use]
    pub fn compiler(&self) -> &ProfileCompiler {
        &self.compiler
    }

    /// Channel used to ask engines to quit.
    #[must_use]
    pub fn channel(&self) -> &Arc<ControlChannel<T>> {
        &self.channel
    }

    /// Control socket path for `id`, whether or not an engine is running.
    #[must_use]
    pub fn socket_path(&self, id: VmId) -> PathBuf {
        self.compiler.settings().sockets.for_vm(id)
    }

    /// Receive every state transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Spawn an engine for `config`.
    ///
    /// # Errors
    /// Returns [`SupervisorError::AlreadyRunning`] if an instance exists,
    /// [`SupervisorError::BinaryNotFound`] if the engine binary cannot be
    /// resolved, [`SupervisorError::SpawnFailed`] if exec fails, or
    /// [`SupervisorError::Io`] if the socket directory cannot be prepared.
    pub async fn start(&self, config: &VirtualMachineConfig) -> Result<RunningInstance, SupervisorError> {
        let id = config.id;
        let mut table = self.table.lock().await;
        if table.live.contains_key(&id) {
            return Err(SupervisorError::AlreadyRunning(id));
        }
        table.transition(&self.events, id, InstanceState::Starting, None);

        let socket_path = self.compiler.socket_path(config);
        let spawned = self.spawn_engine(config, &socket_path).await;
        let process = match spawned {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(vm_id = %id, error = %e, "engine start failed");
                table.transition(&self.events, id, InstanceState::Stopped, None);
                return Err(e);
            }
        };

        table.generation += 1;
        let generation = table.generation;
        let instance = RunningInstance::new(id, config.architecture, socket_path, process.pid());

        let (kill, kill_rx) = mpsc::channel(1);
        let (exited_tx, exited) = watch::channel(None);
        tokio::spawn(monitor(
            process,
            kill_rx,
            exited_tx,
            self.exits.clone(),
            id,
            generation,
        ));

        table.last.remove(&id);
        table.live.insert(
            id,
            Slot {
                instance: instance.clone(),
                state: InstanceState::Starting,
                generation,
                kill,
                exited,
            },
        );
        table.transition(&self.events, id, InstanceState::Running, None);

        tracing::info!(
            vm_id = %id,
            arch = %config.architecture,
            pid = ?instance.pid,
            socket = %instance.socket_path.display(),
            "engine started"
        );
        Ok(instance)
    }

    async fn spawn_engine(
        &self,
        config: &VirtualMachineConfig,
        socket_path: &Path,
    ) -> Result<Box<dyn EngineProcess>, SupervisorError> {
        remove_socket(socket_path).await;
        if let Some(dir) = socket_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let binary = resolve_binary(self.binaries.for_arch(config.architecture))?;
        let args = self.compiler.compile(config);
        tracing::debug!(vm_id = %config.id, binary = %binary.display(), ?args, "spawning engine");
        self.launcher.launch(&binary, &args)
    }

    /// Stop the engine for `id`: ask it to quit, then kill it if it lingers.
    ///
    /// Returns within `stop_grace + kill_wait` even when the console never
    /// answers. The instance record and socket file are gone afterwards
    /// whatever the outcome.
    ///
    /// # Errors
    /// Returns [`SupervisorError::NotRunning`] if no instance exists, or
    /// [`SupervisorError::StopInProgress`] if another stop is in flight.
    pub async fn stop(&self, id: VmId) -> Result<StopOutcome, SupervisorError> {
        let (socket_path, kill, mut exited) = {
            let mut table = self.table.lock().await;
            let slot = table.live.get(&id).ok_or(SupervisorError::NotRunning(id))?;
            if slot.state == InstanceState::Stopping {
                return Err(SupervisorError::StopInProgress(id));
            }
            let handles = (
                slot.instance.socket_path.clone(),
                slot.kill.clone(),
                slot.exited.clone(),
            );
            table.transition(&self.events, id, InstanceState::Stopping, None);
            handles
        };

        tracing::info!(vm_id = %id, "stopping engine");
        // The quit round trip and the graceful wait share one grace period.
        let deadline = Instant::now() + self.stop_grace;
        match tokio::time::timeout_at(deadline, self.channel.quit(&socket_path)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(vm_id = %id, error = %e, "quit not delivered, will kill"),
            Err(_) => tracing::warn!(
                vm_id = %id,
                grace_ms = self.stop_grace.as_millis(),
                "console did not answer quit"
            ),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = if wait_for_exit(&mut exited, remaining).await {
            StopOutcome::Graceful
        } else {
            tracing::warn!(vm_id = %id, grace_ms = self.stop_grace.as_millis(), "engine ignored quit, killing");
            // A full buffer means a kill is already queued.
            let _ = kill.try_send(());
            if !wait_for_exit(&mut exited, self.kill_wait).await {
                tracing::error!(vm_id = %id, "engine still alive after kill");
            }
            StopOutcome::Forced
        };
        let exit = *exited.borrow();

        let mut table = self.table.lock().await;
        table.live.remove(&id);
        remove_socket(&socket_path).await;
        table.transition(&self.events, id, InstanceState::Stopped, exit);
        tracing::info!(vm_id = %id, ?outcome, "engine stopped");
        Ok(outcome)
    }

    /// Whether an engine is registered for `id` and has not exited.
    pub async fn is_running(&self, id: VmId) -> bool {
        self.table
            .lock()
            .await
            .live
            .get(&id)
            .is_some_and(|slot| slot.exited.borrow().is_none())
    }

    /// Current state, or the last terminal state if nothing is running.
    pub async fn state(&self, id: VmId) -> InstanceState {
        self.table.lock().await.state(id)
    }

    /// Instances currently registered.
    pub async fn running(&self) -> Vec<RunningInstance> {
        let table = self.table.lock().await;
        let mut instances: Vec<RunningInstance> = table.live.values().map(|s| s.instance.clone()).collect();
        instances.sort_by_key(|i| i.started_at);
        instances
    }
}

/// Wait on one engine process, relaying kill requests, then report its exit.
async fn monitor(
    mut process: Box<dyn EngineProcess>,
    mut kill_rx: mpsc::Receiver<()>,
    exited: watch::Sender<Option<ProcessExit>>,
    notices: mpsc::UnboundedSender<ExitNotice>,
    id: VmId,
    generation: u64,
) {
    let exit = loop {
        tokio::select! {
            biased;
            Some(()) = kill_rx.recv() => {
                if let Err(e) = process.start_kill() {
                    tracing::warn!(vm_id = %id, error = %e, "kill signal failed");
                }
            }
            result = process.wait() => {
                break match result {
                    Ok(exit) => exit,
                    Err(e) => {
                        tracing::warn!(vm_id = %id, error = %e, "waiting on engine failed");
                        ProcessExit { code: None }
                    }
                };
            }
        }
    };

    tracing::debug!(vm_id = %id, code = ?exit.code, "engine process exited");
    exited.send_replace(Some(exit));
    // The reaper is gone only when the supervisor is.
    let _ = notices.send(ExitNotice { id, generation, exit });
}

/// Turn unrequested exits into terminal states.
async fn reap(
    table: Arc<Mutex<Table>>,
    events: broadcast::Sender<LifecycleEvent>,
    mut notices: mpsc::UnboundedReceiver<ExitNotice>,
) {
    while let Some(notice) = notices.recv().await {
        let mut table = table.lock().await;
        let owned = table
            .live
            .get(&notice.id)
            .is_some_and(|s| s.generation == notice.generation && s.state != InstanceState::Stopping);
        if !owned {
            continue;
        }
        let Some(slot) = table.live.remove(&notice.id) else {
            continue;
        };
        remove_socket(&slot.instance.socket_path).await;

        let state = InstanceState::after_unrequested_exit(notice.exit);
        if state == InstanceState::Crashed {
            tracing::error!(vm_id = %notice.id, code = ?notice.exit.code, "engine exited unexpectedly");
        } else {
            tracing::info!(vm_id = %notice.id, "engine shut down from inside the guest");
        }
        table.transition(&events, notice.id, state, Some(notice.exit));
    }
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<ProcessExit>>, limit: Duration) -> bool {
    // A closed channel means the monitor task finished, which it only does
    // after the process exited.
    tokio::time::timeout(limit, exited.wait_for(Option::is_some))
        .await
        .is_ok()
}

async fn remove_socket(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(socket = %path.display(), "removed control socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(socket = %path.display(), error = %e, "could not remove control socket"),
    }
}

#[cfg(test)]
mod tests {
    use vmctl_core::Architecture;

    use super::*;
    use crate::testing::{test_binaries, test_compiler, FakeLauncher, FakeMonitor, SilentConsole};

    struct Rig {
        _dir: tempfile::TempDir,
        monitor: FakeMonitor,
        supervisor: Supervisor<FakeLauncher, FakeMonitor>,
    }

    fn rig(honor_quit: bool) -> Rig {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let monitor = FakeMonitor::new();
        let launcher = FakeLauncher::new(monitor.clone(), honor_quit);
        let supervisor = Supervisor::new(
            launcher,
            test_compiler(dir.path()),
            test_binaries(),
            Arc::new(ControlChannel::new(monitor.clone())),
        )
        .with_stop_timeouts(Duration::from_millis(100), Duration::from_millis(500));
        Rig {
            _dir: dir,
            monitor,
            supervisor,
        }
    }

    fn config() -> VirtualMachineConfig {
        VirtualMachineConfig::new(VmId::new(), Architecture::X86_64, PathBuf::from("/tmp/disk.qcow2"))
    }

    async fn next_state(events: &mut broadcast::Receiver<LifecycleEvent>) -> InstanceState {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event)) => event.state,
            other => panic!("no lifecycle event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_registers_instance_and_creates_socket() {
        let rig = rig(true);
        let cfg = config();
        let instance = match rig.supervisor.start(&cfg).await {
            Ok(i) => i,
            Err(e) => panic!("start failed: {e}"),
        };
        assert_eq!(instance.id, cfg.id);
        assert!(instance.socket_path.exists(), "launcher must bind the socket");
        assert!(rig.supervisor.is_running(cfg.id).await);
        assert_eq!(rig.supervisor.state(cfg.id).await, InstanceState::Running);
        assert_eq!(rig.supervisor.running().await.len(), 1);
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let rig = rig(true);
        let cfg = config();
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        let second = rig.supervisor.start(&cfg).await;
        assert!(matches!(second, Err(SupervisorError::AlreadyRunning(id)) if id == cfg.id));
    }

    #[tokio::test]
    async fn start_removes_stale_socket_first() {
        let rig = rig(true);
        let cfg = config();
        let path = rig.supervisor.socket_path(cfg.id);
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                panic!("mkdir: {e}");
            }
        }
        if let Err(e) = std::fs::write(&path, b"stale") {
            panic!("write: {e}");
        }
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        let contents = std::fs::read(&path).unwrap_or_default();
        assert!(contents.is_empty(), "stale socket must be replaced by the engine's");
    }

    #[tokio::test]
    async fn graceful_stop_clears_record_and_socket() {
        let rig = rig(true);
        let cfg = config();
        let instance = match rig.supervisor.start(&cfg).await {
            Ok(i) => i,
            Err(e) => panic!("start failed: {e}"),
        };
        let outcome = match rig.supervisor.stop(cfg.id).await {
            Ok(o) => o,
            Err(e) => panic!("stop failed: {e}"),
        };
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(rig.monitor.count("quit"), 1);
        assert!(!rig.supervisor.is_running(cfg.id).await);
        assert!(!instance.socket_path.exists());
        assert_eq!(rig.supervisor.state(cfg.id).await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn stubborn_engine_is_killed() {
        let rig = rig(false);
        let cfg = config();
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        let outcome = match rig.supervisor.stop(cfg.id).await {
            Ok(o) => o,
            Err(e) => panic!("stop failed: {e}"),
        };
        assert_eq!(outcome, StopOutcome::Forced);
        assert!(!rig.supervisor.is_running(cfg.id).await);
        assert!(!rig.supervisor.socket_path(cfg.id).exists());
    }

    #[tokio::test]
    async fn unanswered_quit_is_bounded_by_grace_then_killed() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let grace = Duration::from_millis(100);
        let kill_wait = Duration::from_millis(500);
        let supervisor = Supervisor::new(
            FakeLauncher::new(FakeMonitor::new(), false),
            test_compiler(dir.path()),
            test_binaries(),
            Arc::new(ControlChannel::new(SilentConsole)),
        )
        .with_stop_timeouts(grace, kill_wait);
        let cfg = config();
        if let Err(e) = supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }

        let started = std::time::Instant::now();
        let outcome = match tokio::time::timeout(Duration::from_secs(5), supervisor.stop(cfg.id)).await {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => panic!("stop failed: {e}"),
            Err(_) => panic!("stop hung on a console that never answers"),
        };
        let elapsed = started.elapsed();

        assert_eq!(outcome, StopOutcome::Forced);
        assert!(
            elapsed < grace + kill_wait + Duration::from_millis(500),
            "stop took {elapsed:?}"
        );
        assert!(!supervisor.is_running(cfg.id).await);
        assert!(!supervisor.socket_path(cfg.id).exists());
        assert_eq!(supervisor.state(cfg.id).await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn stop_unknown_vm_is_not_running() {
        let rig = rig(true);
        let result = rig.supervisor.stop(VmId::new()).await;
        assert!(matches!(result, Err(SupervisorError::NotRunning(_))));
    }

    #[tokio::test]
    async fn crash_is_reaped_and_published() {
        let rig = rig(true);
        let cfg = config();
        let mut events = rig.supervisor.subscribe();
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        assert_eq!(next_state(&mut events).await, InstanceState::Starting);
        assert_eq!(next_state(&mut events).await, InstanceState::Running);

        rig.monitor.crash(Some(1));
        assert_eq!(next_state(&mut events).await, InstanceState::Crashed);
        assert!(!rig.supervisor.is_running(cfg.id).await);
        assert!(rig.supervisor.running().await.is_empty());
        assert!(!rig.supervisor.socket_path(cfg.id).exists());
        assert_eq!(rig.supervisor.state(cfg.id).await, InstanceState::Crashed);
    }

    #[tokio::test]
    async fn clean_exit_from_guest_is_stopped_not_crashed() {
        let rig = rig(true);
        let cfg = config();
        let mut events = rig.supervisor.subscribe();
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        rig.monitor.crash(Some(0));
        let mut last = next_state(&mut events).await;
        while last != InstanceState::Stopped {
            last = next_state(&mut events).await;
        }
        assert_eq!(rig.supervisor.state(cfg.id).await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn restart_after_crash_is_allowed() {
        let rig = rig(true);
        let cfg = config();
        let mut events = rig.supervisor.subscribe();
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("start failed: {e}");
        }
        rig.monitor.crash(None);
        while next_state(&mut events).await != InstanceState::Crashed {}
        if let Err(e) = rig.supervisor.start(&cfg).await {
            panic!("restart failed: {e}");
        }
        assert_eq!(rig.supervisor.state(cfg.id).await, InstanceState::Running);
    }

    #[tokio::test]
    async fn missing_binary_leaves_vm_stopped() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let monitor = FakeMonitor::new();
        let mut binaries = test_binaries();
        binaries.x86_64 = PathBuf::from("/nonexistent/qemu-system-x86_64");
        let supervisor = Supervisor::new(
            FakeLauncher::new(monitor.clone(), true),
            test_compiler(dir.path()),
            binaries,
            Arc::new(ControlChannel::new(monitor)),
        );
        let cfg = config();
        let result = supervisor.start(&cfg).await;
        assert!(matches!(result, Err(SupervisorError::BinaryNotFound { .. })));
        assert_eq!(supervisor.state(cfg.id).await, InstanceState::Stopped);
        assert!(!supervisor.is_running(cfg.id).await);
    }
}
