//! In-process fakes for the injection seams: a scripted monitor console and
//! a launcher whose processes exit on command.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::capture::{DiskTool, ToolOutput};
use crate::config::EngineBinaries;
use crate::control::ConsoleTransport;
use crate::error::{CaptureError, ControlError, SupervisorError};
use crate::paths::ControlSocketPaths;
use crate::profile::{CompilerSettings, ProfileCompiler};
use crate::supervisor::{EngineLauncher, EngineProcess, ProcessExit};

/// Misbehaviour applied to the next `savevm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorFault {
    /// Console prints an error instead of saving.
    RejectSave,
    /// The round trip itself fails.
    DropSave,
}

type ExitSender = Arc<watch::Sender<Option<ProcessExit>>>;

#[derive(Default)]
struct MonitorState {
    running: bool,
    sentinel: String,
    /// Saved captures in creation order: name and the sentinel at save time.
    captures: Vec<(String, String)>,
    commands: Vec<String>,
    faults: VecDeque<MonitorFault>,
    engine: Option<(ExitSender, bool)>,
}

/// Simulated HMP console. Clones share state.
#[derive(Clone)]
pub(crate) struct FakeMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl FakeMonitor {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                running: true,
                ..MonitorState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        #[expect(clippy::unwrap_used, reason = "test mutex")]
        self.state.lock().unwrap()
    }

    /// A file standing in for the control socket.
    pub(crate) fn socket_file(&self) -> tempfile::NamedTempFile {
        match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => panic!("tempfile: {e}"),
        }
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.lock().commands.iter().filter(|c| *c == command).count()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Guest memory contents, reduced to one string.
    pub(crate) fn set_sentinel(&self, value: &str) {
        value.clone_into(&mut self.lock().sentinel);
    }

    pub(crate) fn sentinel(&self) -> String {
        self.lock().sentinel.clone()
    }

    pub(crate) fn inject(&self, fault: MonitorFault) {
        self.lock().faults.push_back(fault);
    }

    /// Make the attached engine exit on its own with `code`.
    pub(crate) fn crash(&self, code: Option<i32>) {
        if let Some((exit, _)) = &self.lock().engine {
            exit.send_replace(Some(ProcessExit { code }));
        }
    }

    fn attach_engine(&self, exit: ExitSender, honor_quit: bool) {
        self.lock().engine = Some((exit, honor_quit));
    }

    fn respond(&self, command: &str) -> Result<String, ControlError> {
        let mut state = self.lock();
        state.commands.push(command.to_owned());

        let (verb, arg) = command.split_once(' ').unwrap_or((command, ""));
        let body = match (verb, arg) {
            ("stop", _) => {
                state.running = false;
                String::new()
            }
            ("cont", _) => {
                state.running = true;
                String::new()
            }
            ("info", "status") => {
                let s = if state.running { "running" } else { "paused" };
                format!("VM status: {s}\r\n")
            }
            ("info", "snapshots") => listing(&state.captures),
            ("savevm", name) => match state.faults.pop_front() {
                Some(MonitorFault::RejectSave) => {
                    "Error: Device 'virtio0' is writable but does not support snapshots\r\n".to_owned()
                }
                Some(MonitorFault::DropSave) => {
                    return Err(ControlError::CommandRelayFailed {
                        command: command.to_owned(),
                        reason: "connection reset by peer".to_owned(),
                    });
                }
                None => {
                    let sentinel = state.sentinel.clone();
                    state.captures.retain(|(n, _)| n != name);
                    state.captures.push((name.to_owned(), sentinel));
                    String::new()
                }
            },
            ("loadvm", name) => match state.captures.iter().find(|(n, _)| n == name) {
                Some((_, saved)) => {
                    let saved = saved.clone();
                    state.sentinel = saved;
                    String::new()
                }
                None => format!("Error: Snapshot '{name}' does not exist in one or more devices\r\n"),
            },
            ("delvm", name) => {
                let before = state.captures.len();
                state.captures.retain(|(n, _)| n != name);
                if state.captures.len() == before {
                    "Error: Error while deleting snapshot on device 'virtio0': snapshot not found\r\n".to_owned()
                } else {
                    String::new()
                }
            }
            ("quit", _) => {
                if let Some((exit, true)) = &state.engine {
                    exit.send_replace(Some(ProcessExit { code: Some(0) }));
                }
                return Ok(format!("{command}\r\n"));
            }
            _ => format!("unknown command: '{verb}'\r\n"),
        };
        Ok(format!("{command}\r\n{body}(qemu) "))
    }
}

fn listing(captures: &[(String, String)]) -> String {
    if captures.is_empty() {
        return "There is no snapshot available.\r\n".to_owned();
    }
    let mut out = String::from(
        "List of snapshots present on all disks:\r\n\
         ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT\r\n",
    );
    for (name, _) in captures {
        out.push_str(&format!(
            "--        {name:<16}  256 MiB 2024-03-05 14:07:09 00:00:10.000\r\n"
        ));
    }
    out
}

#[async_trait]
impl ConsoleTransport for FakeMonitor {
    async fn round_trip(&self, _socket_path: &Path, command: &str) -> Result<String, ControlError> {
        self.respond(command)
    }
}

/// Console of a wedged engine: accepts every command, never replies.
#[derive(Clone, Copy, Default)]
pub(crate) struct SilentConsole;

#[async_trait]
impl ConsoleTransport for SilentConsole {
    async fn round_trip(&self, _socket_path: &Path, _command: &str) -> Result<String, ControlError> {
        std::future::pending().await
    }
}

/// Launches [`FakeProcess`]es bound to a [`FakeMonitor`].
pub(crate) struct FakeLauncher {
    monitor: FakeMonitor,
    honor_quit: bool,
}

impl FakeLauncher {
    pub(crate) fn new(monitor: FakeMonitor, honor_quit: bool) -> Self {
        Self { monitor, honor_quit }
    }
}

impl EngineLauncher for FakeLauncher {
    fn launch(&self, _program: &Path, args: &[String]) -> Result<Box<dyn EngineProcess>, SupervisorError> {
        let socket = monitor_socket(args)
            .ok_or_else(|| SupervisorError::SpawnFailed("no -monitor argument".to_owned()))?;
        std::fs::write(&socket, b"")?;

        let (tx, rx) = watch::channel(None);
        let tx = Arc::new(tx);
        self.monitor.attach_engine(Arc::clone(&tx), self.honor_quit);
        Ok(Box::new(FakeProcess { exit: tx, exited: rx }))
    }
}

fn monitor_socket(args: &[String]) -> Option<PathBuf> {
    let pos = args.iter().position(|a| a == "-monitor")?;
    let value = args.get(pos + 1)?;
    let path = value.strip_prefix("unix:")?.strip_suffix(",server,nowait")?;
    Some(PathBuf::from(path.replace(",,", ",")))
}

pub(crate) struct FakeProcess {
    exit: ExitSender,
    exited: watch::Receiver<Option<ProcessExit>>,
}

#[async_trait]
impl EngineProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let exit = self
            .exited
            .wait_for(Option::is_some)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok((*exit).unwrap_or(ProcessExit { code: None }))
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.exit.send_replace(Some(ProcessExit { code: None }));
        Ok(())
    }
}

/// Compiler writing sockets under `dir`.
pub(crate) fn test_compiler(dir: &Path) -> ProfileCompiler {
    ProfileCompiler::new(CompilerSettings::for_host(
        ControlSocketPaths::new(dir.join("sockets")),
        PathBuf::from("/usr/share/qemu/edk2-aarch64-code.fd"),
        None,
    ))
}

/// Binaries that always resolve; the fake launcher never execs them.
pub(crate) fn test_binaries() -> EngineBinaries {
    EngineBinaries {
        aarch64: PathBuf::from("sh"),
        x86_64: PathBuf::from("sh"),
        i386: PathBuf::from("sh"),
    }
}

/// Disk tool that succeeds silently and remembers its arguments.
#[derive(Default)]
pub(crate) struct RecordingDiskTool {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingDiskTool {
    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        #[expect(clippy::unwrap_used, reason = "test mutex")]
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiskTool for RecordingDiskTool {
    async fn run(&self, args: &[OsString]) -> Result<ToolOutput, CaptureError> {
        let args = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        #[expect(clippy::unwrap_used, reason = "test mutex")]
        self.calls.lock().unwrap().push(args);
        Ok(ToolOutput {
            code: Some(0),
            ..ToolOutput::default()
        })
    }
}
