//! Declarative virtual-machine configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::VmId;

/// Guest instruction-set architecture.
///
/// Fixed for the lifetime of a running instance: switching architecture
/// means stopping the engine and launching a different binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// 64-bit ARM (`aarch64`).
    #[serde(rename = "aarch64")]
    Arm64,
    /// 64-bit x86 (`x86_64`).
    #[serde(rename = "x86_64")]
    X86_64,
    /// 32-bit x86 (`i386`), emulated with legacy devices.
    #[serde(rename = "i386")]
    I386,
}

/// Host ISA family, used to decide whether hardware acceleration applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaFamily {
    Arm,
    X86,
}

impl Architecture {
    /// Every supported architecture.
    pub const ALL: [Architecture; 3] = [Self::Arm64, Self::X86_64, Self::I386];

    /// The name QEMU uses in `qemu-system-<name>`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::X86_64 => "x86_64",
            Self::I386 => "i386",
        }
    }

    #[must_use]
    pub fn family(self) -> IsaFamily {
        match self {
            Self::Arm64 => IsaFamily::Arm,
            Self::X86_64 | Self::I386 => IsaFamily::X86,
        }
    }

    /// Whether the target gets paravirtualized (virtio) devices.
    #[must_use]
    pub fn is_64_bit(self) -> bool {
        match self {
            Self::Arm64 | Self::X86_64 => true,
            Self::I386 => false,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aarch64" | "arm64" => Ok(Self::Arm64),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "i386" | "x86" => Ok(Self::I386),
            other => Err(CoreError::UnknownArchitecture(other.to_owned())),
        }
    }
}

/// How the engine presents the guest display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DisplayMode {
    /// Platform window: cocoa on macOS, gtk elsewhere.
    #[default]
    Native,
    Sdl,
    Gtk,
    /// VNC server on `127.0.0.1:<5900 + display>`.
    Vnc { display: u16 },
    /// No display at all.
    Headless,
}

/// Configuration snapshot used for a single launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VirtualMachineConfig {
    /// Stable identity of the machine.
    pub id: VmId,

    /// Guest architecture.
    pub architecture: Architecture,

    /// Memory size in mebibytes.
    pub memory_mib: u32,

    /// Number of virtual CPU cores.
    pub cpu_count: u16,

    /// Primary disk image (qcow2). A leading `~` is expanded at compile time.
    pub disk_path: PathBuf,

    /// Optional removable installation medium (ISO).
    #[serde(default)]
    pub install_media: Option<PathBuf>,

    /// Display output selector.
    #[serde(default)]
    pub display: DisplayMode,
}

impl VirtualMachineConfig {
    /// Create a config with 2 GiB of memory, two cores and a native display.
    #[must_use]
    pub fn new(id: VmId, architecture: Architecture, disk_path: PathBuf) -> Self {
        Self {
            id,
            architecture,
            memory_mib: 2048,
            cpu_count: 2,
            disk_path,
            install_media: None,
            display: DisplayMode::Native,
        }
    }

    #[must_use]
    pub fn with_memory_mib(mut self, memory_mib: u32) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    #[must_use]
    pub fn with_cpu_count(mut self, cpu_count: u16) -> Self {
        self.cpu_count = cpu_count;
        self
    }

    #[must_use]
    pub fn with_install_media(mut self, path: PathBuf) -> Self {
        self.install_media = Some(path);
        self
    }

    #[must_use]
    pub fn with_display(mut self, display: DisplayMode) -> Self {
        self.display = display;
        self
    }
}
