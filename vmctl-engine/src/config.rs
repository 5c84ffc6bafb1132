//! Engine settings: binaries, directories, and timing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmctl_core::Architecture;

use crate::error::SettingsError;
use crate::paths::ControlSocketPaths;
use crate::profile::CompilerSettings;

/// Engine binary per guest architecture.
///
/// Bare names are looked up in `$PATH` at start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineBinaries {
    pub aarch64: PathBuf,
    pub x86_64: PathBuf,
    pub i386: PathBuf,
}

impl EngineBinaries {
    #[must_use]
    pub fn for_arch(&self, arch: Architecture) -> &PathBuf {
        match arch {
            Architecture::Arm64 => &self.aarch64,
            Architecture::X86_64 => &self.x86_64,
            Architecture::I386 => &self.i386,
        }
    }
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            aarch64: PathBuf::from("qemu-system-aarch64"),
            x86_64: PathBuf::from("qemu-system-x86_64"),
            i386: PathBuf::from("qemu-system-i386"),
        }
    }
}

/// Everything the engine layer needs from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct EngineSettings {
    /// Engine binaries.
    pub binaries: EngineBinaries,

    /// Disk-image tool used for offline captures.
    pub qemu_img: PathBuf,

    /// Directory where per-VM control sockets are created.
    pub socket_dir: PathBuf,

    /// UEFI firmware image for ARM guests.
    pub arm_firmware: PathBuf,

    /// How long `stop` waits for a graceful quit before killing.
    #[serde(with = "millis")]
    pub stop_grace: Duration,

    /// How long `stop` waits for the process to vanish after a kill.
    #[serde(with = "millis")]
    pub kill_wait: Duration,

    /// Upper bound on a single console round trip.
    #[serde(with = "millis")]
    pub console_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binaries: EngineBinaries::default(),
            qemu_img: PathBuf::from("qemu-img"),
            socket_dir: ControlSocketPaths::default().dir().to_path_buf(),
            arm_firmware: default_arm_firmware(),
            stop_grace: Duration::from_secs(1),
            kill_wait: Duration::from_secs(2),
            console_timeout: Duration::from_secs(120),
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `VMCTL_*` environment variables.
    ///
    /// # Errors
    /// Returns [`SettingsError::InvalidEnv`] if a duration variable is not a
    /// whole number of milliseconds.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source.
    ///
    /// # Errors
    /// Returns [`SettingsError::InvalidEnv`] on unparsable durations.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        let path_vars: [(&str, &mut PathBuf); 6] = [
            ("VMCTL_QEMU_AARCH64", &mut settings.binaries.aarch64),
            ("VMCTL_QEMU_X86_64", &mut settings.binaries.x86_64),
            ("VMCTL_QEMU_I386", &mut settings.binaries.i386),
            ("VMCTL_QEMU_IMG", &mut settings.qemu_img),
            ("VMCTL_SOCKET_DIR", &mut settings.socket_dir),
            ("VMCTL_ARM_FIRMWARE", &mut settings.arm_firmware),
        ];
        for (var, slot) in path_vars {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                *slot = PathBuf::from(value);
            }
        }

        let duration_vars: [(&'static str, &mut Duration); 3] = [
            ("VMCTL_STOP_GRACE_MS", &mut settings.stop_grace),
            ("VMCTL_KILL_WAIT_MS", &mut settings.kill_wait),
            ("VMCTL_CONSOLE_TIMEOUT_MS", &mut settings.console_timeout),
        ];
        for (var, slot) in duration_vars {
            if let Some(value) = lookup(var) {
                let ms: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| SettingsError::InvalidEnv { var, value: value.clone() })?;
                *slot = Duration::from_millis(ms);
            }
        }

        Ok(settings)
    }

    /// Socket path derivation for these settings.
    #[must_use]
    pub fn socket_paths(&self) -> ControlSocketPaths {
        ControlSocketPaths::new(self.socket_dir.clone())
    }

    /// Compiler settings for the current host.
    #[must_use]
    pub fn compiler_settings(&self) -> CompilerSettings {
        CompilerSettings::for_host(self.socket_paths(), self.arm_firmware.clone(), dirs::home_dir())
    }
}

fn default_arm_firmware() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/opt/homebrew/share/qemu/edk2-aarch64-code.fd")
    } else {
        PathBuf::from("/usr/share/qemu/edk2-aarch64-code.fd")
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
