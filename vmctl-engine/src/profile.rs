//! Hardware profile compiler: machine configuration → QEMU argument list.
//!
//! The compiler is pure. Paths are passed through unvalidated (after `~`
//! expansion); checking that a disk exists is the caller's business.
//!
//! No audio device is ever emitted. Several QEMU audio models register
//! migration blockers, which makes `savevm` fail on a running guest.

use std::fmt;
use std::path::{Path, PathBuf};

use vmctl_core::{Architecture, DisplayMode, IsaFamily, VirtualMachineConfig};

use crate::paths::{expand_home, ControlSocketPaths};

/// Unit suffix appended to the `-m` value.
pub const MEMORY_UNIT: &str = "M";

/// Network backend id shared by the NIC and the `-netdev` flag.
const NETDEV_ID: &str = "net0";

/// CPU virtualization backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    /// macOS Hypervisor.framework.
    Hvf,
    /// Linux KVM.
    Kvm,
    /// Pure emulation.
    Tcg,
}

impl Accelerator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hvf => "hvf",
            Self::Kvm => "kvm",
            Self::Tcg => "tcg",
        }
    }

    #[must_use]
    pub fn is_hardware(self) -> bool {
        !matches!(self, Self::Tcg)
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host facts and paths the compiler needs.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    /// Where control sockets live.
    pub sockets: ControlSocketPaths,

    /// UEFI firmware for ARM guests.
    pub arm_firmware: PathBuf,

    /// Home directory for `~` expansion.
    pub home: Option<PathBuf>,

    /// ISA family of the host.
    pub host_family: IsaFamily,

    /// Accelerator used when the guest matches the host family.
    pub host_accelerator: Accelerator,
}

impl CompilerSettings {
    /// Settings describing the machine this binary was built for.
    #[must_use]
    pub fn for_host(sockets: ControlSocketPaths, arm_firmware: PathBuf, home: Option<PathBuf>) -> Self {
        let host_family = if cfg!(target_arch = "aarch64") {
            IsaFamily::Arm
        } else {
            IsaFamily::X86
        };
        let host_accelerator = if cfg!(target_os = "macos") {
            Accelerator::Hvf
        } else if cfg!(target_os = "linux") {
            Accelerator::Kvm
        } else {
            Accelerator::Tcg
        };
        Self {
            sockets,
            arm_firmware,
            home,
            host_family,
            host_accelerator,
        }
    }
}

/// Compiles [`VirtualMachineConfig`]s into engine command lines.
#[derive(Debug, Clone)]
pub struct ProfileCompiler {
    settings: CompilerSettings,
}

impl ProfileCompiler {
    #[must_use]
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Control socket the compiled command line binds for this machine.
    #[must_use]
    pub fn socket_path(&self, config: &VirtualMachineConfig) -> PathBuf {
        self.settings.sockets.for_vm(config.id)
    }

    /// Accelerator chosen for a guest architecture on this host.
    #[must_use]
    pub fn accelerator_for(&self, arch: Architecture) -> Accelerator {
        if arch.family() == self.settings.host_family {
            self.settings.host_accelerator
        } else {
            Accelerator::Tcg
        }
    }

    /// Build the full argument list (without the binary itself).
    #[must_use]
    pub fn compile(&self, config: &VirtualMachineConfig) -> Vec<String> {
        let arch = config.architecture;
        let mut args = Vec::with_capacity(40);

        push(&mut args, "-m", format!("{}{MEMORY_UNIT}", config.memory_mib));
        self.push_machine(&mut args, config);
        push(&mut args, "-display", display_value(config.display));

        let disk = self.expand(&config.disk_path);
        push(
            &mut args,
            "-drive",
            format!(
                "file={},if={},format=qcow2",
                escape_option(&disk),
                disk_interface(arch)
            ),
        );

        if let Some(media) = &config.install_media {
            self.push_install_media(&mut args, arch, &self.expand(media));
        }

        push(&mut args, "-device", format!("{},netdev={NETDEV_ID}", nic_model(arch)));
        push(&mut args, "-netdev", format!("user,id={NETDEV_ID}"));

        match arch {
            Architecture::Arm64 => push(&mut args, "-device", "qemu-xhci,id=usb".to_owned()),
            Architecture::X86_64 | Architecture::I386 => args.push("-usb".to_owned()),
        }
        push(&mut args, "-device", "usb-tablet".to_owned());
        push(&mut args, "-device", "usb-kbd".to_owned());

        push(&mut args, "-boot", "order=dc".to_owned());

        let socket = self.socket_path(config);
        push(
            &mut args,
            "-monitor",
            format!("unix:{},server,nowait", escape_option(&socket)),
        );

        args
    }

    fn push_machine(&self, args: &mut Vec<String>, config: &VirtualMachineConfig) {
        let arch = config.architecture;
        let accel = self.accelerator_for(arch);

        let (machine, cpu) = match arch {
            Architecture::Arm64 => ("virt,highmem=on", if accel.is_hardware() { "host" } else { "max" }),
            Architecture::X86_64 => ("q35", if accel.is_hardware() { "host" } else { "qemu64" }),
            Architecture::I386 => ("pc", if accel.is_hardware() { "host" } else { "qemu32" }),
        };

        push(args, "-machine", machine.to_owned());
        push(args, "-accel", accel.as_str().to_owned());
        push(args, "-cpu", cpu.to_owned());
        push(args, "-smp", config.cpu_count.max(1).to_string());

        match arch {
            Architecture::Arm64 => {
                let firmware = self.expand(&self.settings.arm_firmware);
                push(args, "-bios", firmware.display().to_string());
                push(args, "-device", "virtio-gpu-pci".to_owned());
            }
            Architecture::X86_64 | Architecture::I386 => {}
        }
    }

    fn push_install_media(&self, args: &mut Vec<String>, arch: Architecture, media: &Path) {
        let file = escape_option(media);
        match arch {
            // The virt board has no IDE bus; attach the ISO as a SCSI CD-ROM.
            Architecture::Arm64 => {
                push(
                    args,
                    "-drive",
                    format!("file={file},if=none,id=install,media=cdrom,readonly=on"),
                );
                push(args, "-device", "virtio-scsi-pci,id=scsi0".to_owned());
                push(args, "-device", "scsi-cd,bus=scsi0.0,drive=install".to_owned());
            }
            Architecture::X86_64 | Architecture::I386 => {
                push(args, "-drive", format!("file={file},if=ide,media=cdrom,readonly=on"));
            }
        }
    }

    fn expand(&self, path: &Path) -> PathBuf {
        expand_home(path, self.settings.home.as_deref())
    }
}

fn push(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_owned());
    args.push(value);
}

/// Block interface for the primary disk.
///
/// The legacy target keeps IDE so that period guests boot without drivers.
#[must_use]
pub fn disk_interface(arch: Architecture) -> &'static str {
    if arch.is_64_bit() {
        "virtio"
    } else {
        "ide"
    }
}

/// NIC model attached to the user-mode network backend.
#[must_use]
pub fn nic_model(arch: Architecture) -> &'static str {
    if arch.is_64_bit() {
        "virtio-net-pci"
    } else {
        "rtl8139"
    }
}

fn display_value(mode: DisplayMode) -> String {
    match mode {
        DisplayMode::Native if cfg!(target_os = "macos") => "cocoa".to_owned(),
        DisplayMode::Native | DisplayMode::Gtk => "gtk".to_owned(),
        DisplayMode::Sdl => "sdl".to_owned(),
        DisplayMode::Vnc { display } => format!("vnc=127.0.0.1:{display}"),
        DisplayMode::Headless => "none".to_owned(),
    }
}

/// QEMU splits option values on `,`; a literal comma is written `,,`.
fn escape_option(path: &Path) -> String {
    path.display().to_string().replace(',', ",,")
}
