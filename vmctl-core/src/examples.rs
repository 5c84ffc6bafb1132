//! Example machine configurations, one per supported architecture.
//!
//! Used by tests across the workspace and handy as templates for a new
//! machine: `debian-arm` boots an installer ISO, the other two boot from disk.

use std::path::PathBuf;

use crate::id::VmId;
use crate::machine::{Architecture, DisplayMode, VirtualMachineConfig};

/// Returns the three canonical example machines.
#[must_use]
pub fn example_machines() -> Vec<VirtualMachineConfig> {
    let debian_arm = VirtualMachineConfig::new(
        VmId::new(),
        Architecture::Arm64,
        PathBuf::from("~/VMs/debian-arm/disk.qcow2"),
    )
    .with_memory_mib(4096)
    .with_cpu_count(4)
    .with_install_media(PathBuf::from("~/Downloads/debian-12-arm64-netinst.iso"));

    let fedora_x86 = VirtualMachineConfig::new(
        VmId::new(),
        Architecture::X86_64,
        PathBuf::from("/srv/vms/fedora/disk.qcow2"),
    )
    .with_memory_mib(8192)
    .with_cpu_count(6)
    .with_display(DisplayMode::Vnc { display: 1 });

    let win98 = VirtualMachineConfig::new(
        VmId::new(),
        Architecture::I386,
        PathBuf::from("~/VMs/win98/disk.qcow2"),
    )
    .with_memory_mib(256)
    .with_cpu_count(1)
    .with_display(DisplayMode::Sdl);

    vec![debian_arm, fedora_x86, win98]
}
