//! Integration tests against a real QEMU.
//!
//! Require `qemu-system-x86_64` and `qemu-img` on `$PATH`. No guest OS is
//! needed: the machine boots into firmware and sits there.
//! Run with: `cargo test --test qemu_lifecycle -- --ignored`

use std::time::Duration;

use vmctl_core::{Architecture, DisplayMode, VirtualMachineConfig, VmId};
use vmctl_engine::{
    CaptureMode, Controller, EngineSettings, GuestStatus, InstanceState, QemuImg, TokioLauncher, UnixConsole,
};

type RealController = Controller<TokioLauncher, UnixConsole, QemuImg>;

fn settings(dir: &std::path::Path) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.socket_dir = dir.join("sockets");
    settings.stop_grace = Duration::from_secs(3);
    settings
}

async fn machine(controller: &RealController, dir: &std::path::Path) -> VirtualMachineConfig {
    let disk = dir.join("disk.qcow2");
    controller
        .offline_coordinator()
        .create_image(&disk, "64M")
        .await
        .expect("qemu-img create");
    VirtualMachineConfig::new(VmId::new(), Architecture::X86_64, disk)
        .with_memory_mib(256)
        .with_cpu_count(1)
        .with_display(DisplayMode::Headless)
}

async fn wait_for_socket(controller: &RealController, id: VmId) {
    let socket = controller.supervisor().socket_path(id);
    for _ in 0..50 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("engine never bound {}", socket.display());
}

#[tokio::test]
#[ignore = "requires qemu-system-x86_64 and qemu-img"]
async fn start_capture_restore_stop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = Controller::from_settings(&settings(dir.path()));
    let cfg = machine(&controller, dir.path()).await;

    controller.start(&cfg).await.expect("start");
    wait_for_socket(&controller, cfg.id).await;
    assert!(matches!(controller.mode(cfg.id).await, CaptureMode::Live(_)));

    let status = controller.status(cfg.id).await.expect("status");
    assert_eq!(status, GuestStatus::Running);

    let name = controller
        .capture_create(&cfg, Some("firmware idle"))
        .await
        .expect("live capture");
    let listed = controller.capture_list(&cfg).await.expect("list");
    assert!(listed.iter().any(|c| c.name == name.as_str()), "{listed:?}");

    controller.capture_restore(&cfg, &name).await.expect("restore");
    controller.capture_delete(&cfg, &name).await.expect("delete");

    controller.stop(cfg.id).await.expect("stop");
    assert_eq!(controller.state(cfg.id).await, InstanceState::Stopped);
    assert!(!controller.supervisor().socket_path(cfg.id).exists());
}

#[tokio::test]
#[ignore = "requires qemu-img"]
async fn offline_capture_on_stopped_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = Controller::from_settings(&settings(dir.path()));
    let cfg = machine(&controller, dir.path()).await;

    assert_eq!(controller.mode(cfg.id).await, CaptureMode::Offline);
    let name = controller.capture_create(&cfg, None).await.expect("offline capture");
    let listed = controller.capture_list(&cfg).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, name.as_str());

    let info = controller
        .offline_coordinator()
        .inspect(&cfg.disk_path)
        .await
        .expect("inspect");
    assert_eq!(info.format, "qcow2");
    assert_eq!(info.virtual_size, 64 * 1024 * 1024);
}
