//! Captures of a stopped machine, taken on its disk image with `qemu-img`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vmctl_core::{CaptureName, StateCapture};

use super::listing::parse_tool_listing;
use crate::error::CaptureError;
use crate::paths::expand_home;

/// What a disk-tool invocation printed and how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs the disk-image tool.
#[async_trait]
pub trait DiskTool: Send + Sync {
    /// Run the tool with `args` and collect its output.
    ///
    /// # Errors
    /// Returns [`CaptureError::ToolUnavailable`] if the tool cannot be
    /// launched. A non-zero exit is NOT an error here.
    async fn run(&self, args: &[OsString]) -> Result<ToolOutput, CaptureError>;
}

/// The real `qemu-img`.
#[derive(Debug, Clone)]
pub struct QemuImg {
    binary: PathBuf,
}

impl QemuImg {
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new(PathBuf::from("qemu-img"))
    }
}

#[async_trait]
impl DiskTool for QemuImg {
    async fn run(&self, args: &[OsString]) -> Result<ToolOutput, CaptureError> {
        tracing::debug!(tool = %self.binary.display(), ?args, "running disk tool");
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CaptureError::ToolUnavailable {
                tool: self.binary.clone(),
                reason: e.to_string(),
            })?;
        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Subset of `qemu-img info --output=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: Option<String>,
    pub format: String,
    #[serde(rename = "virtual-size")]
    pub virtual_size: u64,
    #[serde(rename = "actual-size", default)]
    pub actual_size: Option<u64>,
}

/// Takes, restores, deletes and lists captures stored inside a disk image.
///
/// Only disk state is captured; the machine must not be running.
pub struct OfflineCoordinator<D> {
    tool: D,
    home: Option<PathBuf>,
}

impl<D: DiskTool> OfflineCoordinator<D> {
    /// # Arguments
    /// - `home`: directory substituted for a leading `~` in disk paths
    #[must_use]
    pub fn new(tool: D, home: Option<PathBuf>) -> Self {
        Self { tool, home }
    }

    #[must_use]
    pub fn tool(&self) -> &D {
        &self.tool
    }

    /// Create capture `name` in `disk`.
    ///
    /// # Errors
    /// Returns [`CaptureError::DuplicateName`] if `name` already exists, or
    /// the tool errors described on [`DiskTool::run`] and
    /// [`CaptureError::ToolExitNonZero`].
    pub async fn create(&self, disk: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        if self.list(disk).await?.iter().any(|c| c.name == name.as_str()) {
            return Err(CaptureError::DuplicateName(name.to_string()));
        }
        self.snapshot_op("snapshot -c", "-c", disk, name).await
    }

    /// Revert `disk` to capture `name`.
    ///
    /// # Errors
    /// See [`create`](Self::create).
    pub async fn restore(&self, disk: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        self.snapshot_op("snapshot -a", "-a", disk, name).await
    }

    /// Delete capture `name` from `disk`.
    ///
    /// # Errors
    /// See [`create`](Self::create).
    pub async fn delete(&self, disk: &Path, name: &CaptureName) -> Result<(), CaptureError> {
        self.snapshot_op("snapshot -d", "-d", disk, name).await
    }

    /// Captures stored in `disk`.
    ///
    /// # Errors
    /// See [`create`](Self::create).
    pub async fn list(&self, disk: &Path) -> Result<Vec<StateCapture>, CaptureError> {
        let disk = self.expand(disk);
        let output = self
            .checked("snapshot -l", vec!["snapshot".into(), "-l".into(), disk.into_os_string()])
            .await?;
        Ok(parse_tool_listing(&output.stdout))
    }

    /// Create an empty qcow2 image of `size` (`20G`, `512M`, …) at `path`.
    ///
    /// # Errors
    /// See [`create`](Self::create).
    pub async fn create_image(&self, path: &Path, size: &str) -> Result<(), CaptureError> {
        let path = self.expand(path);
        tracing::info!(image = %path.display(), %size, "creating disk image");
        self.checked(
            "create",
            vec![
                "create".into(),
                "-f".into(),
                "qcow2".into(),
                path.into_os_string(),
                size.into(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Read format and sizes of the image at `path`.
    ///
    /// # Errors
    /// Returns [`CaptureError::MalformedToolOutput`] if the JSON cannot be
    /// decoded, or the errors described on [`create`](Self::create).
    pub async fn inspect(&self, path: &Path) -> Result<ImageInfo, CaptureError> {
        let path = self.expand(path);
        let output = self
            .checked(
                "info",
                vec!["info".into(), "--output=json".into(), path.into_os_string()],
            )
            .await?;
        serde_json::from_str(&output.stdout).map_err(|e| CaptureError::MalformedToolOutput(e.to_string()))
    }

    async fn snapshot_op(
        &self,
        operation: &'static str,
        flag: &str,
        disk: &Path,
        name: &CaptureName,
    ) -> Result<(), CaptureError> {
        let disk = self.expand(disk);
        tracing::info!(disk = %disk.display(), capture = %name, %operation, "offline capture operation");
        self.checked(
            operation,
            vec![
                "snapshot".into(),
                flag.into(),
                name.as_str().into(),
                disk.into_os_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn checked(&self, operation: &'static str, args: Vec<OsString>) -> Result<ToolOutput, CaptureError> {
        let output = self.tool.run(&args).await?;
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr.trim().to_owned();
        tracing::warn!(%operation, code = ?output.code, %stderr, "disk tool failed");
        Err(CaptureError::ToolExitNonZero {
            operation,
            code: output.code,
            stderr,
        })
    }

    fn expand(&self, path: &Path) -> PathBuf {
        expand_home(path, self.home.as_deref())
    }
}
