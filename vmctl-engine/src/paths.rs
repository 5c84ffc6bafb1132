//! Path derivation: control sockets and `~` expansion.

use std::path::{Path, PathBuf};

use vmctl_core::VmId;

/// Derives the control socket path of each machine.
///
/// The path is a pure function of the machine identity so that a socket left
/// behind by an engine that outlived the application can be found again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSocketPaths {
    dir: PathBuf,
}

impl ControlSocketPaths {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Directory holding every control socket.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/vmctl-<id>.monitor`
    #[must_use]
    pub fn for_vm(&self, id: VmId) -> PathBuf {
        self.dir.join(format!("vmctl-{id}.monitor"))
    }
}

impl Default for ControlSocketPaths {
    /// `/tmp/vmctl`. Unix socket paths are capped near 104 bytes on macOS, so
    /// the per-user temp dir there is too deep to use.
    fn default() -> Self {
        Self::new(PathBuf::from("/tmp/vmctl"))
    }
}

/// Replace a leading `~` component with `home`.
///
/// `~user` forms are left untouched, as are paths when no home is known.
#[must_use]
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
