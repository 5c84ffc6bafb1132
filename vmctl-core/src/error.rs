/// Errors produced by the `vmctl-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A capture name cannot be sent as a single console argument.
    #[error("invalid capture name '{name}': {reason}")]
    InvalidCaptureName { name: String, reason: &'static str },

    /// An architecture string did not match any supported target.
    #[error("unknown architecture '{0}': expected aarch64, x86_64 or i386")]
    UnknownArchitecture(String),
}
