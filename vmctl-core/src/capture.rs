//! Point-in-time state captures.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Longest capture name accepted, in bytes.
pub const MAX_CAPTURE_NAME_LEN: usize = 128;

/// Timestamp layout used by both the console and the disk-image tool.
pub const CAPTURE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Internal name of a capture.
///
/// Names travel as a single whitespace-separated argument on a console line,
/// so whitespace and control characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaptureName(String);

impl CaptureName {
    /// Validate and wrap a capture name.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidCaptureName`] if the name is empty, longer
    /// than [`MAX_CAPTURE_NAME_LEN`], or contains whitespace or control
    /// characters.
    pub fn new(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_CAPTURE_NAME_LEN {
            Some("longer than 128 bytes")
        } else if name.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else if name.chars().any(char::is_control) {
            Some("must not contain control characters")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidCaptureName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaptureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CaptureName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CaptureName> for String {
    fn from(name: CaptureName) -> Self {
        name.0
    }
}

/// A capture as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct StateCapture {
    /// Tool-assigned id column (`--` for captures present on every disk).
    pub id: Option<String>,

    /// Internal capture name.
    pub name: String,

    /// Creation time as printed by the engine, in host local time.
    pub created_at: Option<NaiveDateTime>,

    /// Size annotation, e.g. `"1.2 GiB"`.
    pub size: Option<String>,
}

impl StateCapture {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            created_at: None,
            size: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: Option<NaiveDateTime>) -> Self {
        self.created_at = created_at;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: Option<String>) -> Self {
        self.size = size;
        self
    }
}

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp split across two columns.
///
/// Returns `None` rather than an error: a listing with an unreadable date is
/// still a listing.
#[must_use]
pub fn parse_capture_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), CAPTURE_TIMESTAMP_FORMAT).ok()
}
