//! Cleaning of interactive console output.
//!
//! The monitor is a readline console meant for humans: it echoes keystrokes,
//! redraws the line with cursor escapes, and ends every reply with a
//! `(qemu) ` prompt. Nothing here is framed, so the text is normalised before
//! anyone treats it as data.

/// Prompt printed by the monitor when it is ready for the next command.
pub const PROMPT: &str = "(qemu)";

/// Lower-cased substrings that mark a reply as a failure.
const FAILURE_MARKERS: &[&str] = &[
    "error",
    "does not exist",
    "not found",
    "unknown command",
    "could not",
    "can't",
    "cannot",
    "no block device",
    "failed",
];

/// Remove terminal escape sequences and stray control characters.
///
/// Handles CSI (`ESC [ … final`), OSC (`ESC ] … BEL|ST`) and two-byte
/// escapes. `\n` and `\t` survive; `\r` and all other C0/C1 controls do not.
#[must_use]
pub fn strip_control_sequences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.next() {
                Some('[') => {
                    // Parameters and intermediates, then one final byte in @..~
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// A cleaned console reply.
///
/// Holds the lines the console printed in response to one command, without
/// the echoed command, the banner, prompts, blank lines, or escape codes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsoleReply {
    lines: Vec<String>,
}

impl ConsoleReply {
    /// Clean a raw reply to `command`.
    #[must_use]
    pub fn from_raw(command: &str, raw: &str) -> Self {
        let command = command.trim();
        let lines = strip_control_sequences(raw)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !is_noise(line, command))
            .map(str::to_owned)
            .collect();
        Self { lines }
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The reply as newline-joined text.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// First line carrying a known failure marker, if any.
    ///
    /// The console has no status code; a rejected command and a successful
    /// one are told apart only by what they print.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|line| {
                let lower = line.to_ascii_lowercase();
                FAILURE_MARKERS.iter().any(|m| lower.contains(m))
            })
            .map(String::as_str)
    }
}

fn is_noise(line: &str, command: &str) -> bool {
    if line.starts_with(PROMPT) {
        return true;
    }
    if line == command {
        return true;
    }
    line.starts_with("QEMU ") && line.contains("monitor - type 'help'")
}

/// Guest run state reported by `info status`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum GuestStatus {
    Running,
    Paused,
    /// Any other state string (`shutdown`, `inmigrate`, …) or an unreadable reply.
    Other(String),
}

impl GuestStatus {
    /// Parse the reply to `info status`.
    #[must_use]
    pub fn from_reply(reply: &ConsoleReply) -> Self {
        let Some(rest) = reply
            .lines()
            .iter()
            .find_map(|line| line.strip_prefix("VM status:"))
        else {
            return Self::Other(reply.text());
        };
        let rest = rest.trim();
        match rest.split_whitespace().next() {
            Some("running") => Self::Running,
            Some("paused") => Self::Paused,
            _ => Self::Other(rest.to_owned()),
        }
    }
}
