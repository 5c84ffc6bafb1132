//! Monitor console transport over a Unix domain socket.
//!
//! The engine binds the socket in server mode (`-monitor unix:…,server,nowait`)
//! and greets every new connection with a banner and a prompt. A round trip
//! therefore reads up to the first prompt, writes the command, and reads up
//! to the next prompt. EOF also ends a reply: `quit` closes the socket
//! without prompting again.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use super::reply::{strip_control_sequences, PROMPT};
use super::ConsoleTransport;
use crate::error::ControlError;

/// Bytes read per socket read.
const READ_CHUNK: usize = 4096;

/// Default transport: a fresh socket connection per command.
#[derive(Debug, Clone)]
pub struct UnixConsole {
    response_timeout: Duration,
}

impl UnixConsole {
    /// # Arguments
    /// - `response_timeout`: upper bound on one full round trip
    #[must_use]
    pub fn new(response_timeout: Duration) -> Self {
        Self { response_timeout }
    }
}

impl Default for UnixConsole {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl ConsoleTransport for UnixConsole {
    async fn round_trip(&self, socket_path: &Path, command: &str) -> Result<String, ControlError> {
        let relay_err = |reason: String| ControlError::CommandRelayFailed {
            command: command.to_owned(),
            reason,
        };

        let exchange = async {
            let stream = UnixStream::connect(socket_path)
                .await
                .map_err(|e| relay_err(format!("connect to {}: {e}", socket_path.display())))?;
            let (mut reader, mut writer) = stream.into_split();

            let mut buf = Vec::with_capacity(READ_CHUNK);
            let greeted = read_until_prompt(&mut reader, &mut buf)
                .await
                .map_err(|e| relay_err(format!("read banner: {e}")))?;
            if !greeted {
                return Err(relay_err("console closed before the first prompt".to_owned()));
            }
            buf.clear();

            writer
                .write_all(format!("{command}\n").as_bytes())
                .await
                .map_err(|e| relay_err(format!("write command: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| relay_err(format!("flush command: {e}")))?;

            read_until_prompt(&mut reader, &mut buf)
                .await
                .map_err(|e| relay_err(format!("read reply: {e}")))?;

            Ok(String::from_utf8_lossy(&buf).into_owned())
        };

        tokio::time::timeout(self.response_timeout, exchange)
            .await
            .map_err(|_| ControlError::Timeout {
                command: command.to_owned(),
                after: self.response_timeout,
            })?
    }
}

/// Append to `buf` until the cleaned tail ends with the prompt.
///
/// Returns `false` if the peer closed the connection first.
async fn read_until_prompt<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(n) => n,
            // The engine drops the connection while exiting on `quit`.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return Ok(false),
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
        if ends_with_prompt(buf) {
            return Ok(true);
        }
    }
}

fn ends_with_prompt(buf: &[u8]) -> bool {
    // Only the tail matters; the prompt is short and escapes around it are few.
    let start = buf.len().saturating_sub(64);
    let tail = String::from_utf8_lossy(&buf[start..]);
    strip_control_sequences(&tail).trim_end().ends_with(PROMPT)
}
