//! C3 — admin socket client. Speaks the proxy's interactive CLI protocol
//! over a UNIX domain socket: a `prompt`/`set timeout cli` handshake up
//! front, then line-buffered command/response pairs terminated by the
//! `"> "` prompt.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::stats::{self, DaemonInfo, MalformedStats, ParsedStats};

const CLI_BUFSIZE: usize = 4096;
const CLI_PROMPT: &str = "> ";
const CLI_CMD_TIMEOUT: Duration = Duration::from_secs(1);
const CLI_SET_TIMEOUT_SECS: u64 = 100_000;
const CLI_MAXLINES: usize = 1000;

/// Transport failure: an I/O error, or EOF before the prompt ever showed up.
#[derive(Debug)]
pub enum SocketError {
    Io(std::io::Error),
    Eof,
    Timeout,
    Stats(MalformedStats),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Io(e) => write!(f, "admin socket I/O error: {}", e),
            SocketError::Eof => write!(f, "error while waiting for prompt: connection closed"),
            SocketError::Timeout => write!(f, "admin socket command timed out"),
            SocketError::Stats(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SocketError {}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        SocketError::Io(e)
    }
}

impl From<MalformedStats> for SocketError {
    fn from(e: MalformedStats) -> Self {
        SocketError::Stats(e)
    }
}

/// A connected admin-socket session, already past the `prompt` handshake.
pub struct AdminClient {
    path: String,
    stream: UnixStream,
}

impl AdminClient {
    /// Connects to `path` and performs the interactive-mode handshake
    /// (`prompt`, then `set timeout cli`). Errors out early if the
    /// handshake doesn't complete, mirroring the original client's
    /// "error while initializing interactive mode" behavior.
    pub async fn connect(path: impl Into<String>) -> Result<Self, SocketError> {
        let path = path.into();
        let stream = UnixStream::connect(&path).await?;
        let mut client = AdminClient { path, stream };
        client.send("prompt").await?;
        client.wait().await?;
        client
            .send(&format!("set timeout cli {}", CLI_SET_TIMEOUT_SECS))
            .await?;
        client.wait().await?;
        Ok(client)
    }

    /// Wraps an already-connected stream without running the handshake.
    /// Used by other components' tests to drive a loopback/pipe double as
    /// the admin socket.
    #[cfg(test)]
    pub(crate) fn from_parts(path: impl Into<String>, stream: UnixStream) -> Self {
        AdminClient { path: path.into(), stream }
    }

    /// Closes the current connection and reconnects from scratch.
    pub async fn reconnect(&mut self) -> Result<(), SocketError> {
        self.close().await;
        let fresh = AdminClient::connect(self.path.clone()).await?;
        self.stream = fresh.stream;
        Ok(())
    }

    /// Sends `quit` and tears the socket down. Best-effort: failures here
    /// are not reported, matching the original's "ignore errors on close".
    pub async fn close(&mut self) {
        let _ = self.send("quit").await;
        let _ = self.stream.shutdown().await;
    }

    /// Writes a single command line, terminated by `\n`.
    async fn send(&mut self, cmdline: &str) -> Result<(), SocketError> {
        let line = format!("{}\n", cmdline);
        timeout(CLI_CMD_TIMEOUT, self.stream.write_all(line.as_bytes()))
            .await
            .map_err(|_| SocketError::Timeout)??;
        Ok(())
    }

    async fn recv_chunk(&mut self) -> Result<String, SocketError> {
        let mut buf = vec![0u8; CLI_BUFSIZE];
        let n = timeout(CLI_CMD_TIMEOUT, self.stream.read(&mut buf))
            .await
            .map_err(|_| SocketError::Timeout)??;
        if n == 0 {
            return Err(SocketError::Eof);
        }
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }

    /// Waits for the prompt and discards everything read up to it.
    async fn wait(&mut self) -> Result<(), SocketError> {
        let mut rbuf = String::new();
        while !rbuf.ends_with(CLI_PROMPT) {
            let data = self.recv_chunk().await?;
            let tail_start = rbuf.len().saturating_sub(CLI_PROMPT.len() - 1);
            rbuf = rbuf[tail_start..].to_string() + &data;
        }
        Ok(())
    }

    /// Receives lines up to `CLI_MAXLINES` or until the prompt shows up,
    /// whichever comes first. Lines beyond the cap are discarded, not
    /// buffered, matching the original's bounded-memory reader.
    async fn recv_lines(&mut self) -> Result<Vec<String>, SocketError> {
        let mut lines = Vec::new();
        let mut rbuf = String::new();
        let mut linecount = 0usize;

        while !rbuf.ends_with(CLI_PROMPT) {
            if linecount == CLI_MAXLINES {
                let data = self.recv_chunk().await?;
                let tail_start = rbuf.len().saturating_sub(CLI_PROMPT.len() - 1);
                rbuf = rbuf[tail_start..].to_string() + &data;
                continue;
            }

            let data = self.recv_chunk().await?;
            rbuf.push_str(&data);

            while linecount < CLI_MAXLINES {
                let Some(idx) = rbuf.find('\n') else { break };
                let line = rbuf[..idx].to_string();
                rbuf = rbuf[idx + 1..].to_string();
                linecount += 1;
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Sends a command and returns its reply lines, with the trailing
    /// prompt line stripped.
    async fn command(&mut self, cmdline: &str) -> Result<Vec<String>, SocketError> {
        self.send(cmdline).await?;
        let mut lines = self.recv_lines().await?;
        if matches!(lines.last(), Some(last) if last.trim_end() == CLI_PROMPT.trim_end()) {
            lines.pop();
        }
        Ok(lines)
    }

    /// Runs `show info` and parses the reply into a `DaemonInfo`.
    pub async fn show_info(&mut self) -> Result<DaemonInfo, SocketError> {
        let lines = self.command("show info").await?;
        Ok(stats::parse_info(lines)?)
    }

    /// Runs `show stat` and parses the reply into `ParsedStats`.
    pub async fn show_stat(&mut self) -> Result<ParsedStats, SocketError> {
        let lines = self.command("show stat").await?;
        Ok(stats::parse_stat(lines)?)
    }

    /// Routes traffic to `backend/id` (`enable server <backend>/<id>`).
    pub async fn enable_server(&mut self, backend: &str, id: &str) -> Result<(), SocketError> {
        self.send(&format!("enable server {}/{}", backend, id)).await?;
        self.wait().await
    }

    /// Stops routing traffic to `backend/id` (`disable server <backend>/<id>`).
    pub async fn disable_server(&mut self, backend: &str, id: &str) -> Result<(), SocketError> {
        self.send(&format!("disable server {}/{}", backend, id)).await?;
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_error_display_names_the_failure() {
        assert_eq!(
            SocketError::Eof.to_string(),
            "error while waiting for prompt: connection closed"
        );
    }

    #[tokio::test]
    async fn handshake_sends_prompt_then_timeout_then_returns_connected_client() {
        let (client_half, server_half) = UnixStream::pair().expect("socket pair");

        let server = tokio::spawn(async move {
            let mut server_half = server_half;
            let mut buf = [0u8; 256];

            // "prompt\n" from the client, reply with the bare prompt.
            let n = server_half.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"prompt\n");
            server_half.write_all(b"> ").await.unwrap();

            // "set timeout cli N\n", reply with the bare prompt again.
            let n = server_half.read(&mut buf).await.unwrap();
            let sent = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(sent.starts_with("set timeout cli "));
            server_half.write_all(b"> ").await.unwrap();

            server_half
        });

        let mut client = AdminClient {
            path: "/tmp/nonexistent-for-test".to_string(),
            stream: client_half,
        };
        client.send("prompt").await.unwrap();
        client.wait().await.unwrap();
        client
            .send(&format!("set timeout cli {}", CLI_SET_TIMEOUT_SECS))
            .await
            .unwrap();
        client.wait().await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn command_strips_trailing_prompt_line() {
        let (client_half, server_half) = UnixStream::pair().expect("socket pair");

        let server = tokio::spawn(async move {
            let mut server_half = server_half;
            let mut buf = [0u8; 256];
            let n = server_half.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"show info\n");
            server_half
                .write_all(b"Name: HAProxy\nVersion: 1.5.0\n> ")
                .await
                .unwrap();
        });

        let mut client = AdminClient {
            path: "/tmp/nonexistent-for-test".to_string(),
            stream: client_half,
        };
        let lines = client.command("show info").await.unwrap();
        assert_eq!(lines, vec!["Name: HAProxy".to_string(), "Version: 1.5.0".to_string()]);

        server.await.unwrap();
    }
}
