//! Client side of the daemon socket.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};
use videowall_core::protocol::{Request, Response};

use crate::daemon::paths;

/// How long a freshly spawned daemon gets to open its socket.
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Requests that wait on devices can take a while: every dialect of every
/// intent may time out before the table is exhausted.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const WAIT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// A connection to the running daemon.
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon, starting one with `config` if none is running.
    pub async fn connect(config: Option<&Path>) -> Result<Self> {
        let socket_path = paths::get_socket_path(None);

        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            debug!("Connected to existing daemon");
            return Ok(Self { stream });
        }

        info!("Daemon not running, starting one");
        let child = Self::start_daemon(config)?;
        let stream = Self::wait_for_daemon(&socket_path, child).await?;
        Ok(Self { stream })
    }

    /// Connect only if a daemon is already running.
    pub async fn connect_existing() -> Result<Option<Self>> {
        let socket_path = paths::get_socket_path(None);
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => Ok(Some(Self { stream })),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to connect to {:?}", socket_path)),
        }
    }

    /// Spawn `videowall daemon` detached in its own process group so closing
    /// the terminal does not take it down.
    fn start_daemon(config: Option<&Path>) -> Result<std::process::Child> {
        use std::os::unix::process::CommandExt;

        let exe = std::env::current_exe().context("Failed to get current executable path")?;

        let mut command = std::process::Command::new(exe);
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }
        command
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("Failed to spawn daemon process")
    }

    /// Poll the socket until the daemon answers, failing fast if it exits.
    async fn wait_for_daemon(
        socket_path: &PathBuf,
        mut child: std::process::Child,
    ) -> Result<UnixStream> {
        let start = std::time::Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    bail!(
                        "Daemon exited immediately with status: {} (run 'videowall daemon' in the foreground to see why)",
                        status
                    );
                }
                Ok(None) => {}
                Err(e) => debug!("Error checking daemon status: {}", e),
            }

            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    info!("Connected to daemon after {:?}", start.elapsed());
                    return Ok(stream);
                }
                Err(_) if start.elapsed() > DAEMON_STARTUP_TIMEOUT => {
                    bail!("Daemon failed to start within {:?}", DAEMON_STARTUP_TIMEOUT);
                }
                Err(_) => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
    }

    pub async fn request(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Send one request line and read one response line.
    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        timeout_duration: Duration,
    ) -> Result<Response> {
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize request")?;
        debug!("Sending: {}", request_json);

        self.stream
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to write request")?;
        self.stream
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        self.stream.flush().await.context("Failed to flush")?;

        let (reader, _writer) = self.stream.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        let bytes_read = timeout(timeout_duration, reader.read_line(&mut response_line))
            .await
            .context("Request timed out")?
            .context("Failed to read response")?;

        if bytes_read == 0 {
            bail!("Daemon closed connection unexpectedly");
        }

        debug!("Received: {}", response_line.trim());

        serde_json::from_str(&response_line).context("Failed to parse response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use videowall_core::protocol::{Command, ResponseData};

    use crate::daemon::wall::tests::loopback_wall;
    use crate::daemon::DaemonServer;

    #[tokio::test]
    async fn test_client_talks_to_running_daemon() {
        let socket_path = std::env::temp_dir().join(format!(
            "videowall-client-{}.sock",
            uuid::Uuid::new_v4().simple()
        ));
        let pid_path = socket_path.with_extension("pid");

        let wall = Arc::new(loopback_wall(1, 1, None).await);
        let server = DaemonServer::bind_to(socket_path.clone(), pid_path, wall)
            .await
            .expect("Failed to bind server");
        let server_handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Connect directly; auto-start would look at the default socket.
        let stream = UnixStream::connect(&socket_path)
            .await
            .expect("Failed to connect");
        let mut client = DaemonClient { stream };

        let response = client
            .request(Request {
                id: "client-1".to_string(),
                command: Command::ListPresets,
            })
            .await
            .expect("Request failed");
        assert!(response.success);
        assert_eq!(response.id, "client-1");
        assert!(matches!(
            response.data,
            Some(ResponseData::Presets { presets }) if presets.is_empty()
        ));

        // Several requests share one connection.
        let response = client
            .request(Request {
                id: "client-2".to_string(),
                command: Command::Status,
            })
            .await
            .expect("Request failed");
        assert_eq!(response.id, "client-2");

        server_handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
}
