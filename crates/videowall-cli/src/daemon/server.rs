//! Unix socket server for the daemon process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use videowall_core::error::ApiError;
use videowall_core::protocol::{Command, CropSpec, Request, Response, ResponseData};
use videowall_core::topology::{DecoderId, EncoderId, PresetId};

use crate::daemon::liveness;
use crate::daemon::paths;
use crate::daemon::wall::{Dispatch, Wall};

/// Maximum number of concurrent client connections.
const MAX_CONNECTIONS: usize = 100;

/// How long in-flight connections get to finish during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum request size in bytes.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Largest matrix side accepted over the socket.
const MAX_MATRIX_SIDE: u32 = 64;

/// The daemon server that listens for client connections.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    wall: Arc<Wall>,
    connection_semaphore: Arc<Semaphore>,
    /// Notified to leave the accept loop so Drop can remove the socket and
    /// PID files.
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Bind to the current instance's socket.
    pub async fn bind(wall: Arc<Wall>) -> Result<Self> {
        let socket_path = paths::get_socket_path(None);
        let pid_path = paths::get_pid_path(None);
        Self::bind_to(socket_path, pid_path, wall).await
    }

    /// Bind to a specific socket path.
    ///
    /// Binds first and only then looks at the PID file, so two daemons
    /// racing for the same socket cannot both win:
    /// 1. Try to bind directly
    /// 2. If the socket is in use, check whether its daemon is alive
    /// 3. If not, remove the stale socket and bind again
    pub async fn bind_to(socket_path: PathBuf, pid_path: PathBuf, wall: Arc<Wall>) -> Result<Self> {
        paths::ensure_socket_dir().context("Failed to create socket directory")?;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory for {:?}", socket_path)
            })?;
        }

        // Written right after bind so a peer never sees our socket without a
        // PID to check.
        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_daemon_alive(&pid_path) {
                    anyhow::bail!(
                        "Daemon already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                // Never follow a symlink when deleting.
                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;

                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "Socket path {:?} is a symlink, refusing to delete for safety",
                        socket_path
                    );
                }

                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "Path {:?} exists but is not a socket file (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("Removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!("Daemon listening on {:?}", socket_path);

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            wall,
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle that stops [`DaemonServer::run`] when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is signaled.
    ///
    /// Starts the liveness monitor alongside. The daemon never shuts itself
    /// down for being idle; watching the wall is its job even with no
    /// clients. On shutdown, in-flight connections get a grace period.
    pub async fn run(&self) -> Result<()> {
        let monitor = liveness::spawn_monitor(&self.wall);

        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("Accepted new connection");
                            let wall = self.wall.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, wall, shutdown).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {}
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        stop_monitor(monitor);

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }
}

fn stop_monitor(monitor: JoinHandle<()>) {
    monitor.abort();
    debug!("Liveness monitor stopped");
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// True when the PID file names a process that still exists.
fn is_daemon_alive(pid_path: &Path) -> bool {
    let pid_str = match std::fs::read_to_string(pid_path) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let pid: i32 = match pid_str.trim().parse() {
        Ok(p) => p,
        Err(_) => return false,
    };

    // SAFETY: signal 0 delivers nothing; kill only reports whether the
    // process exists and may be signaled.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read one line of at most `max_size` bytes. Returns 0 at EOF.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;

    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader
            .fill_buf()
            .await
            .context("Failed to read from client")?;

        if available.is_empty() {
            if !bytes.is_empty() {
                let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
                buf.push_str(line);
            }
            return Ok(total);
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let bytes_to_consume = newline_pos.map(|p| p + 1).unwrap_or(available.len());

        if total + bytes_to_consume > max_size {
            anyhow::bail!("Request too large: exceeded {} byte limit", max_size);
        }

        // UTF-8 is validated once at the end so split characters survive.
        bytes.extend_from_slice(&available[..bytes_to_consume]);
        total += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
    buf.push_str(line);
    Ok(total)
}

/// Serve JSON-line requests on one connection until the client hangs up.
async fn handle_connection(stream: UnixStream, wall: Arc<Wall>, shutdown: Arc<Notify>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = read_line_bounded(&mut reader, &mut line, MAX_REQUEST_SIZE).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {} bytes", trimmed.len());

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &wall, &shutdown).await,
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Send one JSON object per line with 'id' and 'command' fields, e.g. {\"id\":\"1\",\"command\":{\"action\":\"status\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        debug!("Sending: {}", response_json);

        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush")?;
    }

    Ok(())
}

/// Handle a single request and return a response.
async fn handle_request(request: Request, wall: &Wall, shutdown: &Arc<Notify>) -> Response {
    debug!("Handling command: {:?}", request.command);
    let id = request.id.as_str();

    let result = match request.command {
        Command::Status => Ok(handle_status(wall).await),

        Command::Switch {
            decoders,
            encoder,
            wait,
        } => match wall.switch(&decoder_ids(decoders), &EncoderId(encoder.clone())).await {
            Ok(dispatch) => Ok(finish(dispatch, wait, format!("Switching to {}", encoder)).await),
            Err(e) => Err(e),
        },

        Command::Clear { decoder, wait } => match wall.clear(&DecoderId(decoder)).await {
            Ok(dispatch) => Ok(finish(dispatch, wait, "Clearing decoder".to_string()).await),
            Err(e) => Err(e),
        },

        Command::ClearAll { wait } => match wall.clear_all().await {
            Ok(dispatch) => Ok(finish(dispatch, wait, "Clearing the wall".to_string()).await),
            Err(e) => Err(e),
        },

        Command::SetCrop {
            decoders,
            crop,
            wait,
        } => handle_set_crop(wall, decoders, crop, wait).await,

        Command::ClearCrop { decoder, wait } => match wall.clear_crop(&DecoderId(decoder)).await {
            Ok(dispatch) => Ok(finish(dispatch, wait, "Clearing crop".to_string()).await),
            Err(e) => Err(e),
        },

        Command::Matrix {
            decoders,
            rows,
            cols,
            encoder,
            auto_crop,
            wait,
        } => handle_matrix(wall, decoders, rows, cols, encoder, auto_crop, wait).await,

        Command::SavePreset { preset, name } => handle_save_preset(wall, preset, name).await,

        Command::LoadPreset { preset, wait } => {
            match wall.load_preset(&PresetId(preset)).await {
                Ok((summary, dispatch)) => {
                    let report = if wait { Some(dispatch.wait().await) } else { None };
                    Ok(ResponseData::PresetRestored { summary, report })
                }
                Err(e) => Err(e),
            }
        }

        Command::ListPresets => Ok(ResponseData::Presets {
            presets: wall.list_presets().await,
        }),

        Command::DeletePreset { preset } => match wall.delete_preset(&PresetId(preset.clone())).await {
            Ok(()) => Ok(ResponseData::Ok {
                message: format!("Preset '{}' deleted", preset),
            }),
            Err(e) => Err(e),
        },

        Command::ActivityLog { limit } => Ok(ResponseData::ActivityLog {
            entries: wall.activity(limit),
            capacity: wall.resolver().activity().capacity(),
        }),

        Command::ClearActivity => Ok(ResponseData::Ok {
            message: format!("Cleared {} activity entries", wall.clear_activity()),
        }),

        Command::SetCredentials { username, password } => {
            handle_set_credentials(wall, username, password)
        }

        Command::TryDefaultCredentials { decoder, adopt } => {
            match wall.try_default_credentials(&DecoderId(decoder), adopt).await {
                Ok(found) => Ok(ResponseData::Credentials {
                    username: found.username,
                    adopted: adopt,
                }),
                Err(e) => Err(e),
            }
        }

        Command::Probe { device } => match wall.probe(&device).await {
            Ok(status) => Ok(ResponseData::Probe { device, status }),
            Err(e) => Err(e),
        },

        Command::Refresh => {
            let summary = liveness::sweep(wall).await;
            Ok(ResponseData::Ok {
                message: format!(
                    "Sweep complete: {} online, {} offline",
                    summary.online, summary.offline
                ),
            })
        }

        Command::Shutdown => Ok(handle_shutdown(shutdown.clone())),
    };

    match result {
        Ok(data) => Response::success(id, data),
        Err(e) => Response::error(id, e),
    }
}

/// Either report the dispatch right away or wait for its outcome.
async fn finish(dispatch: Dispatch, wait: bool, message: String) -> ResponseData {
    if wait {
        ResponseData::Batch(dispatch.wait().await)
    } else {
        ResponseData::Dispatched {
            message,
            decoders: dispatch.decoders().iter().map(|d| d.to_string()).collect(),
        }
    }
}

async fn handle_status(wall: &Wall) -> ResponseData {
    let (encoders, decoders, matrices) = wall.status().await;
    ResponseData::Topology {
        encoders,
        decoders,
        matrices,
    }
}

fn decoder_ids(decoders: Vec<String>) -> Vec<DecoderId> {
    decoders.into_iter().map(DecoderId).collect()
}

async fn handle_set_crop(
    wall: &Wall,
    decoders: Vec<String>,
    crop: CropSpec,
    wait: bool,
) -> Result<ResponseData, ApiError> {
    let dispatch = wall.set_crop(&decoder_ids(decoders), crop).await?;
    Ok(finish(dispatch, wait, "Applying crop".to_string()).await)
}

async fn handle_matrix(
    wall: &Wall,
    decoders: Vec<String>,
    rows: u32,
    cols: u32,
    encoder: String,
    auto_crop: bool,
    wait: bool,
) -> Result<ResponseData, ApiError> {
    if rows > MAX_MATRIX_SIDE || cols > MAX_MATRIX_SIDE {
        return Err(ApiError::invalid_input_with_suggestion(
            format!("Matrix {}x{} is too large", rows, cols),
            format!("Rows and columns must each be at most {}", MAX_MATRIX_SIDE),
        ));
    }
    let decoders = decoder_ids(decoders);
    let (group, dispatch) = wall
        .matrix(&decoders, rows, cols, &EncoderId(encoder), auto_crop)
        .await?;
    let report = if wait { Some(dispatch.wait().await) } else { None };
    Ok(ResponseData::MatrixCreated { group, report })
}

async fn handle_save_preset(wall: &Wall, preset: String, name: Option<String>) -> Result<ResponseData, ApiError> {
    if preset.trim().is_empty() {
        return Err(ApiError::invalid_input_with_suggestion(
            "Preset id must not be empty",
            "Name it, e.g. 'videowall preset save morning'",
        ));
    }
    let info = wall.save_preset(PresetId(preset), name).await?;
    Ok(ResponseData::Ok {
        message: format!("Saved preset '{}' ({} decoder(s))", info.id, info.decoders),
    })
}

fn handle_set_credentials(wall: &Wall, username: String, password: String) -> Result<ResponseData, ApiError> {
    if username.is_empty() {
        return Err(ApiError::invalid_input_with_suggestion(
            "Username must not be empty",
            "Usage: videowall credentials set <username> <password>",
        ));
    }
    wall.set_credentials(&username, &password);
    Ok(ResponseData::Credentials {
        username,
        adopted: true,
    })
}

/// Acknowledge, then signal the run loop after the response has gone out.
fn handle_shutdown(shutdown: Arc<Notify>) -> ResponseData {
    info!("Received shutdown command, stopping daemon");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
    });

    ResponseData::Ok {
        message: "Daemon shutting down".to_string(),
    }
}
