//! Scripted fake devices on loopback ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::device::transport::Timing;

/// Timing short enough for tests, long enough for loopback.
pub(crate) fn fast_timing() -> Timing {
    Timing {
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(300),
        binary_settle: Duration::from_millis(10),
        prompt_timeout: Duration::from_millis(300),
        terminal_settle: Duration::from_millis(20),
        response_limit: 4096,
    }
}

/// A loopback address nobody is listening on.
pub(crate) async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Aborts the accept loop when the fake goes out of scope.
struct AcceptLoop(JoinHandle<()>);

impl Drop for AcceptLoop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Records every frame and answers with a fixed reply (or closes silently).
pub(crate) struct BinaryDevice {
    pub addr: SocketAddr,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    _task: AcceptLoop,
}

impl BinaryDevice {
    pub(crate) async fn spawn(reply: Option<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let recorded = frames.clone();

        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let reply = reply.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    if n > 0 {
                        recorded.lock().await.push(buf[..n].to_vec());
                    }
                    if let Some(reply) = reply {
                        let _ = stream.write_all(&reply).await;
                    }
                });
            }
        });

        Self {
            addr,
            frames,
            _task: AcceptLoop(task),
        }
    }

    pub(crate) async fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().await.clone()
    }
}

/// Answers `200 OK` for the listed paths and `404` for everything else.
pub(crate) struct HttpDevice {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    _task: AcceptLoop,
}

impl HttpDevice {
    pub(crate) async fn spawn(accepted_paths: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let accepted: Vec<String> = accepted_paths.iter().map(|p| p.to_string()).collect();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let accepted = accepted.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    let mut request = String::new();
                    loop {
                        let mut line = String::new();
                        match reader.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                request.push_str(&line);
                                if line == "\r\n" {
                                    break;
                                }
                            }
                        }
                    }

                    let target = request.split_whitespace().nth(1).unwrap_or_default();
                    let path = target.split('?').next().unwrap_or_default();
                    let reply = if accepted.iter().any(|p| p == path) {
                        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK"
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found"
                    };
                    recorded.lock().await.push(request);
                    let _ = writer.write_all(reply.as_bytes()).await;
                });
            }
        });

        Self {
            addr,
            requests,
            _task: AcceptLoop(task),
        }
    }

    pub(crate) async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

/// Telnet-style device: prompts for a login, then answers `OK` to lines that
/// start with one of the accepted prefixes and `ERROR` to the rest. Built
/// with [`LineDevice::spawn_hanging_up`] it closes the connection right after
/// every `ERROR`.
pub(crate) struct LineDevice {
    pub addr: SocketAddr,
    lines: Arc<Mutex<Vec<String>>>,
    logins: Arc<Mutex<Vec<String>>>,
    _task: AcceptLoop,
}

/// Trim telnet negotiation residue and line endings from a received line.
fn clean(line: &str) -> String {
    line.trim_matches(|c: char| !c.is_ascii_graphic() && c != ' ')
        .trim()
        .to_string()
}

impl LineDevice {
    pub(crate) async fn spawn(username: &str, password: &str, accepted_prefixes: &[&str]) -> Self {
        Self::start(username, password, accepted_prefixes, false).await
    }

    pub(crate) async fn spawn_hanging_up(username: &str, password: &str, accepted_prefixes: &[&str]) -> Self {
        Self::start(username, password, accepted_prefixes, true).await
    }

    async fn start(username: &str, password: &str, accepted_prefixes: &[&str], hang_up: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let logins = Arc::new(Mutex::new(Vec::new()));
        let recorded_lines = lines.clone();
        let recorded_logins = logins.clone();
        let username = username.to_string();
        let password = password.to_string();
        let prefixes: Vec<String> = accepted_prefixes.iter().map(|p| p.to_string()).collect();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded_lines = recorded_lines.clone();
                let recorded_logins = recorded_logins.clone();
                let username = username.clone();
                let password = password.clone();
                let prefixes = prefixes.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);

                    // IAC DO ECHO, then the prompt.
                    let _ = writer.write_all(&[255, 253, 1]).await;
                    let _ = writer.write_all(b"\r\nlogin: ").await;
                    let mut user = Vec::new();
                    if reader.read_until(b'\n', &mut user).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let user = clean(&String::from_utf8_lossy(&user));

                    let _ = writer.write_all(b"Password: ").await;
                    let mut pass = String::new();
                    if reader.read_line(&mut pass).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let pass = clean(&pass);
                    recorded_logins.lock().await.push(format!("{}/{}", user, pass));

                    if user != username || pass != password {
                        let _ = writer.write_all(b"\r\nLogin incorrect\r\n").await;
                        return;
                    }
                    let _ = writer.write_all(b"\r\nWelcome\r\n> ").await;

                    loop {
                        let mut line = String::new();
                        match reader.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                        let line = clean(&line);
                        let accepted = prefixes.iter().any(|p| line.starts_with(p.as_str()));
                        let reply: &[u8] = if accepted {
                            b"OK\r\n> "
                        } else {
                            b"ERROR unknown command\r\n> "
                        };
                        recorded_lines.lock().await.push(line);
                        if writer.write_all(reply).await.is_err() {
                            break;
                        }
                        if hang_up && !accepted {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            lines,
            logins,
            _task: AcceptLoop(task),
        }
    }

    /// Command lines received after successful logins.
    pub(crate) async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }

    /// `user/pass` pairs attempted.
    pub(crate) async fn logins(&self) -> Vec<String> {
        self.logins.lock().await.clone()
    }
}

/// Plays a fixed script, then sends one `.` every `every` until the client
/// goes away. The first script entry is sent on connect, each later one after
/// a line is received.
pub(crate) struct TrickleDevice {
    pub addr: SocketAddr,
    _task: AcceptLoop,
}

impl TrickleDevice {
    pub(crate) async fn spawn(script: &[&[u8]], every: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script: Vec<Vec<u8>> = script.iter().map(|s| s.to_vec()).collect();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = script.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    for (i, step) in script.iter().enumerate() {
                        if i > 0 {
                            let mut line = Vec::new();
                            if reader.read_until(b'\n', &mut line).await.unwrap_or(0) == 0 {
                                return;
                            }
                        }
                        if writer.write_all(step).await.is_err() {
                            return;
                        }
                    }
                    loop {
                        tokio::time::sleep(every).await;
                        if writer.write_all(b".").await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _task: AcceptLoop(task),
        }
    }
}
