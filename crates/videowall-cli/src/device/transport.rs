//! Raw TCP exchanges with devices: framed binary, HTTP GET and telnet-style
//! line sessions.
//!
//! Nothing here decides whether a device *accepted* a command. These
//! functions only move bytes and report what came back.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::device::credentials::Credentials;
use crate::device::error::DeviceError;

/// Upper bound on an HTTP reply we keep reading.
const MAX_HTTP_RESPONSE: usize = 64 * 1024;

/// Upper bound on text drained from a line session in one go.
const MAX_SESSION_DRAIN: usize = 16 * 1024;

/// How long a drain waits for more bytes before deciding the device is done.
/// The whole drain is still bounded by the read timeout.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Markers in the post-login banner that mean the login was refused.
const LOGIN_FAILURE_MARKERS: &[&str] = &["incorrect", "failed", "denied", "invalid"];

/// Timeouts and limits for device I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub connect_timeout: Duration,
    /// Bounds the whole read phase of one attempt, not each read.
    pub read_timeout: Duration,
    /// Pause between sending a binary frame and reading the reply.
    pub binary_settle: Duration,
    /// How long to wait for each login prompt.
    pub prompt_timeout: Duration,
    /// Pause after a line-session write before reading the reply.
    pub terminal_settle: Duration,
    /// Largest binary reply read.
    pub response_limit: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(3),
            binary_settle: Duration::from_millis(300),
            prompt_timeout: Duration::from_secs(2),
            terminal_settle: Duration::from_millis(500),
            response_limit: 4096,
        }
    }
}

/// Open a TCP connection, bounded by `limit`.
pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, DeviceError> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(DeviceError::ConnectFailed {
            addr,
            reason: e.to_string(),
        }),
        Err(_) => Err(DeviceError::ConnectFailed {
            addr,
            reason: format!("timed out after {}ms", limit.as_millis()),
        }),
    }
}

/// Send one binary frame and read a single reply chunk.
///
/// An empty result means the device closed the connection without replying.
pub async fn binary_exchange(
    addr: SocketAddr,
    frame: &[u8],
    timing: &Timing,
) -> Result<Vec<u8>, DeviceError> {
    let mut stream = connect(addr, timing.connect_timeout).await?;
    stream
        .write_all(frame)
        .await
        .map_err(|e| DeviceError::exchange(addr, e))?;

    sleep(timing.binary_settle).await;

    let mut buf = vec![0u8; timing.response_limit.max(1)];
    match timeout(timing.read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Err(e)) => Err(DeviceError::exchange(addr, e)),
        Err(_) => Err(DeviceError::exchange(addr, "no reply before timeout")),
    }
}

/// A raw HTTP reply split at the header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpReply {
    pub status_line: String,
    pub body: String,
}

impl HttpReply {
    pub fn parse(raw: &str) -> Self {
        let status_line = raw.lines().next().unwrap_or_default().trim().to_string();
        let body = raw
            .split_once("\r\n\r\n")
            .or_else(|| raw.split_once("\n\n"))
            .map_or("", |(_, body)| body)
            .to_string();
        Self { status_line, body }
    }

    /// Status line and body on one line, for the activity log.
    pub fn summary(&self) -> String {
        let body = self.body.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("{} {}", self.status_line, body).trim().to_string()
    }
}

/// Issue a `GET` with `Connection: close` and read until the device closes
/// the connection, stops sending or the read timeout runs out.
pub async fn http_get(
    addr: SocketAddr,
    host: &str,
    path: &str,
    timing: &Timing,
) -> Result<HttpReply, DeviceError> {
    let mut stream = connect(addr, timing.connect_timeout).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| DeviceError::exchange(addr, e))?;

    let deadline = Instant::now() + timing.read_timeout;
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                raw.extend_from_slice(&buf[..n]);
                if raw.len() >= MAX_HTTP_RESPONSE {
                    break;
                }
            }
            Ok(Err(e)) if raw.is_empty() => return Err(DeviceError::exchange(addr, e)),
            // A reset after some data still leaves a usable reply.
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    Ok(HttpReply::parse(&String::from_utf8_lossy(&raw)))
}

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum NegotiationState {
    #[default]
    Data,
    Iac,
    Verb(u8),
    Sub,
    SubIac,
}

/// Strips telnet negotiation from a byte stream and refuses every option.
///
/// State carries across reads, so sequences split between chunks are
/// handled.
#[derive(Debug, Default)]
pub(crate) struct Negotiator {
    state: NegotiationState,
}

impl Negotiator {
    /// Append the text in `input` to `text` and any refusals to `replies`.
    pub(crate) fn feed(&mut self, input: &[u8], text: &mut Vec<u8>, replies: &mut Vec<u8>) {
        use NegotiationState::*;

        for &byte in input {
            self.state = match (self.state, byte) {
                (Data, IAC) => Iac,
                (Data, 0) => Data,
                (Data, b) => {
                    text.push(b);
                    Data
                }
                (Iac, IAC) => {
                    text.push(IAC);
                    Data
                }
                (Iac, verb @ (DO | DONT | WILL | WONT)) => Verb(verb),
                (Iac, SB) => Sub,
                (Iac, _) => Data,
                (Verb(DO), option) => {
                    replies.extend_from_slice(&[IAC, WONT, option]);
                    Data
                }
                (Verb(WILL), option) => {
                    replies.extend_from_slice(&[IAC, DONT, option]);
                    Data
                }
                (Verb(_), _) => Data,
                (Sub, IAC) => SubIac,
                (Sub, _) => Sub,
                (SubIac, SE) => Data,
                (SubIac, _) => Sub,
            };
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// An authenticated line-oriented session.
#[derive(Debug)]
pub struct LineSession {
    stream: TcpStream,
    addr: SocketAddr,
    negotiator: Negotiator,
    timing: Timing,
    /// The device hung up. Nothing more can be sent.
    closed: bool,
}

impl LineSession {
    /// Connect and log in. Returns the session and the post-login banner.
    ///
    /// A missing prompt and a rejected password both surface as
    /// [`DeviceError::AuthFailed`].
    pub async fn login(
        addr: SocketAddr,
        credentials: &Credentials,
        timing: &Timing,
    ) -> Result<(Self, String), DeviceError> {
        let stream = connect(addr, timing.connect_timeout).await?;
        let mut session = Self {
            stream,
            addr,
            negotiator: Negotiator::default(),
            timing: *timing,
            closed: false,
        };

        session.expect_prompt("login:").await?;
        session.write_line(&credentials.username).await?;
        session.expect_prompt("assword:").await?;
        session.write_line(&credentials.password).await?;

        sleep(timing.terminal_settle).await;
        let banner = session.drain().await?;
        if LOGIN_FAILURE_MARKERS
            .iter()
            .any(|marker| contains_ignore_case(&banner, marker))
        {
            return Err(DeviceError::AuthFailed {
                addr,
                reason: format!("login rejected for '{}'", credentials.username),
            });
        }

        debug!("Logged in to {} as {}", addr, credentials.username);
        Ok((session, banner))
    }

    /// Send one command line and return whatever the device answers.
    ///
    /// A device that answers and then hangs up still yields its answer;
    /// [`LineSession::is_closed`] tells the caller to log in again. Hanging up
    /// without answering is [`DeviceError::SessionClosed`].
    pub async fn send(&mut self, line: &str) -> Result<String, DeviceError> {
        if self.closed {
            return Err(DeviceError::SessionClosed { addr: self.addr });
        }
        if let Err(e) = self.write_line(line).await {
            self.closed = true;
            return Err(e);
        }
        sleep(self.timing.terminal_settle).await;
        let reply = self.drain().await?;
        if reply.is_empty() && self.closed {
            return Err(DeviceError::SessionClosed { addr: self.addr });
        }
        Ok(reply)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DeviceError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.stream
            .write_all(&bytes)
            .await
            .map_err(|e| DeviceError::exchange(self.addr, e))
    }

    /// Read one chunk of text. `None` means the peer closed the connection.
    async fn read_chunk(&mut self) -> Result<Option<String>, DeviceError> {
        let mut buf = [0u8; 1024];
        let n = self
            .stream
            .read(&mut buf)
            .await
            .map_err(|e| DeviceError::exchange(self.addr, e))?;
        if n == 0 {
            self.closed = true;
            return Ok(None);
        }

        let mut text = Vec::with_capacity(n);
        let mut replies = Vec::new();
        self.negotiator.feed(&buf[..n], &mut text, &mut replies);
        if !replies.is_empty() {
            self.stream
                .write_all(&replies)
                .await
                .map_err(|e| DeviceError::exchange(self.addr, e))?;
        }
        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }

    /// Read until `prompt` appears (case-insensitive) or the prompt timeout
    /// expires.
    async fn expect_prompt(&mut self, prompt: &str) -> Result<String, DeviceError> {
        let deadline = Instant::now() + self.timing.prompt_timeout;
        let mut seen = String::new();

        loop {
            if contains_ignore_case(&seen, prompt) {
                return Ok(seen);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = match timeout(remaining, self.read_chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => {
                    return Err(DeviceError::AuthFailed {
                        addr: self.addr,
                        reason: format!("connection closed before '{}' prompt", prompt),
                    })
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(DeviceError::AuthFailed {
                        addr: self.addr,
                        reason: format!("no '{}' prompt", prompt),
                    })
                }
            };
            seen.push_str(&chunk);
        }
    }

    /// Read everything the device sends until it goes quiet, hangs up or the
    /// read timeout runs out.
    async fn drain(&mut self) -> Result<String, DeviceError> {
        let deadline = Instant::now() + self.timing.read_timeout;
        let mut out = String::new();
        while out.len() < MAX_SESSION_DRAIN {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Drain from {} cut off after {:?}", self.addr, self.timing.read_timeout);
                break;
            }
            match timeout(DRAIN_POLL.min(remaining), self.read_chunk()).await {
                Ok(Ok(Some(chunk))) => out.push_str(&chunk),
                Ok(Ok(None)) => break,
                Ok(Err(e)) if out.is_empty() => return Err(e),
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }
        Ok(out)
    }
}

/// Lowercase hex without separators.
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
