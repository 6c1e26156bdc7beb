//! The generic driver that walks the dialect table for an intent.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use videowall_core::intent::{DeviceEndpoint, DeviceIntent, IntentKind};
use videowall_core::topology::DeviceStatus;

use crate::device::activity::ActivityLog;
use crate::device::credentials::CredentialManager;
use crate::device::dialect::{self, Candidate, Payload, Transport};
use crate::device::error::DeviceError;
use crate::device::transport::{self, hex, LineSession, Timing};

/// Resolver tuning, as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub binary_settle_ms: u64,
    pub prompt_timeout_ms: u64,
    pub terminal_settle_ms: u64,
    pub response_limit: usize,
    /// Record liveness probes in the activity log.
    pub log_probes: bool,
    /// Try the last accepted dialect first on the next intent of the same
    /// kind for the same device.
    pub remember_dialect: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            read_timeout_ms: 3000,
            binary_settle_ms: 300,
            prompt_timeout_ms: 2000,
            terminal_settle_ms: 500,
            response_limit: 4096,
            log_probes: false,
            remember_dialect: true,
        }
    }
}

impl ResolverSettings {
    pub fn timing(&self) -> Timing {
        Timing {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            binary_settle: Duration::from_millis(self.binary_settle_ms),
            prompt_timeout: Duration::from_millis(self.prompt_timeout_ms),
            terminal_settle: Duration::from_millis(self.terminal_settle_ms),
            response_limit: self.response_limit,
        }
    }
}

/// The dialect that carried an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub transport: Transport,
    /// Same text as the accepted activity log entry.
    pub command: String,
}

#[derive(Debug, Clone, Copy)]
struct Remembered {
    index: usize,
    transport: Transport,
    /// Credentials generation the dialect was accepted under.
    generation: u64,
}

/// Line session shared by consecutive line-session candidates.
enum SessionSlot {
    Closed,
    Open(LineSession),
    Failed,
}

/// Drives intents onto devices by trying dialects in table order.
pub struct Resolver {
    timing: Timing,
    log_probes: bool,
    remember: bool,
    credentials: Arc<CredentialManager>,
    activity: Arc<ActivityLog>,
    memory: Mutex<HashMap<(Ipv4Addr, IntentKind), Remembered>>,
}

impl Resolver {
    pub fn new(
        settings: &ResolverSettings,
        credentials: Arc<CredentialManager>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            timing: settings.timing(),
            log_probes: settings.log_probes,
            remember: settings.remember_dialect,
            credentials,
            activity,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, HashMap<(Ipv4Addr, IntentKind), Remembered>> {
        self.memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The remembered dialect row, unless it was a line session accepted
    /// under credentials that have since changed.
    fn recall(&self, address: Ipv4Addr, kind: IntentKind) -> Option<usize> {
        if !self.remember {
            return None;
        }
        let generation = self.credentials.generation();
        let mut memory = self.memory();
        let entry = *memory.get(&(address, kind))?;
        if entry.transport == Transport::LineSession && entry.generation != generation {
            memory.remove(&(address, kind));
            return None;
        }
        Some(entry.index)
    }

    fn remember(&self, address: Ipv4Addr, kind: IntentKind, candidate: &Candidate) {
        if self.remember {
            self.memory().insert(
                (address, kind),
                Remembered {
                    index: candidate.index,
                    transport: candidate.transport,
                    generation: self.credentials.generation(),
                },
            );
        }
    }

    /// Carry one intent to its device.
    ///
    /// Candidates are tried strictly in order, each one recorded in the
    /// activity log, and the first accepted one wins. A remembered dialect
    /// is tried before the table; if it no longer works the full table runs.
    pub async fn resolve(&self, intent: &DeviceIntent) -> Result<Accepted, DeviceError> {
        let target = *intent.target();
        let kind = intent.kind();
        let mut candidates = dialect::candidates(intent);

        if let Some(index) = self.recall(target.address, kind) {
            if let Some(pos) = candidates.iter().position(|c| c.index == index) {
                let first = candidates.remove(pos);
                debug!("Trying remembered {} dialect for {} on {}", first.transport, kind, target);
                if let Some(accepted) = self.run(&target, kind, std::slice::from_ref(&first)).await {
                    return Ok(accepted);
                }
                self.memory().remove(&(target.address, kind));
            }
        }

        match self.run(&target, kind, &candidates).await {
            Some(accepted) => Ok(accepted),
            None => {
                warn!("No dialect accepted {} on {}", kind, target);
                Err(DeviceError::NoDialectAccepted {
                    target: target.address,
                    intent: kind,
                })
            }
        }
    }

    async fn run(&self, target: &DeviceEndpoint, kind: IntentKind, candidates: &[Candidate]) -> Option<Accepted> {
        let mut session = SessionSlot::Closed;

        for candidate in candidates {
            let (port, accepted) = match candidate.transport {
                Transport::Binary => (target.control_port, self.try_binary(target, candidate).await),
                Transport::Http => (target.http_port, self.try_http(target, candidate).await),
                Transport::LineSession => (
                    target.terminal_port,
                    self.try_line(target, candidate, &mut session).await,
                ),
            };

            if accepted {
                let command = candidate.describe(port);
                info!("{} on {} accepted via {}", kind, target, command);
                self.remember(target.address, kind, candidate);
                return Some(Accepted {
                    transport: candidate.transport,
                    command,
                });
            }
        }
        None
    }

    async fn try_binary(&self, target: &DeviceEndpoint, candidate: &Candidate) -> bool {
        let Payload::Frame(frame) = &candidate.payload else {
            return false;
        };
        let addr = SocketAddr::from((target.address, target.control_port));
        let command = candidate.describe(addr.port());
        debug!("Trying {} on {}", command, addr);

        match transport::binary_exchange(addr, frame, &self.timing).await {
            Ok(reply) => {
                let ok = candidate.acceptance.accepts(&reply);
                self.activity
                    .record(addr.to_string(), &command, ok, Some(&hex(&reply)));
                ok
            }
            Err(e) => {
                self.activity
                    .record(addr.to_string(), &command, false, Some(&e.to_string()));
                false
            }
        }
    }

    async fn try_http(&self, target: &DeviceEndpoint, candidate: &Candidate) -> bool {
        let Payload::Get(path) = &candidate.payload else {
            return false;
        };
        let addr = SocketAddr::from((target.address, target.http_port));
        let command = candidate.describe(addr.port());
        debug!("Trying {} on {}", command, addr);

        match transport::http_get(addr, &target.address.to_string(), path, &self.timing).await {
            Ok(reply) => {
                let ok = candidate.acceptance.accepts(reply.body.as_bytes());
                self.activity
                    .record(addr.to_string(), &command, ok, Some(&reply.summary()));
                ok
            }
            Err(e) => {
                self.activity
                    .record(addr.to_string(), &command, false, Some(&e.to_string()));
                false
            }
        }
    }

    /// Send one spelling over the shared session, logging in on first use.
    /// A failed login skips the remaining spellings. A session the device
    /// hung up is opened again for the next one.
    async fn try_line(&self, target: &DeviceEndpoint, candidate: &Candidate, slot: &mut SessionSlot) -> bool {
        let Payload::Line(line) = &candidate.payload else {
            return false;
        };
        let addr = SocketAddr::from((target.address, target.terminal_port));

        if let SessionSlot::Closed = slot {
            let credentials = self.credentials.current();
            match LineSession::login(addr, &credentials, &self.timing).await {
                Ok((session, _banner)) => *slot = SessionSlot::Open(session),
                Err(e) => {
                    debug!("Line session to {} unavailable: {}", addr, e);
                    self.activity.record(
                        addr.to_string(),
                        &format!("{}:login {}", Transport::LineSession, credentials.username),
                        false,
                        Some(&e.to_string()),
                    );
                    *slot = SessionSlot::Failed;
                    return false;
                }
            }
        }

        let SessionSlot::Open(session) = slot else {
            return false;
        };

        let command = candidate.describe(addr.port());
        debug!("Trying {} on {}", command, addr);
        match session.send(line).await {
            Ok(reply) => {
                let ok = candidate.acceptance.accepts(reply.as_bytes());
                self.activity.record(addr.to_string(), &command, ok, Some(&reply));
                if session.is_closed() {
                    debug!("{} hung up after {}", addr, command);
                    *slot = SessionSlot::Closed;
                }
                ok
            }
            Err(e) => {
                self.activity
                    .record(addr.to_string(), &command, false, Some(&e.to_string()));
                *slot = SessionSlot::Closed;
                false
            }
        }
    }

    /// Reachability check: the first port that accepts a connection within
    /// `limit` makes the device online. Probes never raise.
    pub async fn probe(&self, address: Ipv4Addr, ports: &[u16], limit: Duration) -> DeviceStatus {
        for &port in ports {
            let addr = SocketAddr::from((address, port));
            let reachable = transport::connect(addr, limit).await.is_ok();
            if self.log_probes {
                self.activity.record(addr.to_string(), "PROBE", reachable, None);
            }
            if reachable {
                return DeviceStatus::Online;
            }
        }
        DeviceStatus::Offline
    }
}
