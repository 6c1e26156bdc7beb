//! Fleet-wide credentials for authenticated line sessions.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::activity::ActivityLog;
use crate::device::transport::{LineSession, Timing};

/// Pairs commonly shipped as factory defaults, tried in order.
pub const DEFAULT_CREDENTIALS: &[(&str, &str)] = &[
    ("admin", "admin"),
    ("admin", ""),
    ("root", "root"),
    ("root", ""),
    ("admin", "12345"),
    ("admin", "123456"),
    ("admin", "password"),
    ("user", "user"),
    ("root", "admin"),
];

/// A username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("admin", "admin")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Holds the current credentials.
///
/// Every change bumps a generation counter. Anything cached under an older
/// generation (remembered line-session dialects) is stale.
#[derive(Debug, Default)]
pub struct CredentialManager {
    current: RwLock<Credentials>,
    generation: AtomicU64,
}

impl CredentialManager {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            current: RwLock::new(credentials),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Credentials {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the credentials and invalidate cached session state.
    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        let credentials = Credentials::new(username, password);
        info!("Credentials changed to user '{}'", credentials.username);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = credentials;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Try each default pair with a login-only handshake against `addr`.
    ///
    /// Returns the first pair that logs in. The current credentials are left
    /// alone; adopting the result is up to the caller.
    pub async fn try_defaults(
        &self,
        addr: SocketAddr,
        timing: &Timing,
        activity: &ActivityLog,
    ) -> Option<Credentials> {
        for (username, password) in DEFAULT_CREDENTIALS {
            let candidate = Credentials::new(*username, *password);
            let command = format!("TELNET:login {}", username);
            match LineSession::login(addr, &candidate, timing).await {
                Ok(_) => {
                    activity.record(addr.to_string(), &command, true, None);
                    info!("Default credentials for '{}' work on {}", username, addr);
                    return Some(candidate);
                }
                Err(e) => {
                    debug!("Default login '{}' on {} failed: {}", username, addr, e);
                    activity.record(addr.to_string(), &command, false, Some(&e.to_string()));
                }
            }
        }
        None
    }
}
