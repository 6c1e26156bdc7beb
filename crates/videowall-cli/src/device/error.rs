//! Device I/O errors.

use std::net::{Ipv4Addr, SocketAddr};

use videowall_core::error::ApiError;
use videowall_core::intent::IntentKind;

/// Failures talking to a device.
///
/// Only [`DeviceError::NoDialectAccepted`] reaches operators as the result of
/// an intent; the other variants describe single attempts and end up in the
/// activity log.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    #[error("login to {addr} failed: {reason}")]
    AuthFailed { addr: SocketAddr, reason: String },

    #[error("exchange with {addr} failed: {reason}")]
    Exchange { addr: SocketAddr, reason: String },

    #[error("session to {addr} closed by the device")]
    SessionClosed { addr: SocketAddr },

    #[error("no dialect accepted {intent} on {target}")]
    NoDialectAccepted { target: Ipv4Addr, intent: IntentKind },
}

impl DeviceError {
    pub(crate) fn exchange(addr: SocketAddr, err: impl std::fmt::Display) -> Self {
        DeviceError::Exchange {
            addr,
            reason: err.to_string(),
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NoDialectAccepted { target, .. } => {
                ApiError::no_dialect_accepted(&target.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}
