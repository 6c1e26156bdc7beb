//! Talking to encoders and decoders over the network.

pub mod activity;
pub mod credentials;
pub mod dialect;
pub mod error;
pub mod resolver;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::ActivityLog;
pub use credentials::{CredentialManager, Credentials};
pub use error::DeviceError;
pub use resolver::{Accepted, Resolver, ResolverSettings};
