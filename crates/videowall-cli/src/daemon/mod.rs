//! The wall daemon: configuration, state, device dispatch and the socket
//! server in front of it.

pub mod client;
pub mod config;
pub mod liveness;
pub mod paths;
pub mod presets;
pub mod server;
pub mod wall;

pub use client::DaemonClient;
pub use config::WallConfig;
pub use server::DaemonServer;
pub use wall::Wall;
