//! filegate
//!
//! Password-gated remote directory listing, upload and download over a
//! line-delimited TCP protocol, with an address/host-name blacklist checked
//! before any protocol exchange.

pub mod access;
pub mod cli;
pub mod config;
pub mod logger;
pub mod net_async;
pub mod protocol;
pub mod protocol_core;

#[cfg(feature = "client")]
pub use net_async::client::{Client, ClientError, Outcome};
#[cfg(feature = "server")]
pub use net_async::server::{serve, Server, ServerContext};
