//! Tokio transport for the filegate daemon and client.

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod handler;
#[cfg(feature = "server")]
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
