//! Olive Forwarder - automatic UPnP port forwarding
//!
//! This library drives a UPnP Internet Gateway Device so that a set of
//! public ports declared by the application is mapped to the local host,
//! re-driving the router whenever that set changes and reporting per-port
//! outcomes through a callback.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod forwarder;

pub use config::ForwarderConfig;
pub use forwarder::{
    ConnectivityStatus, DetectedIp, ForwardPort, ForwardPortCallback, ForwardPortStatus,
    StatusCode, UpnpForwarder,
};

/// Result type alias for forwarder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for forwarder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// UPnP transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize logging
///
/// Honours `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests;
