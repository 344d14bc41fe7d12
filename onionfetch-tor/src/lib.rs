//! Onionfetch Tor Layer
//!
//! Routed connections through a local Tor proxy:
//! - Controller interface (config queries, circuit binding)
//! - SOCKS5 negotiation tied to a caller-chosen relay path
//! - TLS wrapping with a pluggable trust policy

pub mod connector;
pub mod control;
pub mod tls;

pub use connector::*;
pub use control::*;
pub use tls::*;

use thiserror::Error;

/// Errors from the routed-connection layer.
#[derive(Debug, Error)]
pub enum TorError {
    /// The controller configuration held no usable SOCKS port.
    #[error("no numeric SOCKS port in controller configuration")]
    ProxyResolution,

    /// A SOCKS port value was numeric but not a valid port.
    #[error("invalid SOCKS port {0:?} in controller configuration")]
    InvalidProxyPort(String),

    /// A controller query failed.
    #[error("controller request failed: {0}")]
    Control(#[source] ControlError),

    /// The controller rejected or failed the circuit-bind request.
    #[error("circuit bind failed: {0}")]
    CircuitBind(#[source] ControlError),

    /// TCP connect to the proxy, or I/O during negotiation, failed.
    #[error("proxy connection failed: {0}")]
    Connect(#[from] std::io::Error),

    /// The proxy refused or broke the SOCKS5 exchange.
    #[error("SOCKS5 negotiation failed: {0}")]
    Socks(String),

    /// An https target was requested with no trust policy configured.
    #[error("no TLS policy configured for https target")]
    TlsPolicyMissing,

    /// The target host is not a valid TLS server name.
    #[error("invalid TLS server name {0:?}")]
    TlsServerName(String),

    /// The TLS handshake failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        source: std::io::Error,
    },
}
