//! Onionfetch Client
//!
//! Per-request HTTP fetches over caller-chosen circuits, verified by a
//! streaming digest of the response body:
//! - Scheme dispatch and the HTTP/1.1 exchange over a routed transport
//! - Streaming digest reader with single-fire completion and cancellation

pub mod client;
pub mod digest;

pub use client::*;
pub use digest::*;

use thiserror::Error;

use onionfetch_tor::TorError;

/// Errors surfaced by a fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The target URI scheme is neither http nor https. Raised before any
    /// network attempt.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    /// The target URI is missing a host.
    #[error("invalid target URI: {0}")]
    InvalidUri(String),

    /// The routed-connection layer failed (proxy resolution, SOCKS5,
    /// circuit bind, TLS).
    #[error(transparent)]
    Tor(#[from] TorError),

    /// The HTTP exchange failed.
    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    /// The outgoing request could not be built.
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The response ended with possible data loss. Carries the digest of
    /// the bytes actually received, not a bare I/O error.
    #[error("response ended early (status {status}): digest of {bytes} received bytes is {digest}")]
    PartialDownload {
        status: u16,
        digest: String,
        bytes: u64,
    },

    /// Any other body-delivery failure.
    #[error("response body failed: {0}")]
    Stream(String),

    /// The fetch was cancelled before it resolved.
    #[error("fetch cancelled")]
    Cancelled,
}
