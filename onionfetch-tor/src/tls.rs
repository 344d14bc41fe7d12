//! TLS wrapping with a pluggable trust policy
//!
//! An https target wraps the negotiated proxy stream in TLS. The validation
//! context comes from a `TlsPolicy`; there is no fallback to plaintext when
//! the policy is missing.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::TorError;

/// Supplies the client configuration used to validate a given target.
///
/// Implementations may vary the configuration per (host, port), e.g. for
/// certificate pinning. The default policy validates against the bundled
/// webpki roots.
pub trait TlsPolicy: Send + Sync {
    fn client_config(&self, host: &str, port: u16) -> Result<Arc<ClientConfig>, TorError>;
}

/// Browser-style validation against the webpki root store.
pub struct WebPkiPolicy {
    config: Arc<ClientConfig>,
}

impl Default for WebPkiPolicy {
    fn default() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            config: Arc::new(config),
        }
    }
}

impl TlsPolicy for WebPkiPolicy {
    fn client_config(&self, _host: &str, _port: u16) -> Result<Arc<ClientConfig>, TorError> {
        Ok(self.config.clone())
    }
}

/// Perform the TLS handshake over an already-negotiated proxy stream.
pub async fn wrap_tls(
    policy: &dyn TlsPolicy,
    stream: TcpStream,
    host: &str,
    port: u16,
) -> Result<TlsStream<TcpStream>, TorError> {
    let config = policy.client_config(host, port)?;
    let name = ServerName::try_from(host.to_owned())
        .map_err(|_| TorError::TlsServerName(host.to_owned()))?;
    debug!(host, port, "starting TLS handshake");
    TlsConnector::from(config)
        .connect(name, stream)
        .await
        .map_err(|source| TorError::Tls {
            host: host.to_owned(),
            source,
        })
}

/// A proxied stream, with or without TLS on top.
pub enum MaybeTls {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTls {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTls {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTls::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTls::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
