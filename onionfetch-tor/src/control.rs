//! Controller interface and SOCKS port resolution
//!
//! The Tor controller is an external process; this layer only needs two of
//! its operations: configuration lookup and binding an open proxy
//! connection to a relay path.

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use onionfetch_core::RelayPath;

use crate::TorError;

/// Port used when the SocksPort setting is the literal `DEFAULT`.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Configuration key for the proxy listener setting.
const SOCKS_PORT_KEY: &str = "SocksPort";

/// Errors from controller communication
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("controller I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("controller refused the request: {0}")]
    Refused(String),

    #[error("unexpected controller reply: {0}")]
    Protocol(String),
}

/// Handle to the external Tor controller.
///
/// `get_conf` returns every value configured for a key; a scalar setting is
/// a one-element list. `create_circuit` binds an already-open local proxy
/// connection, identified by its local address, to `path`. Its failure must
/// be observable independently of the SOCKS negotiation on that connection.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn get_conf(&self, key: &str) -> Result<Vec<String>, ControlError>;

    async fn create_circuit(
        &self,
        local_addr: SocketAddr,
        path: &RelayPath,
    ) -> Result<(), ControlError>;
}

/// Resolve the local SOCKS proxy address from the controller configuration.
///
/// Tor mixes TCP and unix-socket listeners in the SocksPort setting, so the
/// values are scanned in order for the first plain decimal port. The
/// `DEFAULT` sentinel resolves to port 9050.
pub async fn resolve_socks_addr<C>(controller: &C) -> Result<SocketAddr, TorError>
where
    C: Controller + ?Sized,
{
    let values = controller
        .get_conf(SOCKS_PORT_KEY)
        .await
        .map_err(TorError::Control)?;
    let port = extract_port(&values)?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    debug!(%addr, "resolved SOCKS proxy address");
    Ok(addr)
}

fn extract_port(values: &[String]) -> Result<u16, TorError> {
    for value in values {
        if value == "DEFAULT" {
            return Ok(DEFAULT_SOCKS_PORT);
        }
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            return match value.parse::<u16>() {
                Ok(port) if port > 0 => Ok(port),
                _ => Err(TorError::InvalidProxyPort(value.clone())),
            };
        }
    }
    Err(TorError::ProxyResolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedConf(Vec<String>);

    #[async_trait]
    impl Controller for FixedConf {
        async fn get_conf(&self, _key: &str) -> Result<Vec<String>, ControlError> {
            Ok(self.0.clone())
        }

        async fn create_circuit(
            &self,
            _local_addr: SocketAddr,
            _path: &RelayPath,
        ) -> Result<(), ControlError> {
            Ok(())
        }
    }

    fn conf(values: &[&str]) -> FixedConf {
        FixedConf(values.iter().map(|v| v.to_string()).collect())
    }

    #[tokio::test]
    async fn test_first_numeric_entry_wins() {
        let addr = resolve_socks_addr(&conf(&["9050", "unix:/var/run/tor/socks"]))
            .await
            .unwrap();
        assert_eq!(addr.port(), 9050);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_default_sentinel_resolves_to_9050() {
        let addr = resolve_socks_addr(&conf(&["DEFAULT"])).await.unwrap();
        assert_eq!(addr.port(), DEFAULT_SOCKS_PORT);
    }

    #[tokio::test]
    async fn test_scalar_port() {
        let addr = resolve_socks_addr(&conf(&["9051"])).await.unwrap();
        assert_eq!(addr.port(), 9051);
    }

    #[tokio::test]
    async fn test_no_numeric_entry_is_an_error() {
        let err = resolve_socks_addr(&conf(&["unix:/var/run/tor/socks"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::ProxyResolution));
    }

    #[tokio::test]
    async fn test_port_zero_is_an_error() {
        let err = resolve_socks_addr(&conf(&["0"])).await.unwrap_err();
        assert!(matches!(err, TorError::InvalidProxyPort(_)));
    }

    #[tokio::test]
    async fn test_port_overflow_is_an_error() {
        let err = resolve_socks_addr(&conf(&["70000"])).await.unwrap_err();
        assert!(matches!(err, TorError::InvalidProxyPort(_)));
    }
}
