//! Routed connector: SOCKS5 negotiation tied to a circuit bind
//!
//! Opens a TCP connection to the local proxy, asks the proxy to reach the
//! target over SOCKS5, and binds that specific proxy connection to the
//! caller's relay path via the controller. With a real Tor daemon the SOCKS
//! reply only arrives once the circuit is attached, so negotiation and
//! binding run concurrently; a bind failure always wins over whatever the
//! half-open negotiation produced.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use onionfetch_core::RelayPath;

use crate::control::{resolve_socks_addr, Controller};
use crate::TorError;

// SOCKS5 protocol constants.
const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

fn reply_reason(rep: u8) -> &'static str {
    match rep {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Connects to a target through the local proxy over a specific circuit.
///
/// One connector serves one connection attempt; connectors are built per
/// request and never pooled.
pub struct RoutedConnector<C: Controller> {
    controller: Arc<C>,
    path: RelayPath,
}

impl<C: Controller> RoutedConnector<C> {
    pub fn new(controller: Arc<C>, path: RelayPath) -> Self {
        Self { controller, path }
    }

    /// Open a proxied, circuit-bound connection to `host:port`.
    ///
    /// The circuit-bind request is issued only once the proxy TCP connection
    /// exists, keyed by that connection's local address. If the controller
    /// fails the bind, that error is returned even if the SOCKS5 exchange
    /// has not failed (or has failed differently) on its own. That precedence
    /// means `connect` does not return before the bind resolves: the
    /// controller must eventually answer every `create_circuit` request.
    /// Callers wanting an upper bound wrap the call in a timeout.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TorError> {
        let proxy = resolve_socks_addr(self.controller.as_ref()).await?;
        let stream = TcpStream::connect(proxy).await?;
        let local = stream.local_addr()?;
        debug!(%proxy, %local, host, port, path = %self.path, "binding proxy connection to circuit");

        let negotiation = socks5_negotiate(stream, host, port);
        let bind = self.controller.create_circuit(local, &self.path);
        tokio::pin!(negotiation);
        tokio::pin!(bind);

        let mut bound = false;
        loop {
            tokio::select! {
                bind_result = &mut bind, if !bound => {
                    bind_result.map_err(TorError::CircuitBind)?;
                    bound = true;
                }
                stream_result = &mut negotiation => {
                    return match stream_result {
                        Ok(stream) => {
                            if !bound {
                                (&mut bind).await.map_err(TorError::CircuitBind)?;
                            }
                            Ok(stream)
                        }
                        Err(err) => {
                            // Bind failure takes precedence over the SOCKS error.
                            if !bound {
                                if let Err(bind_err) = (&mut bind).await {
                                    return Err(TorError::CircuitBind(bind_err));
                                }
                            }
                            Err(err)
                        }
                    };
                }
            }
        }
    }
}

/// Client side of the SOCKS5 CONNECT exchange (RFC 1928, NO AUTH only).
async fn socks5_negotiate(
    mut stream: TcpStream,
    host: &str,
    port: u16,
) -> Result<TcpStream, TorError> {
    stream.write_all(&[SOCKS_VERSION, 1, AUTH_NONE]).await?;

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    if method[0] != SOCKS_VERSION {
        return Err(TorError::Socks(format!(
            "proxy speaks version 0x{:02x}, not SOCKS5",
            method[0]
        )));
    }
    if method[1] != AUTH_NONE {
        return Err(TorError::Socks(format!(
            "proxy rejected NO AUTH (selected 0x{:02x})",
            method[1]
        )));
    }

    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(TorError::Socks(format!(
                    "hostname too long for SOCKS5: {} bytes",
                    host.len()
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(TorError::Socks(format!(
            "malformed reply version 0x{:02x}",
            header[0]
        )));
    }
    if header[1] != REP_SUCCESS {
        return Err(TorError::Socks(format!(
            "proxy replied 0x{:02x}: {}",
            header[1],
            reply_reason(header[1])
        )));
    }

    // Consume the bound-address trailer.
    match header[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            stream.read_exact(&mut buf).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut buf).await?;
        }
        other => {
            return Err(TorError::Socks(format!(
                "unknown address type 0x{other:02x} in reply"
            )));
        }
    }

    Ok(stream)
}
