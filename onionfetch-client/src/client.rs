//! Routed HTTP client
//!
//! A per-request façade: scheme dispatch, one fresh routed connector per
//! request, optional TLS wrapping, and the HTTP/1.1 exchange over the
//! negotiated transport. The one public fetch operation streams the body
//! through a SHA-1 digest.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use sha1::Sha1;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use onionfetch_core::RelayPath;
use onionfetch_tor::{
    wrap_tls, Controller, MaybeTls, RoutedConnector, TlsPolicy, TorError, WebPkiPolicy,
};

use crate::digest::read_digest;
use crate::FetchError;

/// The two schemes a routed fetch accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Target resolved once at the call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl RequestTarget {
    /// Resolve scheme, host and port from a URI. Anything other than http
    /// or https is rejected here, before any network attempt.
    pub fn from_uri(uri: &Uri) -> Result<Self, FetchError> {
        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            other => {
                return Err(FetchError::UnsupportedScheme(
                    other.unwrap_or_default().to_string(),
                ))
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| FetchError::InvalidUri(format!("no host in {uri}")))?
            .to_string();
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Self { scheme, host, port })
    }

    /// Host header value; the port is elided when it is the scheme default.
    fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A response plus the abort capability of its transport.
pub struct RoutedResponse {
    response: Response<Incoming>,
    abort: Option<AbortHandle>,
}

impl RoutedResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn response(&self) -> &Response<Incoming> {
        &self.response
    }

    /// Handle that force-closes the underlying connection, if available.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }

    pub fn into_parts(self) -> (StatusCode, Incoming, Option<AbortHandle>) {
        let status = self.response.status();
        (status, self.response.into_body(), self.abort)
    }
}

/// HTTP client that routes every request over a caller-chosen circuit.
///
/// One routed connector is built per request; connections are never pooled
/// or reused. TLS validation defaults to the webpki policy and can be
/// replaced or cleared; an https request with no policy is a configuration
/// error, not an insecure fallback.
pub struct RoutedClient<C: Controller> {
    controller: Arc<C>,
    tls_policy: Option<Arc<dyn TlsPolicy>>,
}

impl<C: Controller> Clone for RoutedClient<C> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            tls_policy: self.tls_policy.clone(),
        }
    }
}

impl<C: Controller + 'static> RoutedClient<C> {
    pub fn new(controller: Arc<C>) -> Self {
        Self {
            controller,
            tls_policy: Some(Arc::new(WebPkiPolicy::default())),
        }
    }

    pub fn with_tls_policy(mut self, policy: Option<Arc<dyn TlsPolicy>>) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Issue one HTTP exchange over a connection bound to `path`.
    pub async fn request(
        &self,
        method: Method,
        uri: &Uri,
        path: RelayPath,
    ) -> Result<RoutedResponse, FetchError> {
        let target = RequestTarget::from_uri(uri)?;
        // A missing TLS policy is a configuration error; detect it before
        // any network I/O.
        let tls_policy = match target.scheme {
            Scheme::Https => Some(
                self.tls_policy
                    .clone()
                    .ok_or(TorError::TlsPolicyMissing)?,
            ),
            Scheme::Http => None,
        };

        let connector = RoutedConnector::new(self.controller.clone(), path);
        let stream = connector.connect(&target.host, target.port).await?;
        let io = match tls_policy {
            Some(policy) => MaybeTls::Tls(Box::new(
                wrap_tls(policy.as_ref(), stream, &target.host, target.port).await?,
            )),
            None => MaybeTls::Plain(stream),
        };

        let (mut sender, conn) = http1::handshake(TokioIo::new(io)).await?;
        let conn_task = tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("routed connection ended: {err}");
            }
        });
        let abort = conn_task.abort_handle();

        let request = Request::builder()
            .method(method)
            .uri(uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"))
            .header(header::HOST, target.authority())
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        // One exchange per connection; no keep-alive reuse.
        drop(sender);

        Ok(RoutedResponse {
            response,
            abort: Some(abort),
        })
    }

    /// Fetch `uri` over `path` and resolve with the SHA-1 hex digest of the
    /// response body, streamed without buffering.
    ///
    /// Returns the pending result and a cancellation handle. Cancelling
    /// before resolution aborts the transfer and resolves with
    /// [`FetchError::Cancelled`]; dropping the handle leaves the fetch
    /// undisturbed.
    pub fn fetch_digest(&self, uri: Uri, path: RelayPath) -> (PendingFetch, FetchCancel) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let client = self.clone();
        let task = tokio::spawn(async move { client.run_fetch(uri, path, cancel_rx).await });
        (PendingFetch { task }, FetchCancel { tx: cancel_tx })
    }

    async fn run_fetch(
        self,
        uri: Uri,
        path: RelayPath,
        cancel: oneshot::Receiver<()>,
    ) -> Result<String, FetchError> {
        let cancelled = cancel_signal(cancel);
        tokio::pin!(cancelled);

        let response = tokio::select! {
            _ = &mut cancelled => return Err(FetchError::Cancelled),
            result = self.request(Method::GET, &uri, path) => result?,
        };
        let (status, body, abort) = response.into_parts();
        read_digest::<Sha1, _>(status, body, abort, cancelled).await
    }
}

/// A fetch that resolves at most once.
pub struct PendingFetch {
    task: JoinHandle<Result<String, FetchError>>,
}

impl PendingFetch {
    pub async fn wait(self) -> Result<String, FetchError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(FetchError::Stream(format!("fetch task failed: {err}"))),
        }
    }
}

/// Cancels its fetch when invoked; dropping it does nothing.
pub struct FetchCancel {
    tx: oneshot::Sender<()>,
}

impl FetchCancel {
    pub fn cancel(self) {
        let _ = self.tx.send(());
    }
}

/// Resolves only on an explicit cancel; a dropped handle never fires.
fn cancel_signal(rx: oneshot::Receiver<()>) -> impl Future<Output = ()> {
    async move {
        if rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
