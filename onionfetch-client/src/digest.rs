//! Streaming digest of a response body
//!
//! Body bytes are hashed as they arrive and never retained, so memory stays
//! bounded regardless of body size. The reader resolves exactly once: a
//! termination signal arriving after resolution is a diagnostic, never a
//! second result.

use std::future::Future;
use std::mem;
use std::sync::Once;

use digest::Digest;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::StatusCode;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::FetchError;

static MISSING_ABORT_WARNING: Once = Once::new();

/// How a body stream terminated.
pub enum BodyEnd {
    /// The stream ended cleanly.
    Done,
    /// The stream ended ambiguously; the transfer may be truncated.
    PotentialDataLoss,
    /// The stream failed outright.
    Failed(FetchError),
}

enum ReadState<D> {
    Idle,
    Receiving { hash: D, bytes: u64 },
    Finished,
}

/// Push-style digest accumulator over body chunks.
///
/// The accumulator is created when the first chunk arrives; `finish`
/// consumes it and yields the result exactly once.
pub struct DigestReader<D: Digest> {
    status: StatusCode,
    state: ReadState<D>,
}

impl<D: Digest> DigestReader<D> {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            state: ReadState::Idle,
        }
    }

    /// Hash one more chunk of the body.
    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            ReadState::Idle => {
                let mut hash = D::new();
                hash.update(chunk);
                self.state = ReadState::Receiving {
                    hash,
                    bytes: chunk.len() as u64,
                };
            }
            ReadState::Receiving { hash, bytes } => {
                hash.update(chunk);
                *bytes += chunk.len() as u64;
            }
            ReadState::Finished => {
                debug!("body chunk after digest resolution; ignoring");
            }
        }
    }

    /// Resolve the digest. Returns `None` for any signal after the first;
    /// a duplicate close notification must not fire the result twice.
    pub fn finish(&mut self, end: BodyEnd) -> Option<Result<String, FetchError>> {
        let (digest, bytes) = match mem::replace(&mut self.state, ReadState::Finished) {
            ReadState::Finished => {
                debug!("duplicate termination signal after digest resolution");
                return None;
            }
            ReadState::Idle => (hex::encode(D::new().finalize()), 0),
            ReadState::Receiving { hash, bytes } => (hex::encode(hash.finalize()), bytes),
        };
        Some(match end {
            BodyEnd::Done => Ok(digest),
            BodyEnd::PotentialDataLoss => Err(FetchError::PartialDownload {
                status: self.status.as_u16(),
                digest,
                bytes,
            }),
            BodyEnd::Failed(err) => Err(err),
        })
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ReadState::Finished)
    }
}

/// Drive a response body through a [`DigestReader`].
///
/// Resolves with the hex digest on clean completion, `PartialDownload` when
/// hyper reports the message as incomplete, or `Cancelled` once `cancelled`
/// fires. Cancellation aborts the connection task when an abort handle
/// exists; without one it still resolves, after a one-time warning.
pub async fn read_digest<D, F>(
    status: StatusCode,
    mut body: Incoming,
    abort: Option<AbortHandle>,
    cancelled: F,
) -> Result<String, FetchError>
where
    D: Digest,
    F: Future<Output = ()>,
{
    if abort.is_none() {
        MISSING_ABORT_WARNING.call_once(|| {
            warn!("transport has no abort handle; cancellation will not close the connection");
        });
    }

    let mut reader = DigestReader::<D>::new(status);
    tokio::pin!(cancelled);
    loop {
        tokio::select! {
            _ = &mut cancelled => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                return Err(FetchError::Cancelled);
            }
            frame = body.frame() => {
                let end = match frame {
                    Some(Ok(frame)) => {
                        if let Some(data) = frame.data_ref() {
                            reader.update(data);
                        }
                        continue;
                    }
                    Some(Err(err)) if err.is_incomplete_message() => BodyEnd::PotentialDataLoss,
                    Some(Err(err)) => BodyEnd::Failed(FetchError::Http(err)),
                    None => BodyEnd::Done,
                };
                return reader
                    .finish(end)
                    .unwrap_or_else(|| Err(FetchError::Stream("digest already resolved".into())));
            }
        }
    }
}
