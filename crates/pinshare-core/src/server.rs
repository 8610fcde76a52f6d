//! Single-shot HTTPS server.
//!
//! Lifecycle is a type-state chain: `SingleShotServer` (idle) is bound into a
//! `ListeningServer`, whose `serve_one` accepts exactly one connection,
//! answers one HTTP transaction and returns a `ServeOutcome`. The listener is
//! consumed on accept, so a second client always finds the port closed.
//!
//! Every request that is not exactly `/{token}/{filename}` gets the same empty
//! `403`, whatever part was wrong. A failed or rejected connection still uses
//! up the run.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use transport_tls::TlsListener;

use crate::config::ShareConfig;
use crate::credential::{Credential, PublicKeyPin};
use crate::error::ShareError;
use crate::target::ShareTarget;
use crate::token::CapabilityToken;
use crate::url::{share_url, ShareRequest};

type ShareBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// What the one connection of a run amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The file was streamed in full.
    Completed { bytes: u64 },
    /// A request arrived without the exact token and file name.
    Rejected,
    /// The connection ended without a complete transaction.
    Aborted { reason: String },
    /// The operator cancelled the run.
    Interrupted,
    /// Nobody fetched the file before the deadline.
    TimedOut,
}

impl ServeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ServeOutcome::Completed { .. })
    }
}

impl fmt::Display for ServeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeOutcome::Completed { bytes } => write!(f, "file sent ({} bytes)", bytes),
            ServeOutcome::Rejected => write!(f, "request rejected (wrong token or file name)"),
            ServeOutcome::Aborted { reason } => write!(f, "connection aborted: {}", reason),
            ServeOutcome::Interrupted => write!(f, "interrupted before the file was sent"),
            ServeOutcome::TimedOut => write!(f, "timed out waiting for a download"),
        }
    }
}

/// Everything a client needs to fetch the file.
#[derive(Debug, Clone, Serialize)]
pub struct ShareInfo {
    pub url: String,
    pub pin: PublicKeyPin,
    pub filename: String,
    pub local_addr: SocketAddr,
}

impl ShareInfo {
    pub fn new(local_addr: SocketAddr, token: &CapabilityToken, filename: &str, pin: PublicKeyPin) -> Self {
        Self {
            url: share_url(local_addr, token.as_str(), filename),
            pin,
            filename: filename.to_string(),
            local_addr,
        }
    }
}

/// Idle server: credential, token and target wired together, nothing bound yet.
pub struct SingleShotServer {
    config: ShareConfig,
    target: ShareTarget,
    credential: Credential,
    token: CapabilityToken,
}

impl SingleShotServer {
    pub fn new(
        config: ShareConfig,
        target: ShareTarget,
        credential: Credential,
        token: CapabilityToken,
    ) -> Self {
        Self {
            config,
            target,
            credential,
            token,
        }
    }

    /// Bind the configured address. Port 0 picks a free port; the one actually
    /// bound ends up in the share URL.
    pub async fn bind(mut self) -> Result<ListeningServer, ShareError> {
        let pin = self.credential.pin();
        let key = self.credential.take_private_key();
        let listener =
            TlsListener::bind(self.config.bind_addr(), self.credential.certificate_der(), key)
                .await?;
        let local_addr = listener.local_addr();

        let info = ShareInfo::new(local_addr, &self.token, self.target.name(), pin);
        tracing::info!("Listening on {} for {}", local_addr, self.target.summary());

        Ok(ListeningServer {
            listener,
            handler: ShareHandler::new(self.token, self.target),
            info,
            timeout: self.config.timeout(),
        })
    }
}

/// Bound server waiting for its one connection.
pub struct ListeningServer {
    listener: TlsListener,
    handler: ShareHandler,
    info: ShareInfo,
    timeout: Option<Duration>,
}

impl ListeningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.info.local_addr
    }

    pub fn share_info(&self) -> &ShareInfo {
        &self.info
    }

    /// Accept one connection, answer one request, stop. Resolving `interrupt`
    /// before any request is answered ends the run with
    /// `ServeOutcome::Interrupted`; once the file is on its way, cutting the
    /// run short reports `Aborted` instead.
    pub async fn serve_one<F>(self, interrupt: F) -> Result<ServeOutcome, ShareError>
    where
        F: Future<Output = ()>,
    {
        let ListeningServer {
            listener,
            handler,
            timeout,
            ..
        } = self;

        let disposition = handler.disposition.clone();
        let serve = accept_and_serve(listener, handler);
        let bounded = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, serve)
                    .await
                    .unwrap_or(Ok(ServeOutcome::TimedOut)),
                None => serve.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = interrupt => Ok(ServeOutcome::Interrupted),
            outcome = bounded => outcome,
        }?;
        let outcome = settle(outcome, disposition.get());

        tracing::info!("Run finished: {}", outcome);
        Ok(outcome)
    }
}

/// An interrupt or deadline only means "nothing happened" if the handler
/// never answered. Otherwise the answer it gave decides the outcome.
fn settle(outcome: ServeOutcome, disposition: Option<&Disposition>) -> ServeOutcome {
    let cut = match outcome {
        ServeOutcome::Interrupted => "interrupted",
        ServeOutcome::TimedOut => "timed out",
        done => return done,
    };
    match disposition {
        None => outcome,
        Some(Disposition::Served { bytes }) => ServeOutcome::Aborted {
            reason: format!("{} mid-transfer of {} bytes", cut, bytes),
        },
        Some(Disposition::HeadOnly { .. }) => ServeOutcome::Aborted {
            reason: format!("{} after answering a HEAD request", cut),
        },
        Some(Disposition::Rejected) => ServeOutcome::Rejected,
        Some(Disposition::Failed(reason)) => ServeOutcome::Aborted {
            reason: reason.clone(),
        },
    }
}

async fn accept_and_serve(
    listener: TlsListener,
    handler: ShareHandler,
) -> Result<ServeOutcome, ShareError> {
    let incoming = listener.accept_one().await?;
    let peer = incoming.peer_addr();
    tracing::info!("Connection from {}", peer);

    let tls = match incoming.handshake().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("TLS handshake with {} failed: {}", peer, e);
            return Ok(ServeOutcome::Aborted {
                reason: format!("TLS handshake failed: {}", e),
            });
        }
    };

    let disposition = handler.disposition.clone();
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { handler.handle(req).await }
    });

    let result = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(tls), service)
        .await;

    let outcome = match (disposition.get(), result) {
        (Some(Disposition::Served { bytes }), Ok(())) => ServeOutcome::Completed { bytes: *bytes },
        (Some(Disposition::Served { .. }), Err(e)) => ServeOutcome::Aborted {
            reason: format!("transfer interrupted: {}", e),
        },
        (Some(Disposition::HeadOnly { bytes }), _) => ServeOutcome::Aborted {
            reason: format!("HEAD request answered ({} bytes), file not sent", bytes),
        },
        (Some(Disposition::Rejected), _) => ServeOutcome::Rejected,
        (Some(Disposition::Failed(reason)), _) => ServeOutcome::Aborted {
            reason: reason.clone(),
        },
        (None, Err(e)) => ServeOutcome::Aborted {
            reason: e.to_string(),
        },
        (None, Ok(())) => ServeOutcome::Aborted {
            reason: "connection closed before a request was made".to_string(),
        },
    };
    Ok(outcome)
}

/// How the handler answered; written once per connection.
#[derive(Debug)]
enum Disposition {
    Served { bytes: u64 },
    HeadOnly { bytes: u64 },
    Rejected,
    Failed(String),
}

/// Request handler with the token and target bound in at construction.
#[derive(Clone)]
struct ShareHandler {
    token: Arc<CapabilityToken>,
    target: Arc<ShareTarget>,
    disposition: Arc<OnceLock<Disposition>>,
}

impl ShareHandler {
    fn new(token: CapabilityToken, target: ShareTarget) -> Self {
        Self {
            token: Arc::new(token),
            target: Arc::new(target),
            disposition: Arc::new(OnceLock::new()),
        }
    }

    /// Both halves are always compared so the answer takes the same path
    /// whichever one is wrong.
    fn authorize(&self, request: &ShareRequest) -> bool {
        let token_ok = self.token.ct_matches(&request.token);
        let name_ok = request.filename.as_bytes().ct_eq(self.target.name().as_bytes());
        (token_ok & name_ok).into()
    }

    fn record(&self, disposition: Disposition) {
        let _ = self.disposition.set(disposition);
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<ShareBody>, Infallible> {
        // The path carries the token; keep it out of the logs. Any query
        // string makes the target something other than the share path.
        let path_ok = ShareRequest::from_path(req.uri().path())
            .map(|r| self.authorize(&r))
            .unwrap_or(false);
        let authorized = path_ok && req.uri().query().is_none();

        if !authorized {
            tracing::warn!("Rejected {} request", req.method());
            self.record(Disposition::Rejected);
            return Ok(status_only(StatusCode::FORBIDDEN));
        }

        match self.target.open().await {
            Ok((file, len)) => {
                if req.method() == Method::HEAD {
                    tracing::info!("Answering HEAD for {} ({} bytes)", self.target.name(), len);
                    self.record(Disposition::HeadOnly { bytes: len });
                } else {
                    tracing::info!("Serving {} ({} bytes)", self.target.name(), len);
                    self.record(Disposition::Served { bytes: len });
                }
                Ok(file_response(file, len))
            }
            Err(e) => {
                tracing::error!("Failed to open {}: {}", self.target.path().display(), e);
                self.record(Disposition::Failed(format!("cannot open file: {}", e)));
                Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
            }
        }
    }
}

fn status_only(status: StatusCode) -> Response<ShareBody> {
    let body = Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

/// Stream exactly `len` bytes of `file`. The handle is dropped with the body
/// on every path: complete, client gone, or error.
fn file_response(file: tokio::fs::File, len: u64) -> Response<ShareBody> {
    let stream = ReaderStream::new(file.take(len)).map_ok(Frame::data);
    let mut resp = Response::new(StreamBody::new(stream).boxed_unsync());
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    resp
}
