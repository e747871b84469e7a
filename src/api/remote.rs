//! Purpose: HTTP transport for the PQStream `Listen` call (JSON request, JSONL response).
//! Exports: `HttpTransport`, `LISTEN_PATH`, `LISTEN_CONTENT_TYPE`.
//! Role: Opens one streaming POST per subscription and feeds decoded frames to a channel.
//! Invariants: `open` resolves on response headers, never on the first event.
//! Invariants: Establishment failures are `Connection` errors; later failures travel as frames.
//! Invariants: Exactly one terminal frame (status or error) is sent, or none on a clean end.
#![allow(clippy::result_large_err)]

use super::transport::{FRAME_BUFFER, FrameStream, OpenFuture, Transport};
use crate::core::error::{Error, ErrorKind};
use crate::core::event::ListenRequest;
use crate::core::frame::{Frame, LineDecoder, decode_line};
use crate::core::state::{Outcome, TerminalLatch};
use crate::core::status::Status;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub const LISTEN_PATH: &str = "/pqs.PQStream/Listen";
pub const LISTEN_CONTENT_TYPE: &str = "application/x-ndjson";

/// Largest rejection body read when looking for an explicit status.
const MAX_REJECTION_BODY: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    token: Option<String>,
}

#[derive(Deserialize)]
struct StatusEnvelope {
    status: Status,
}

impl HttpTransport {
    pub fn new(base_url: &Url, connect_timeout: Duration, token: Option<String>) -> Result<Self, Error> {
        let endpoint = listen_endpoint(base_url)?;
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    async fn open_stream(&self, request: &ListenRequest) -> Result<FrameStream, Error> {
        let body = serde_json::to_vec(request).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode listen request")
                .with_source(err)
        })?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, LISTEN_CONTENT_TYPE);
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let http_request = builder.body(Full::new(Bytes::from(body))).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to build listen request")
                .with_source(err)
        })?;

        let response = self.client.request(http_request).await.map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message(format!("failed to connect to {}", self.endpoint))
                .with_hint("Check that the PQStream service is running and reachable.")
                .with_source(err)
        })?;

        let status = response.status();
        tracing::debug!(endpoint = %self.endpoint, %status, "listen stream established");
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let reader = tokio::spawn(read_frames(status, response.into_body(), tx));
        Ok(FrameStream::with_reader(rx, reader))
    }
}

impl Transport for HttpTransport {
    fn open<'a>(&'a self, request: &'a ListenRequest) -> OpenFuture<'a> {
        Box::pin(self.open_stream(request))
    }
}

async fn read_frames(status: StatusCode, body: Incoming, tx: mpsc::Sender<Frame>) {
    if !status.is_success() {
        let outcome = read_rejection(status, body).await;
        if let Outcome::StatusReceived(status) = outcome {
            let _ = tx.send(Frame::Status(status)).await;
        }
        return;
    }
    if let Some(terminal) = pump_events(body, &tx).await {
        let _ = tx.send(terminal).await;
    }
}

/// Forwards event frames until the body ends; returns the terminal frame, if any.
async fn pump_events(mut body: Incoming, tx: &mpsc::Sender<Frame>) -> Option<Frame> {
    let mut decoder = LineDecoder::new();
    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                decoder.push(&data);
                loop {
                    let line = match decoder.next_line() {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(err) => return Some(Frame::Error(err)),
                    };
                    match decode_line(&line) {
                        Ok(Some(Frame::Event(event))) => {
                            if tx.send(Frame::Event(event)).await.is_err() {
                                // Consumer is gone; stop reading.
                                return None;
                            }
                        }
                        Ok(Some(terminal)) => return Some(terminal),
                        Ok(None) => {}
                        Err(err) => return Some(Frame::Error(err)),
                    }
                }
            }
            Some(Err(err)) => {
                tracing::debug!(%err, "listen body read failed");
                return Some(Frame::Error(
                    Error::new(ErrorKind::Transport)
                        .with_message("listen stream read failed")
                        .with_source(err),
                ));
            }
            None => {
                return match decoder.finish() {
                    Ok(frame) => frame,
                    Err(err) => Some(Frame::Error(err)),
                };
            }
        }
    }
}

/// Settles a non-success response into a status; a non-`Ok` body status refines the HTTP code.
async fn read_rejection(status: StatusCode, body: Incoming) -> Outcome {
    let mut latch = TerminalLatch::new();
    latch.observe_status(Status::from_http(status.as_u16()));
    match http_body_util::Limited::new(body, MAX_REJECTION_BODY)
        .collect()
        .await
    {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            // An `Ok` body status never overrides a rejection.
            match serde_json::from_slice::<StatusEnvelope>(&bytes) {
                Ok(envelope) if !envelope.status.is_ok() => latch.observe_status(envelope.status),
                _ => {}
            }
        }
        Err(err) => {
            latch.observe_error(
                Error::new(ErrorKind::Transport).with_message(format!(
                    "failed to read rejection body: {err}"
                )),
            );
        }
    }
    let outcome = latch.settle();
    match &outcome {
        Outcome::StatusReceived(status) => {
            tracing::debug!(%status, "listen call rejected")
        }
        other => tracing::debug!(?other, "listen call rejected without status"),
    }
    outcome
}

fn listen_endpoint(base_url: &Url) -> Result<Uri, Error> {
    let mut url = base_url.clone();
    url.set_path(LISTEN_PATH);
    url.as_str().parse::<Uri>().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid service address")
            .with_source(err)
    })
}
