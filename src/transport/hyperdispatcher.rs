//! The default [`Dispatcher`]: one hyper HTTP/1.1 connection per request.
//!
//! Every dispatch spawns a task that connects, sends the request and feeds
//! the response into the handler. The abort callback handed to
//! `on_connect` cancels the task at any point. There is no connection pool,
//! so every request already runs on a fresh connection and `reset` needs no
//! extra handling.

use crate::base::neterror::NetError;
use crate::http::headertable::isomorphic_encode;
use crate::socket::connectjob::ConnectJob;
use crate::transport::dispatcher::{
    DispatchHandler, DispatchOptions, Dispatcher, RawHeaders, ResumeFn,
};
use bytes::Bytes;
use futures::StreamExt;
use http::header::{HeaderMap, HeaderValue, CONNECTION, HOST, UPGRADE};
use http::Request;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use url::{Position, Url};

type RequestBody = UnsyncBoxBody<Bytes, NetError>;

#[derive(Debug, Clone, Default)]
pub struct HyperDispatcher {
    _private: (),
}

impl HyperDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dispatcher for HyperDispatcher {
    fn dispatch(&self, options: DispatchOptions, mut handler: Box<dyn DispatchHandler>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("dispatch called outside a tokio runtime");
                handler.on_error(NetError::ConnectionFailed);
                return;
            }
        };

        let (abort_tx, mut abort_rx) = oneshot::channel::<NetError>();
        handler.on_connect(Box::new(move |error| {
            let _ = abort_tx.send(error);
        }));

        runtime.spawn(async move {
            let outcome = {
                let exchange = exchange(options, handler.as_mut());
                tokio::select! {
                    result = exchange => result,
                    Ok(error) = &mut abort_rx => {
                        tracing::debug!(error = %error, "request aborted");
                        Err(error)
                    }
                }
            };
            if let Err(error) = outcome {
                handler.on_error(error);
            }
        });
    }
}

/// Aborts the connection driver when the exchange is dropped.
struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn exchange(
    options: DispatchOptions,
    handler: &mut dyn DispatchHandler,
) -> Result<(), NetError> {
    let url = Url::parse(&format!("{}{}", options.origin, options.path))
        .map_err(|_| NetError::InvalidUrl)?;
    let socket = ConnectJob::connect(&url).await?;
    tracing::debug!(tls = socket.is_tls(), peer = ?socket.peer_addr().ok(), "connected");

    let (mut sender, conn) = http1::handshake::<_, RequestBody>(TokioIo::new(socket)).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "connection closed with error");
        }
    });
    let _guard = DriverGuard(driver);

    let request = build_request(&url, options)?;
    let mut response = sender.send_request(request).await?;
    handler.on_response_started();

    let status = response.status().as_u16();
    let raw = raw_headers(response.headers());
    if status == 101 {
        let upgraded = hyper::upgrade::on(&mut response).await?;
        handler.on_upgrade(status, raw, Box::new(TokioIo::new(upgraded)));
        return Ok(());
    }

    let status_text = response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned())
        .or_else(|| response.status().canonical_reason().map(str::to_string))
        .unwrap_or_default();

    let resume_signal = Arc::new(Notify::new());
    let signal = resume_signal.clone();
    let resume: ResumeFn = Arc::new(move || signal.notify_one());
    if !handler.on_headers(status, raw, resume, &status_text) {
        resume_signal.notified().await;
    }

    let mut body = response.into_body();
    let mut trailers = RawHeaders::new();
    while let Some(frame) = body.frame().await {
        match frame?.into_data() {
            Ok(data) => {
                if !handler.on_data(data) {
                    tracing::trace!("consumer full, pausing read");
                    resume_signal.notified().await;
                }
            }
            Err(frame) => {
                if let Ok(t) = frame.into_trailers() {
                    trailers = raw_headers(&t);
                }
            }
        }
    }
    handler.on_complete(trailers);
    Ok(())
}

fn build_request(url: &Url, options: DispatchOptions) -> Result<Request<RequestBody>, NetError> {
    let mut builder = Request::builder().method(options.method).uri(options.path.as_str());
    let has_host = options.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("host"));
    if !has_host {
        builder = builder.header(HOST, &url[Position::BeforeHost..Position::AfterPort]);
    }
    // Values are Latin-1 strings; the wire carries their byte values.
    for (name, value) in &options.headers {
        let value = HeaderValue::from_bytes(&isomorphic_encode(value))
            .map_err(|e| NetError::InvalidHeaderValue(e.to_string()))?;
        builder = builder.header(name.as_str(), value);
    }
    if let Some(protocol) = &options.upgrade {
        builder = builder.header(CONNECTION, "upgrade").header(UPGRADE, protocol.as_str());
    }

    let body: RequestBody = match options.body {
        Some(stream) => StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync(),
        None => Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
    };
    builder.body(body).map_err(|e| NetError::InvalidHeaderValue(e.to_string()))
}

fn raw_headers(headers: &HeaderMap) -> RawHeaders {
    headers
        .iter()
        .map(|(name, value)| {
            let name = Bytes::copy_from_slice(name.as_str().as_bytes());
            (name, Bytes::copy_from_slice(value.as_bytes()))
        })
        .collect()
}
