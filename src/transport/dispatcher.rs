//! The contract between the fetch pipeline and a connection layer.
//!
//! A [`Dispatcher`] accepts a request description and reports progress by
//! calling back into a [`DispatchHandler`]. Redirects are never followed by
//! the dispatcher (`max_redirections` is always 0); the pipeline does that.

use crate::base::neterror::NetError;
use crate::http::messagebody::ByteStream;
use bytes::Bytes;
use http::Method;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Aborts the in-flight request. Called at most once.
pub type AbortFn = Box<dyn FnOnce(NetError) + Send>;

/// Asks a paused dispatcher to continue delivering body data.
pub type ResumeFn = Arc<dyn Fn() + Send + Sync>;

/// Raw header pairs as they came off the wire.
pub type RawHeaders = Vec<(Bytes, Bytes)>;

/// A connection taken over by a protocol upgrade.
pub trait UpgradedIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpgradedIo for T {}

pub struct DispatchOptions {
    pub method: Method,
    /// Serialized origin, e.g. `https://example.com:8443`.
    pub origin: String,
    /// Path plus query.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<ByteStream>,
    pub max_redirections: u32,
    /// Protocol to upgrade to (e.g. `websocket`).
    pub upgrade: Option<String>,
    /// Do not reuse a pooled connection.
    pub reset: bool,
}

impl fmt::Debug for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOptions")
            .field("method", &self.method)
            .field("origin", &self.origin)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("upgrade", &self.upgrade)
            .field("reset", &self.reset)
            .finish()
    }
}

impl DispatchOptions {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Callbacks a dispatcher invokes, in order: `on_connect`, then
/// `on_response_started`, `on_headers`, any number of `on_data`, and finally
/// exactly one of `on_complete` / `on_error`. `on_upgrade` replaces the body
/// phase for upgraded connections.
pub trait DispatchHandler: Send {
    fn on_connect(&mut self, abort: AbortFn);

    fn on_response_started(&mut self) {}

    /// Informational (1xx) heads may arrive before the final one.
    /// Returns false to ask the dispatcher to pause reading.
    fn on_headers(
        &mut self,
        status: u16,
        headers: RawHeaders,
        resume: ResumeFn,
        status_text: &str,
    ) -> bool;

    /// Returns whether the consumer still wants more data. On false the
    /// dispatcher stops reading until the resume callback is invoked.
    fn on_data(&mut self, chunk: Bytes) -> bool;

    fn on_complete(&mut self, trailers: RawHeaders);

    fn on_error(&mut self, error: NetError);

    fn on_upgrade(&mut self, status: u16, headers: RawHeaders, socket: Box<dyn UpgradedIo>);
}

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, options: DispatchOptions, handler: Box<dyn DispatchHandler>);
}
