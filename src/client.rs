//! The public entry points.
//!
//! [`fetch`] runs one request against the process-wide default context.
//! [`Client`] carries its own [`FetchContext`] and offers a builder API.
//!
//! # Example
//!
//! ```rust,ignore
//! use fetchnet::Client;
//!
//! let client = Client::builder().user_agent("my-agent/1.0").build();
//! let mut resp = client.get("https://example.com").send().await?;
//! println!("{}", resp.text().await?);
//! ```

use crate::base::abort::{AbortReason, AbortSignal, SubscriptionId};
use crate::base::neterror::NetError;
use crate::fetch::context::{FetchContext, FetchContextConfig};
use crate::fetch::mainfetch::{fetching, FetchParams};
use crate::fetch::request::{
    CacheMode, CredentialsMode, RedirectMode, Request, RequestInit, RequestInput, RequestMode,
};
use crate::fetch::response::{Response, ResponseView};
use crate::http::blob::BlobRegistry;
use crate::http::messagebody::{BodyInit, ByteStream};
use crate::transport::dispatcher::Dispatcher;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use url::Url;

/// Fetches `input` with the shared default context.
///
/// Resolves with any HTTP response, including non-2xx ones. Network errors
/// reject with [`NetError::FetchFailed`]; cancellation rejects with
/// [`NetError::Aborted`].
pub async fn fetch(
    input: impl Into<RequestInput>,
    init: RequestInit,
) -> Result<Response, NetError> {
    fetch_with_context(input, init, FetchContext::shared_default()).await
}

/// Fetches `input` with an explicit context.
pub async fn fetch_with_context(
    input: impl Into<RequestInput>,
    init: RequestInit,
    context: &FetchContext,
) -> Result<Response, NetError> {
    let request = Request::new(input, init)?;
    let (record, signal) = request.into_parts();
    if let Some(reason) = signal.reason() {
        return Err(NetError::Aborted(reason));
    }

    let mut params = FetchParams::new(record, context.clone());
    let controller = params.controller.clone();

    let mut response = tokio::select! {
        response = fetching(&mut params) => response,
        reason = signal.cancelled() => {
            tracing::debug!(reason = %reason, "fetch aborted before the response");
            controller.abort(reason.clone());
            return Err(NetError::Aborted(reason));
        }
    };

    if response.internal().aborted {
        let reason = controller.abort_reason().unwrap_or(AbortReason::Aborted);
        return Err(NetError::Aborted(reason));
    }
    if response.internal().is_network_error() {
        let cause = response.network_error().cloned().unwrap_or(NetError::InvalidResponse);
        return Err(NetError::fetch_failed(cause));
    }

    // The body may still be streaming; a later abort errors it. The
    // subscription lives as long as the body does.
    if let Some(body) = response.internal_mut().body.as_mut() {
        let weak: Weak<_> = Arc::downgrade(&controller);
        let id = signal.subscribe(move |reason| {
            if let Some(controller) = weak.upgrade() {
                controller.abort(reason.clone());
            }
        });
        let subscription = AbortSubscription {
            signal: signal.clone(),
            id: Some(id),
        };
        body.map_stream(|inner| {
            ByteStream::new(SubscribedStream {
                inner,
                subscription,
            })
        });
    }
    if let Some(reason) = signal.reason() {
        controller.abort(reason);
    }
    Ok(response)
}

/// A listener registered on the caller's signal, removed on release or drop.
struct AbortSubscription {
    signal: AbortSignal,
    id: Option<SubscriptionId>,
}

impl AbortSubscription {
    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.signal.unsubscribe(id);
        }
    }
}

impl Drop for AbortSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Response body that drops its abort subscription once it ends.
struct SubscribedStream {
    inner: ByteStream,
    subscription: AbortSubscription,
}

impl Stream for SubscribedStream {
    type Item = Result<Bytes, NetError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.poll_next_unpin(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.subscription.release();
        }
        poll
    }
}

/// HTTP client bound to one [`FetchContext`].
///
/// Use [`Client::builder()`] to configure and create a client.
#[derive(Clone, Debug)]
pub struct Client {
    context: FetchContext,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            context: FetchContext::shared_default().clone(),
        }
    }
}

impl Client {
    /// Create a new client sharing the default context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn context(&self) -> &FetchContext {
        &self.context
    }

    /// The blob URL registry `blob:` requests resolve against.
    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.context.blobs
    }

    /// Fetches `input` with this client's context.
    pub async fn fetch(
        &self,
        input: impl Into<RequestInput>,
        init: RequestInit,
    ) -> Result<Response, NetError> {
        fetch_with_context(input, init, &self.context).await
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("GET", url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("POST", url)
    }

    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("PUT", url)
    }

    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("DELETE", url)
    }

    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("HEAD", url)
    }

    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request("PATCH", url)
    }

    /// Start building a request with a custom method.
    pub fn request<U: AsRef<str>>(&self, method: &str, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            url: url.as_ref().to_string(),
            init: RequestInit {
                method: Some(method.to_string()),
                ..Default::default()
            },
            timeout: None,
            error: None,
        }
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: FetchContextConfig,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    blobs: Option<Arc<BlobRegistry>>,
}

impl ClientBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Origin requests are made from; also resolves `about:client` referrers.
    pub fn global_origin(mut self, origin: Url) -> Self {
        self.config.global_origin = Some(origin);
        self
    }

    /// Replace the default hyper transport.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Bytes a response body buffers before the transport is paused.
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.config.high_water_mark = bytes;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    pub fn blobs(mut self, blobs: Arc<BlobRegistry>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| FetchContext::shared_default().dispatcher.clone());
        let mut context = FetchContext::new(dispatcher).with_config(self.config);
        if let Some(blobs) = self.blobs {
            context = context.with_blobs(blobs);
        }
        Client { context }
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    url: String,
    init: RequestInit,
    timeout: Option<Duration>,
    error: Option<NetError>,
}

impl RequestBuilder {
    /// Append a header. Invalid names or values fail the request on send.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init.headers.get_or_insert_with(Vec::new).push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<BodyInit>) -> Self {
        self.init.body = Some(body.into());
        self
    }

    /// Set a JSON body with `content-type: application/json`.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_string(json) {
            Ok(text) => {
                self.init.body = Some(BodyInit::Text(text));
                self = self.header("content-type", "application/json");
            }
            Err(e) => self.error = Some(NetError::JsonParse(e.to_string())),
        }
        self
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.init.mode = Some(mode);
        self
    }

    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.init.credentials = Some(credentials);
        self
    }

    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.init.cache = Some(cache);
        self
    }

    pub fn redirect(mut self, redirect: RedirectMode) -> Self {
        self.init.redirect = Some(redirect);
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.init.referrer = Some(referrer.into());
        self
    }

    pub fn integrity(mut self, integrity: impl Into<String>) -> Self {
        self.init.integrity = Some(integrity.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.init.signal = Some(signal);
        self
    }

    /// Abort the request, body included, after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send the request.
    pub async fn send(mut self) -> Result<Response, NetError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Some(timeout) = self.timeout {
            let timer = AbortSignal::timeout(timeout);
            let signal = match self.init.signal.take() {
                Some(user) => AbortSignal::any(&[user, timer]),
                None => timer,
            };
            self.init.signal = Some(signal);
        }
        fetch_with_context(self.url, self.init, &self.client.context).await
    }
}
