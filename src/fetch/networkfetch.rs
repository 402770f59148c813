//! The network stages: request normalization, then one dispatch through
//! the transport adapter.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::fetch::controller::{Connection, FetchController};
use crate::fetch::mainfetch::FetchParams;
use crate::fetch::referrer::{append_origin_header, Referrer};
use crate::fetch::request::{
    CacheMode, CredentialsMode, RequestMode, RequestRecord, ResponseTainting,
};
use crate::fetch::response::{Response, ResponseRecord};
use crate::http::constants::CONDITIONAL_REQUEST_HEADERS;
use crate::http::messagebody::{ByteStream, MessageBody};
use crate::transport::adapter::{self, HeadOutcome};
use crate::transport::dispatcher::DispatchOptions;
use futures::future::{self, BoxFuture, FutureExt};
use futures::StreamExt;
use http::Method;
use std::sync::Arc;
use url::Position;

/// Normalizes the outgoing request and fetches it from the network. There
/// is no HTTP cache, so every request behaves as `no-store`.
pub(crate) fn http_network_or_cache_fetch(
    params: &mut FetchParams,
    is_authentication_fetch: bool,
    is_new_connection_fetch: bool,
) -> BoxFuture<'_, Response> {
    async move {
        // No cache to consult, so only-if-cached can never be satisfied.
        if params.request.cache == CacheMode::OnlyIfCached {
            return params.network_error(NetError::CacheMiss);
        }

        // The network request is always a copy: a 421 retry has to start
        // again from the caller's headers and a replayable body.
        let mut http_request = match params.request.clone_for_network() {
            Ok(copy) => copy,
            Err(e) => return params.network_error(e),
        };
        let http_request = &mut http_request;

        let include_credentials = http_request.credentials == CredentialsMode::Include
            || (http_request.credentials == CredentialsMode::SameOrigin
                && http_request.tainting == ResponseTainting::Basic);

        prepare_headers(http_request, &params.context.config.user_agent);

        http_request.cache = CacheMode::NoStore;

        let mut response = http_network_fetch(
            &params.controller,
            params.context.config.high_water_mark,
            http_request,
            is_new_connection_fetch,
        )
        .await;

        if !response.is_network_error() {
            response.url_list = http_request.url_list.clone();
            response.range_requested = http_request.headers.contains("range");
            response.request_includes_credentials = include_credentials;
        }

        if response.status == 407 {
            tracing::debug!(url = %params.request.current_url(), "proxy authentication requested");
            return params.network_error(NetError::ProxyAuthRequested);
        }

        let replayable = params.request.body.as_ref().map_or(true, |b| b.source().is_some());
        if response.status == 421 && !is_new_connection_fetch && replayable {
            if params.controller.is_cancelled() {
                let error = ResponseRecord::appropriate_network_error(&params.controller, None);
                return Response::from_record(error);
            }
            tracing::debug!(
                url = %params.request.current_url(),
                "misdirected request, retrying on a new connection"
            );
            params.controller.destroy_connection(true);
            drop(response);
            return http_network_or_cache_fetch(params, is_authentication_fetch, true).await;
        }

        Response::from_record(response)
    }
    .boxed()
}

/// Adds the headers the network request carries beyond what the caller set.
fn prepare_headers(request: &mut RequestRecord, user_agent: &str) {
    let content_length = match request.body.as_ref() {
        Some(body) => body.length().map(|n| n.to_string()),
        None if request.method == Method::POST || request.method == Method::PUT => {
            Some("0".to_string())
        }
        None => None,
    };
    if let Some(length) = content_length {
        request.headers.append("content-length", &length);
    }

    if let Referrer::Url(referrer) = &request.referrer {
        let referrer = referrer.to_string();
        request.headers.append("referer", &referrer);
    }
    append_origin_header(request);
    request.headers.set("sec-fetch-mode", request.mode.as_str());

    if !request.headers.contains("user-agent") {
        request.headers.append("user-agent", user_agent);
    }

    let conditional = CONDITIONAL_REQUEST_HEADERS.iter().any(|h| request.headers.contains(h));
    if request.cache == CacheMode::Default && conditional {
        request.cache = CacheMode::NoStore;
    }
    if request.cache == CacheMode::NoCache && !request.headers.contains("cache-control") {
        request.headers.append("cache-control", "max-age=0");
    }
    if matches!(request.cache, CacheMode::NoStore | CacheMode::Reload) {
        if !request.headers.contains("pragma") {
            request.headers.append("pragma", "no-cache");
        }
        if !request.headers.contains("cache-control") {
            request.headers.append("cache-control", "no-cache");
        }
    }

    if request.headers.contains("range") {
        request.headers.append("accept-encoding", "identity");
    }
    if !request.headers.contains("accept-encoding") {
        if request.current_url().scheme() == "https" {
            request.headers.append("accept-encoding", "br, gzip, deflate");
        } else {
            request.headers.append("accept-encoding", "gzip, deflate");
        }
    }
    request.headers.delete("host");
}

/// Dispatches `request` and waits for the response head. The body streams
/// in afterwards through the transport adapter.
async fn http_network_fetch(
    controller: &Arc<FetchController>,
    high_water_mark: usize,
    request: &mut RequestRecord,
    force_new_connection: bool,
) -> ResponseRecord {
    let connection = Connection::new();
    controller.set_connection(connection.clone());

    let body = match request.body.as_mut().map(MessageBody::take_stream).transpose() {
        Ok(body) => body.map(|stream| watch_request_body(controller.clone(), stream)),
        Err(e) => return ResponseRecord::network_error(e),
    };

    let url = request.current_url();
    let options = DispatchOptions {
        method: request.method.clone(),
        origin: url.origin().ascii_serialization(),
        path: url[Position::BeforePath..Position::AfterQuery].to_string(),
        headers: request.headers.raw_entries(),
        body,
        max_redirections: 0,
        upgrade: (request.mode == RequestMode::Websocket).then(|| "websocket".to_string()),
        reset: force_new_connection,
    };
    tracing::debug!(
        method = %options.method,
        origin = %options.origin,
        path = %options.path,
        "dispatching request"
    );

    let (handler, head, body_stream) = adapter::channel(
        controller.clone(),
        connection,
        request.method.clone(),
        request.redirect,
        high_water_mark,
    );
    controller.set_load_state(LoadState::SendingRequest);
    controller.dispatcher().dispatch(options, Box::new(handler));

    let outcome = head.await.unwrap_or(HeadOutcome::Failed(NetError::ConnectionClosed));
    let mut record = match outcome {
        HeadOutcome::Headers {
            status,
            status_text,
            headers,
        } => {
            let mut record = ResponseRecord::new(status, &status_text);
            record.headers = headers;
            record.body = Some(MessageBody::from_stream(ByteStream::new(body_stream), None));
            record
        }
        HeadOutcome::Upgrade {
            status,
            headers,
            socket,
        } => {
            let mut record = ResponseRecord::new(status, "Switching Protocols");
            record.headers = headers;
            record.socket = Some(socket);
            record
        }
        HeadOutcome::Failed(error) => {
            if error.is_abort() {
                controller.destroy_connection(true);
                return ResponseRecord::appropriate_network_error(controller, Some(error));
            }
            tracing::warn!(error = %error, "network request failed");
            return ResponseRecord::network_error(error);
        }
    };
    record.timing = controller.timing().clone();
    record
}

/// Stops sending once the fetch is cancelled, and cancels the fetch when
/// the request body fails.
fn watch_request_body(controller: Arc<FetchController>, body: ByteStream) -> ByteStream {
    let gate = controller.clone();
    let stream = body
        .take_while(move |_| future::ready(!gate.is_cancelled()))
        .inspect(move |item| {
            if let Err(error) = item {
                if controller.is_cancelled() {
                    return;
                }
                match error {
                    NetError::Aborted(reason) => controller.abort(reason.clone()),
                    other => controller.terminate(Some(other.clone())),
                }
            }
        });
    ByteStream::new(stream)
}
