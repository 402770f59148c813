//! Entry stage of the fetch pipeline.
//!
//! `fetching` prepares a request, `main_fetch` picks the response tainting,
//! hands off to the scheme or HTTP stage, and post-processes whatever comes
//! back: filtering, URL list, null bodies and integrity.

use crate::base::neterror::NetError;
use crate::fetch::context::FetchContext;
use crate::fetch::controller::FetchController;
use crate::fetch::httpfetch::http_fetch;
use crate::fetch::integrity::bytes_match;
use crate::fetch::referrer::{determine_referrer, Referrer, ReferrerPolicy};
use crate::fetch::request::{RedirectMode, RequestMode, RequestRecord, ResponseTainting};
use crate::fetch::response::{
    exposed_header_names, Response, ResponseRecord, ResponseType, ResponseView,
};
use crate::fetch::schemefetch::scheme_fetch;
use crate::fetch::timing::SharedTiming;
use crate::http::constants::{is_http_scheme, is_null_body_status, request_bad_port};
use crate::http::messagebody::MessageBody;
use futures::future::{BoxFuture, FutureExt};
use http::Method;
use std::sync::Arc;
use std::time::Instant;

/// Everything one fetch carries through the pipeline.
pub struct FetchParams {
    pub request: RequestRecord,
    pub controller: Arc<FetchController>,
    pub context: FetchContext,
}

impl FetchParams {
    /// Prepares `request` for fetching: starts timing, fills in the origin
    /// from the context and adds the default `Accept` headers.
    pub fn new(mut request: RequestRecord, context: FetchContext) -> Self {
        let dispatcher = request.dispatcher.clone().unwrap_or_else(|| context.dispatcher.clone());
        let controller = FetchController::new(dispatcher, SharedTiming::started());

        if request.origin.is_none() {
            request.origin = context.config.global_origin.as_ref().map(|u| u.origin());
        }
        if !request.headers.contains("accept") {
            request.headers.append("accept", "*/*");
        }
        if !request.headers.contains("accept-language") {
            request.headers.append("accept-language", "*");
        }

        Self {
            request,
            controller,
            context,
        }
    }

    pub(crate) fn network_error(&self, error: NetError) -> Response {
        let mut record = ResponseRecord::network_error(error);
        record.timing = self.controller.timing().clone();
        Response::from_record(record)
    }
}

/// Runs the whole pipeline and finalizes the response.
pub async fn fetching(params: &mut FetchParams) -> Response {
    tracing::debug!(
        method = %params.request.method,
        url = %params.request.current_url(),
        mode = %params.request.mode,
        "fetch started"
    );
    let response = main_fetch(params, false).await;
    fetch_finale(params, &response);
    response
}

fn fetch_finale(params: &mut FetchParams, response: &Response) {
    params.request.done = true;
    if response.internal().is_network_error() || !response.has_body() {
        params.controller.timing().update(|t| {
            t.end_time.get_or_insert_with(Instant::now);
        });
    }
}

/// Fetches the request's current URL. A `recursive` call (a redirect
/// continuation) returns the inner response without post-processing.
pub(crate) fn main_fetch(params: &mut FetchParams, recursive: bool) -> BoxFuture<'_, Response> {
    async move {
        let mut blocked = None;
        let current = params.request.current_url();
        if request_bad_port(current) {
            let port = current.port().unwrap_or_default();
            tracing::debug!(url = %current, port, "blocked port");
            blocked = Some(params.network_error(NetError::UnsafePort(port)));
        }

        let request = &mut params.request;
        if request.referrer_policy.is_none() {
            request.referrer_policy = Some(ReferrerPolicy::DEFAULT);
        }
        if request.referrer != Referrer::NoReferrer {
            let global_origin = params.context.config.global_origin.as_ref();
            request.referrer = match determine_referrer(request, global_origin) {
                Some(url) => Referrer::Url(url),
                None => Referrer::NoReferrer,
            };
        }

        let response = match blocked {
            Some(response) => response,
            None => route(params).await,
        };
        if recursive {
            return response;
        }
        finish_main_fetch(params, response).await
    }
    .boxed()
}

/// Picks the tainting and the stage that fetches the current URL.
async fn route(params: &mut FetchParams) -> Response {
    let request = &mut params.request;
    let current = request.current_url().clone();
    let same_origin = match &request.origin {
        Some(origin) => current.origin() == *origin,
        None => current.origin() == request.url().origin(),
    };

    if (same_origin && request.tainting == ResponseTainting::Basic)
        || current.scheme() == "data"
        || matches!(request.mode, RequestMode::Navigate | RequestMode::Websocket)
    {
        request.tainting = ResponseTainting::Basic;
        return scheme_fetch(params).await;
    }
    if request.mode == RequestMode::SameOrigin {
        return params.network_error(NetError::SameOriginRequired);
    }
    if request.mode == RequestMode::NoCors {
        if request.redirect != RedirectMode::Follow {
            let reason = "redirect mode must be \"follow\" for no-cors requests";
            return params.network_error(NetError::CorsFailure(reason.into()));
        }
        request.tainting = ResponseTainting::Opaque;
        return scheme_fetch(params).await;
    }
    if !is_http_scheme(&current) {
        return params.network_error(NetError::UnknownUrlScheme(current.scheme().to_string()));
    }
    request.tainting = ResponseTainting::Cors;
    http_fetch(params).await
}

async fn finish_main_fetch(params: &mut FetchParams, response: Response) -> Response {
    let response = match filter_response(params, response) {
        Ok(response) => response,
        Err(error) => return error,
    };
    if !params.request.integrity.is_empty() {
        return check_integrity(params, response).await;
    }
    response
}

/// Wraps the response for the request's tainting and drops bodies that
/// must not be exposed.
fn filter_response(params: &FetchParams, mut response: Response) -> Result<Response, Response> {
    let request = &params.request;

    if response.internal().status != 0 && !response.is_filtered() {
        if request.tainting == ResponseTainting::Cors {
            let names = exposed_header_names(&response.internal().headers, request.credentials);
            response.internal_mut().cors_exposed_header_names = names;
        }
        response = Response::filtered(response.into_internal(), request.tainting);
    }

    {
        let internal = response.internal_mut();
        if internal.url_list.is_empty() {
            internal.url_list = request.url_list.clone();
        }
        if !request.timing_allow_failed {
            internal.timing_allow_passed = true;
        }
    }

    if response.response_type() == ResponseType::Opaque
        && response.internal().status == 206
        && response.internal().range_requested
        && !request.headers.contains("range")
    {
        return Err(params.network_error(NetError::InvalidResponse));
    }

    let status = response.internal().status;
    let bodiless_method = request.method == Method::HEAD || request.method == Method::CONNECT;
    if status != 0 && (bodiless_method || is_null_body_status(status)) {
        params.controller.set_dump(true);
        response.internal_mut().body = None;
    }
    Ok(response)
}

/// Buffers the body and verifies it against the request's integrity
/// metadata.
async fn check_integrity(params: &mut FetchParams, mut response: Response) -> Response {
    if response.response_type() == ResponseType::Opaque || response.internal().body.is_none() {
        return params.network_error(NetError::IntegrityMismatch);
    }
    let bytes = match response.internal_mut().body.as_mut() {
        Some(body) => body.read_all().await,
        None => Err(NetError::IntegrityMismatch),
    };
    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(e) => return params.network_error(e),
    };
    if !bytes_match(&bytes, &params.request.integrity) {
        tracing::debug!(url = %params.request.current_url(), "integrity metadata does not match");
        return params.network_error(NetError::IntegrityMismatch);
    }
    response.internal_mut().body = Some(MessageBody::from_bytes(bytes));
    response
}
