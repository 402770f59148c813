//! HTTP fetch and redirect handling.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::fetch::mainfetch::{main_fetch, FetchParams};
use crate::fetch::networkfetch::http_network_or_cache_fetch;
use crate::fetch::referrer::ReferrerPolicy;
use crate::fetch::request::{RedirectMode, RequestMode, RequestRecord, ResponseTainting};
use crate::fetch::response::{Response, ResponseRecord, ResponseType, ResponseView};
use crate::http::constants::{
    is_http_scheme, is_redirect_status, same_origin, CROSS_ORIGIN_STRIPPED_HEADERS,
};
use crate::http::messagebody::MessageBody;
use futures::future::{BoxFuture, FutureExt};
use http::Method;
use std::time::Instant;
use url::Url;

pub(crate) fn http_fetch(params: &mut FetchParams) -> BoxFuture<'_, Response> {
    async move {
        let mut response = http_network_or_cache_fetch(params, false, false).await;

        if params.request.tainting == ResponseTainting::Cors
            && !cors_check(&params.request, response.internal())
        {
            let error = NetError::CorsFailure("response failed the CORS check".into());
            return params.network_error(error);
        }
        if !timing_allow_check(&params.request, response.internal()) {
            params.request.timing_allow_failed = true;
        }
        let opaque = params.request.tainting == ResponseTainting::Opaque
            || response.response_type() == ResponseType::Opaque;
        if opaque && !cross_origin_resource_policy_check(&params.request, response.internal()) {
            let error = NetError::CorsFailure("blocked by cross-origin resource policy".into());
            return params.network_error(error);
        }

        if is_redirect_status(response.internal().status) {
            let redirect = params.request.redirect;
            if redirect != RedirectMode::Manual {
                // The redirect body is not read; let the transport drain it.
                params.controller.destroy_connection(false);
            }
            response = match redirect {
                RedirectMode::Error => params.network_error(NetError::UnexpectedRedirect),
                RedirectMode::Manual => response,
                RedirectMode::Follow => http_redirect_fetch(params, response).await,
            };
        }

        response.internal_mut().timing = params.controller.timing().clone();
        response
    }
    .boxed()
}

/// Always passes; reserved for a real CORS check.
fn cors_check(_request: &RequestRecord, _response: &ResponseRecord) -> bool {
    true
}

fn timing_allow_check(_request: &RequestRecord, _response: &ResponseRecord) -> bool {
    true
}

fn cross_origin_resource_policy_check(
    _request: &RequestRecord,
    _response: &ResponseRecord,
) -> bool {
    true
}

/// The redirect target named by `response`, with the request's fragment
/// carried over when the target has none. `Ok(None)` when there is no
/// `Location` to follow.
pub(crate) fn response_location_url(
    response: &ResponseRecord,
    base: &Url,
    request_fragment: Option<&str>,
) -> Result<Option<Url>, NetError> {
    if !is_redirect_status(response.status) {
        return Ok(None);
    }
    let Some(location) = response.headers.get("location") else {
        return Ok(None);
    };
    let location = normalize_latin1(location);
    let base = response.url_list.last().unwrap_or(base);
    let mut url = base.join(&location).map_err(|_| NetError::InvalidRedirect)?;
    if url.fragment().is_none() {
        url.set_fragment(request_fragment);
    }
    Ok(Some(url))
}

/// Header values are decoded byte-per-char. A `Location` that was really
/// UTF-8 is restored here.
fn normalize_latin1(value: &str) -> String {
    if value.is_ascii() || value.chars().any(|c| c as u32 > 0xFF) {
        return value.to_string();
    }
    let bytes: Vec<u8> = value.chars().map(|c| c as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| value.to_string())
}

/// A CORS request redirected away from its origin, or from its first URL
/// when it has none.
fn cors_redirect_leaves_origin(request: &RequestRecord, location: &Url) -> bool {
    if request.mode != RequestMode::Cors {
        return false;
    }
    match &request.origin {
        Some(origin) => location.origin() != *origin,
        None => !same_origin(request.url(), location),
    }
}

fn http_redirect_fetch(params: &mut FetchParams, response: Response) -> BoxFuture<'_, Response> {
    async move {
        let request = &mut params.request;
        let actual = response.internal();
        let current = request.current_url().clone();

        let location = match response_location_url(actual, &current, current.fragment()) {
            Ok(Some(location)) => location,
            Ok(None) => return response,
            Err(e) => return params.network_error(e),
        };
        if !is_http_scheme(&location) {
            return params.network_error(NetError::InvalidRedirect);
        }
        if request.redirect_count >= params.context.config.max_redirects {
            tracing::debug!(
                count = request.redirect_count,
                url = %location,
                "redirect limit reached"
            );
            return params.network_error(NetError::TooManyRedirects);
        }
        request.redirect_count += 1;

        let has_credentials = !location.username().is_empty() || location.password().is_some();
        if cors_redirect_leaves_origin(request, &location) && has_credentials {
            return params.network_error(NetError::UnsafeRedirect);
        }
        if request.tainting == ResponseTainting::Cors && has_credentials {
            return params.network_error(NetError::UnsafeRedirect);
        }

        let status = actual.status;
        if status != 303 && request.body.as_ref().is_some_and(|b| b.source().is_none()) {
            return params.network_error(NetError::RequestBodyNotReplayable);
        }

        if ((status == 301 || status == 302) && request.method == Method::POST)
            || (status == 303 && request.method != Method::GET && request.method != Method::HEAD)
        {
            tracing::debug!(status, from = %request.method, "rewriting redirected request to GET");
            request.method = Method::GET;
            request.body = None;
            request.headers.retain(|name| !name.starts_with("content-"));
        }

        if !same_origin(&current, &location) {
            for name in CROSS_ORIGIN_STRIPPED_HEADERS {
                request.headers.delete(name);
            }
        }

        if let Some(source) = request.body.as_ref().and_then(MessageBody::source) {
            request.body = Some(MessageBody::replay(source));
        }

        params.controller.timing().update(|t| {
            let now = Instant::now();
            t.redirect_end_time = Some(now);
            t.post_redirect_start_time = Some(now);
            if t.redirect_start_time.is_none() {
                t.redirect_start_time = t.start_time;
            }
        });

        if let Some(policy) = ReferrerPolicy::from_header(&actual.headers) {
            request.referrer_policy = Some(policy);
        }

        tracing::debug!(
            status,
            from = %current,
            to = %location,
            count = request.redirect_count,
            "following redirect"
        );
        request.url_list.push(location);
        drop(response);
        params.controller.set_load_state(LoadState::Redirecting);
        main_fetch(params, true).await
    }
    .boxed()
}
