//! Requests: the internal [`RequestRecord`] the pipeline threads through
//! every stage, and the validated public [`Request`] built around it.

use crate::base::abort::AbortSignal;
use crate::base::neterror::NetError;
use crate::fetch::referrer::{Referrer, ReferrerPolicy};
use crate::http::blob::Blob;
use crate::http::constants::{CORS_SAFELISTED_METHODS, FORBIDDEN_METHODS, NORMALIZED_METHODS};
use crate::http::headertable::{is_token_char, HeaderTable};
use crate::http::messagebody::{self, BodyInit, MessageBody};
use crate::http::mime::MimeType;
use crate::http::multipart::FormData;
use crate::transport::dispatcher::Dispatcher;
use bytes::Bytes;
use http::Method;
use std::fmt;
use std::sync::Arc;
use url::{Origin, Url};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, ()> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(()),
                }
            }
        }
    };
}

string_enum!(RequestMode {
    Navigate => "navigate",
    SameOrigin => "same-origin",
    NoCors => "no-cors",
    Cors => "cors",
    Websocket => "websocket",
});

string_enum!(CredentialsMode {
    Omit => "omit",
    SameOrigin => "same-origin",
    Include => "include",
});

string_enum!(CacheMode {
    Default => "default",
    NoStore => "no-store",
    Reload => "reload",
    NoCache => "no-cache",
    ForceCache => "force-cache",
    OnlyIfCached => "only-if-cached",
});

string_enum!(RedirectMode {
    Follow => "follow",
    Error => "error",
    Manual => "manual",
});

string_enum!(
    /// How much of a response the caller may observe.
    ResponseTainting {
        Basic => "basic",
        Cors => "cors",
        Opaque => "opaque",
    }
);

string_enum!(Duplex {
    Half => "half",
});

/// Upper bound on followed redirects.
pub const MAX_REDIRECTS: u32 = 20;

/// The request as the pipeline sees it.
pub struct RequestRecord {
    pub method: Method,
    /// Never empty. The last entry is the current URL.
    pub url_list: Vec<Url>,
    pub headers: HeaderTable,
    pub body: Option<MessageBody>,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub cache: CacheMode,
    pub redirect: RedirectMode,
    pub redirect_count: u32,
    pub tainting: ResponseTainting,
    pub integrity: String,
    pub referrer: Referrer,
    /// `None` is the empty policy, resolved to the default by the pipeline.
    pub referrer_policy: Option<ReferrerPolicy>,
    /// `None` until the environment supplies one.
    pub origin: Option<Origin>,
    pub keepalive: bool,
    pub duplex: Option<Duplex>,
    pub timing_allow_failed: bool,
    pub done: bool,
    /// Overrides the context dispatcher for this request.
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("method", &self.method)
            .field("url_list", &self.url_list.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("mode", &self.mode)
            .field("credentials", &self.credentials)
            .field("cache", &self.cache)
            .field("redirect", &self.redirect)
            .field("redirect_count", &self.redirect_count)
            .field("tainting", &self.tainting)
            .field("referrer", &self.referrer)
            .field("referrer_policy", &self.referrer_policy)
            .finish()
    }
}

impl RequestRecord {
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url_list: vec![url],
            headers: HeaderTable::new(),
            body: None,
            mode: RequestMode::NoCors,
            credentials: CredentialsMode::SameOrigin,
            cache: CacheMode::Default,
            redirect: RedirectMode::Follow,
            redirect_count: 0,
            tainting: ResponseTainting::Basic,
            integrity: String::new(),
            referrer: Referrer::Client,
            referrer_policy: None,
            origin: None,
            keepalive: false,
            duplex: None,
            timing_allow_failed: false,
            done: false,
            dispatcher: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url_list[0]
    }

    pub fn current_url(&self) -> &Url {
        self.url_list.last().unwrap_or(&self.url_list[0])
    }

    /// Field-by-field copy with no body.
    pub(crate) fn copy_without_body(&self) -> RequestRecord {
        RequestRecord {
            method: self.method.clone(),
            url_list: self.url_list.clone(),
            headers: self.headers.clone(),
            body: None,
            mode: self.mode,
            credentials: self.credentials,
            cache: self.cache,
            redirect: self.redirect,
            redirect_count: self.redirect_count,
            tainting: self.tainting,
            integrity: self.integrity.clone(),
            referrer: self.referrer.clone(),
            referrer_policy: self.referrer_policy,
            origin: self.origin.clone(),
            keepalive: self.keepalive,
            duplex: self.duplex,
            timing_allow_failed: self.timing_allow_failed,
            done: self.done,
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// The copy a network attempt mutates. The body's producer moves to the
    /// copy and this record keeps a disturbed body with the same source, so
    /// a retry or redirect replays rather than re-reads it. An already sent
    /// body is replayed from its source.
    pub(crate) fn clone_for_network(&mut self) -> Result<RequestRecord, NetError> {
        let mut copy = self.copy_without_body();
        copy.body = match self.body.as_mut() {
            Some(body) if body.is_unusable() => match body.source() {
                Some(source) => Some(MessageBody::replay(source)),
                None => return Err(NetError::RequestBodyNotReplayable),
            },
            Some(body) => Some(body.hand_off()?),
            None => None,
        };
        Ok(copy)
    }

    /// Deep copy, teeing the body.
    pub fn try_clone(&mut self) -> Result<RequestRecord, NetError> {
        let mut copy = self.copy_without_body();
        copy.body = match self.body.as_mut() {
            Some(body) => Some(body.tee()?),
            None => None,
        };
        Ok(copy)
    }
}

/// What a [`Request`] is constructed from.
pub enum RequestInput {
    Url(String),
    Parsed(Url),
    Request(Request),
}

impl From<&str> for RequestInput {
    fn from(s: &str) -> Self {
        RequestInput::Url(s.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(s: String) -> Self {
        RequestInput::Url(s)
    }
}

impl From<&String> for RequestInput {
    fn from(s: &String) -> Self {
        RequestInput::Url(s.clone())
    }
}

impl From<Url> for RequestInput {
    fn from(url: Url) -> Self {
        RequestInput::Parsed(url)
    }
}

impl From<Request> for RequestInput {
    fn from(request: Request) -> Self {
        RequestInput::Request(request)
    }
}

/// Options for [`Request::new`]. Unset fields keep the input's values.
#[derive(Default)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
    pub body: Option<BodyInit>,
    /// `""` for no referrer, `"about:client"` or a URL.
    pub referrer: Option<String>,
    pub referrer_policy: Option<ReferrerPolicy>,
    pub mode: Option<RequestMode>,
    pub credentials: Option<CredentialsMode>,
    pub cache: Option<CacheMode>,
    pub redirect: Option<RedirectMode>,
    pub integrity: Option<String>,
    pub keepalive: Option<bool>,
    pub signal: Option<AbortSignal>,
    pub duplex: Option<Duplex>,
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl RequestInit {
    fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.headers.is_none()
            && self.body.is_none()
            && self.referrer.is_none()
            && self.referrer_policy.is_none()
            && self.mode.is_none()
            && self.credentials.is_none()
            && self.cache.is_none()
            && self.redirect.is_none()
            && self.integrity.is_none()
            && self.keepalive.is_none()
            && self.signal.is_none()
            && self.duplex.is_none()
            && self.dispatcher.is_none()
    }
}

/// A validated request ready to be fetched.
pub struct Request {
    record: RequestRecord,
    signal: AbortSignal,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("record", &self.record)
            .field("signal", &self.signal)
            .finish()
    }
}

impl Request {
    pub fn new(input: impl Into<RequestInput>, init: RequestInit) -> Result<Request, NetError> {
        let init_is_empty = init.is_empty();
        let (mut record, mut signal, input_body, fallback_mode) = match input.into() {
            RequestInput::Url(s) => {
                let url = Url::parse(&s).map_err(|_| NetError::InvalidUrl)?;
                (fresh_record(url)?, None, None, Some(RequestMode::Cors))
            }
            RequestInput::Parsed(url) => (fresh_record(url)?, None, None, Some(RequestMode::Cors)),
            RequestInput::Request(mut prior) => {
                let body = prior.record.body.take();
                (prior.record.copy_without_body(), Some(prior.signal), body, None)
            }
        };

        if !init_is_empty {
            if record.mode == RequestMode::Navigate {
                record.mode = RequestMode::SameOrigin;
            }
            record.origin = None;
            record.referrer = Referrer::Client;
            record.referrer_policy = None;
            let current = record.current_url().clone();
            record.url_list = vec![current];
            record.redirect_count = 0;
        }

        if let Some(referrer) = init.referrer {
            record.referrer = if referrer.is_empty() {
                Referrer::NoReferrer
            } else {
                let parsed = Url::parse(&referrer).map_err(|_| NetError::InvalidUrl)?;
                if parsed.as_str() == "about:client" {
                    Referrer::Client
                } else {
                    Referrer::Url(parsed)
                }
            };
        }
        if let Some(policy) = init.referrer_policy {
            record.referrer_policy = Some(policy);
        }

        match init.mode.or(fallback_mode) {
            Some(RequestMode::Navigate) => {
                return Err(NetError::NavigateMode);
            }
            Some(mode) => record.mode = mode,
            None => {}
        }
        if let Some(credentials) = init.credentials {
            record.credentials = credentials;
        }
        if let Some(cache) = init.cache {
            record.cache = cache;
        }
        if record.cache == CacheMode::OnlyIfCached && record.mode != RequestMode::SameOrigin {
            return Err(NetError::OnlyIfCachedMode);
        }
        if let Some(redirect) = init.redirect {
            record.redirect = redirect;
        }
        if let Some(integrity) = init.integrity {
            record.integrity = integrity;
        }
        if let Some(keepalive) = init.keepalive {
            record.keepalive = keepalive;
        }
        if let Some(method) = init.method {
            record.method = normalize_method(&method)?;
        }
        if let Some(s) = init.signal {
            signal = Some(s);
        }
        if let Some(dispatcher) = init.dispatcher {
            record.dispatcher = Some(dispatcher);
        }
        let safelisted = CORS_SAFELISTED_METHODS.contains(&record.method.as_str());
        if record.mode == RequestMode::NoCors && !safelisted {
            return Err(NetError::NoCorsMethod(record.method.to_string()));
        }

        if let Some(headers) = init.headers {
            record.headers.clear();
            for (name, value) in &headers {
                record.headers.try_append(name, value)?;
            }
        }

        let is_get_or_head = record.method == Method::GET || record.method == Method::HEAD;
        if (init.body.is_some() || input_body.is_some()) && is_get_or_head {
            return Err(NetError::BodyWithGetOrHead);
        }

        let init_body = match init.body {
            Some(body) => {
                let (body, content_type) = messagebody::extract(body, record.keepalive)?;
                if let Some(content_type) = content_type {
                    if !record.headers.contains("content-type") {
                        record.headers.append("content-type", &content_type);
                    }
                }
                Some(body)
            }
            None => None,
        };

        let from_init = init_body.is_some();
        let body = match init_body {
            Some(body) => Some(body),
            None => match input_body {
                Some(body) if body.is_unusable() => return Err(NetError::BodyUnusable),
                other => other,
            },
        };

        if let Some(body) = &body {
            if body.source().is_none() {
                if from_init && init.duplex.is_none() {
                    return Err(NetError::DuplexRequired);
                }
                if !matches!(record.mode, RequestMode::SameOrigin | RequestMode::Cors) {
                    return Err(NetError::StreamBodyMode);
                }
            }
        }
        if init.duplex.is_some() {
            record.duplex = init.duplex;
        }
        record.body = body;

        Ok(Request {
            record,
            signal: signal.unwrap_or_default(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.record.method
    }

    pub fn url(&self) -> &Url {
        self.record.url()
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.record.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.record.headers
    }

    pub fn mode(&self) -> RequestMode {
        self.record.mode
    }

    pub fn credentials(&self) -> CredentialsMode {
        self.record.credentials
    }

    pub fn cache(&self) -> CacheMode {
        self.record.cache
    }

    pub fn redirect(&self) -> RedirectMode {
        self.record.redirect
    }

    pub fn integrity(&self) -> &str {
        &self.record.integrity
    }

    pub fn keepalive(&self) -> bool {
        self.record.keepalive
    }

    pub fn duplex(&self) -> Option<Duplex> {
        self.record.duplex
    }

    /// `""` for no referrer, `"about:client"` or the URL.
    pub fn referrer(&self) -> String {
        self.record.referrer.serialize()
    }

    pub fn referrer_policy(&self) -> Option<ReferrerPolicy> {
        self.record.referrer_policy
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn body_used(&self) -> bool {
        self.record.body.as_ref().is_some_and(MessageBody::is_disturbed)
    }

    pub fn record(&self) -> &RequestRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut RequestRecord {
        &mut self.record
    }

    pub fn into_parts(self) -> (RequestRecord, AbortSignal) {
        (self.record, self.signal)
    }

    /// Fails when the body has already been read.
    pub fn try_clone(&mut self) -> Result<Request, NetError> {
        if self.body_used() {
            return Err(NetError::BodyUnusable);
        }
        Ok(Request {
            record: self.record.try_clone()?,
            signal: self.signal.clone(),
        })
    }

    fn mime_type(&self) -> Option<MimeType> {
        MimeType::from_headers(&self.record.headers)
    }

    pub async fn bytes(&mut self) -> Result<Bytes, NetError> {
        messagebody::consume(self.record.body.as_mut()).await
    }

    pub async fn array_buffer(&mut self) -> Result<Vec<u8>, NetError> {
        Ok(self.bytes().await?.to_vec())
    }

    pub async fn text(&mut self) -> Result<String, NetError> {
        Ok(messagebody::decode_text(&self.bytes().await?))
    }

    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, NetError> {
        messagebody::decode_json(&self.bytes().await?)
    }

    pub async fn blob(&mut self) -> Result<Blob, NetError> {
        let mime = self.mime_type();
        Ok(messagebody::package_blob(self.bytes().await?, mime.as_ref()))
    }

    pub async fn form_data(&mut self) -> Result<FormData, NetError> {
        let mime = self.mime_type();
        let bytes = self.bytes().await?;
        messagebody::package_form_data(&bytes, mime.as_ref())
    }
}

fn fresh_record(url: Url) -> Result<RequestRecord, NetError> {
    if !url.username().is_empty() || url.password().is_some() {
        return Err(NetError::UrlHasCredentials);
    }
    Ok(RequestRecord::new(url))
}

/// Validates a method token, rejects forbidden methods and upper-cases the
/// standard ones.
pub fn normalize_method(method: &str) -> Result<Method, NetError> {
    if method.is_empty() || !method.bytes().all(is_token_char) {
        return Err(NetError::InvalidMethod(method.to_string()));
    }
    let upper = method.to_ascii_uppercase();
    if FORBIDDEN_METHODS.contains(&upper.as_str()) {
        return Err(NetError::ForbiddenMethod(method.to_string()));
    }
    let normalized = if NORMALIZED_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        method.to_string()
    };
    Method::from_bytes(normalized.as_bytes())
        .map_err(|_| NetError::InvalidMethod(method.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::messagebody::ByteStream;

    fn init() -> RequestInit {
        RequestInit::default()
    }

    #[test]
    fn test_defaults_from_string() {
        let r = Request::new("https://a.com/x", init()).unwrap();
        assert_eq!(r.method(), Method::GET);
        assert_eq!(r.mode(), RequestMode::Cors);
        assert_eq!(r.credentials(), CredentialsMode::SameOrigin);
        assert_eq!(r.redirect(), RedirectMode::Follow);
        assert_eq!(r.referrer(), "about:client");
        assert!(!r.signal().aborted());
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert_eq!(Request::new("not a url", init()).unwrap_err(), NetError::InvalidUrl);
        let err = Request::new("https://u:p@a.com/", init()).unwrap_err();
        assert_eq!(err, NetError::UrlHasCredentials);
    }

    #[test]
    fn test_method_normalization() {
        assert_eq!(normalize_method("post").unwrap(), Method::POST);
        assert_eq!(normalize_method("patch").unwrap().as_str(), "patch");
        assert!(matches!(normalize_method("connect"), Err(NetError::ForbiddenMethod(_))));
        assert!(matches!(normalize_method("bad method"), Err(NetError::InvalidMethod(_))));
    }

    #[test]
    fn test_get_with_body_rejected() {
        let err = Request::new(
            "https://a.com",
            RequestInit {
                body: Some("x".into()),
                ..init()
            },
        )
        .unwrap_err();
        assert_eq!(err, NetError::BodyWithGetOrHead);
    }

    #[test]
    fn test_body_sets_content_type() {
        let r = Request::new(
            "https://a.com",
            RequestInit {
                method: Some("POST".into()),
                body: Some("x".into()),
                ..init()
            },
        )
        .unwrap();
        assert_eq!(r.headers().get("content-type"), Some("text/plain;charset=UTF-8"));

        let r = Request::new(
            "https://a.com",
            RequestInit {
                method: Some("POST".into()),
                headers: Some(vec![("Content-Type".into(), "application/json".into())]),
                body: Some("{}".into()),
                ..init()
            },
        )
        .unwrap();
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
    }

    #[test]
    fn test_stream_body_requires_duplex() {
        let stream = || ByteStream::from_bytes(Bytes::from_static(b"abc"));
        let post = || Some("POST".to_string());
        let err = Request::new(
            "https://a.com",
            RequestInit {
                method: post(),
                body: Some(stream().into()),
                ..init()
            },
        )
        .unwrap_err();
        assert_eq!(err, NetError::DuplexRequired);

        let ok = Request::new(
            "https://a.com",
            RequestInit {
                method: post(),
                body: Some(stream().into()),
                duplex: Some(Duplex::Half),
                ..init()
            },
        );
        assert!(ok.is_ok());

        let err = Request::new(
            "https://a.com",
            RequestInit {
                method: post(),
                body: Some(stream().into()),
                duplex: Some(Duplex::Half),
                mode: Some(RequestMode::NoCors),
                ..init()
            },
        )
        .unwrap_err();
        assert_eq!(err, NetError::StreamBodyMode);
    }

    #[test]
    fn test_mode_constraints() {
        let err = Request::new(
            "https://a.com",
            RequestInit {
                mode: Some(RequestMode::NoCors),
                method: Some("PUT".into()),
                ..init()
            },
        )
        .unwrap_err();
        assert!(matches!(err, NetError::NoCorsMethod(_)));

        let err = Request::new(
            "https://a.com",
            RequestInit {
                cache: Some(CacheMode::OnlyIfCached),
                ..init()
            },
        )
        .unwrap_err();
        assert_eq!(err, NetError::OnlyIfCachedMode);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = Request::new(
            "https://a.com",
            RequestInit {
                headers: Some(vec![("bad name".into(), "v".into())]),
                ..init()
            },
        )
        .unwrap_err();
        assert!(matches!(err, NetError::InvalidHeaderName(_)));
    }

    #[test]
    fn test_referrer_init() {
        let with_referrer = |referrer: &str| RequestInit {
            referrer: Some(referrer.to_string()),
            ..init()
        };
        let r = Request::new("https://a.com", with_referrer("")).unwrap();
        assert_eq!(r.referrer(), "");
        let r = Request::new("https://a.com", with_referrer("https://b.com/p")).unwrap();
        assert_eq!(r.referrer(), "https://b.com/p");
    }

    #[tokio::test]
    async fn test_body_single_consumption() {
        let mut r = Request::new(
            "https://a.com",
            RequestInit {
                method: Some("POST".into()),
                body: Some("hello".into()),
                ..init()
            },
        )
        .unwrap();
        assert_eq!(r.text().await.unwrap(), "hello");
        assert!(r.body_used());
        assert_eq!(r.text().await.unwrap_err(), NetError::BodyUnusable);
        assert_eq!(r.try_clone().unwrap_err(), NetError::BodyUnusable);
    }

    #[tokio::test]
    async fn test_clone_reads_independently() {
        let mut r = Request::new(
            "https://a.com",
            RequestInit {
                method: Some("POST".into()),
                body: Some("hello".into()),
                ..init()
            },
        )
        .unwrap();
        let mut c = r.try_clone().unwrap();
        assert_eq!(c.text().await.unwrap(), "hello");
        assert_eq!(r.text().await.unwrap(), "hello");
    }

    #[test]
    fn test_from_prior_request() {
        let prior = Request::new(
            "https://a.com/x",
            RequestInit {
                method: Some("POST".into()),
                body: Some("b".into()),
                ..init()
            },
        )
        .unwrap();
        let r = Request::new(prior, init()).unwrap();
        assert_eq!(r.method(), Method::POST);
        assert_eq!(r.mode(), RequestMode::Cors);
        assert!(r.record().body.is_some());
    }

    #[test]
    fn test_clone_for_network_hands_off() {
        let (body, _) = messagebody::extract("abc".into(), false).unwrap();
        let mut record = RequestRecord::new(Url::parse("https://a.com").unwrap());
        record.body = Some(body);
        let copy = record.clone_for_network().unwrap();
        assert!(record.body.as_ref().unwrap().is_unusable());
        assert!(!copy.body.as_ref().unwrap().is_unusable());
        assert!(record.body.as_ref().unwrap().source().is_some());
    }
}
