//! Responses.
//!
//! The pipeline produces a [`ResponseRecord`]. What callers get is a
//! [`Response`]: the record plus the taint it was fetched under. Filtering is
//! computed on every access through [`ResponseView`], so later changes to the
//! record (timing, headers, the body being read) stay visible through the
//! filtered view.

use crate::base::abort::AbortReason;
use crate::base::neterror::NetError;
use crate::fetch::controller::FetchController;
use crate::fetch::request::{CredentialsMode, ResponseTainting};
use crate::fetch::timing::{SharedTiming, TimingInfo};
use crate::http::blob::Blob;
use crate::http::constants::{
    is_null_body_status, is_redirect_status, CORS_SAFELISTED_RESPONSE_HEADERS,
};
use crate::http::headertable::HeaderTable;
use crate::http::messagebody::{self, BodyInit, MessageBody};
use crate::http::mime::MimeType;
use crate::http::multipart::FormData;
use crate::transport::dispatcher::UpgradedIo;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    Default,
    Basic,
    Cors,
    Opaque,
    OpaqueRedirect,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Default => "default",
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
            ResponseType::Error => "error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
    #[default]
    None,
    Local,
    Validated,
}

/// The unfiltered response.
pub struct ResponseRecord {
    pub response_type: ResponseType,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderTable,
    pub body: Option<MessageBody>,
    pub url_list: Vec<Url>,
    pub aborted: bool,
    pub range_requested: bool,
    pub timing_allow_passed: bool,
    pub request_includes_credentials: bool,
    pub cors_exposed_header_names: Vec<String>,
    pub cache_state: CacheState,
    pub timing: SharedTiming,
    /// Why this is a network error, for `Error` responses.
    pub error: Option<NetError>,
    /// The connection handed over by a protocol upgrade.
    pub socket: Option<Box<dyn UpgradedIo>>,
}

impl fmt::Debug for ResponseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRecord")
            .field("type", &self.response_type)
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("url_list", &self.url_list.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("aborted", &self.aborted)
            .field("error", &self.error)
            .field("upgraded", &self.socket.is_some())
            .finish()
    }
}

impl Default for ResponseRecord {
    fn default() -> Self {
        Self {
            response_type: ResponseType::Default,
            status: 200,
            status_text: String::new(),
            headers: HeaderTable::new(),
            body: None,
            url_list: Vec::new(),
            aborted: false,
            range_requested: false,
            timing_allow_passed: false,
            request_includes_credentials: false,
            cors_exposed_header_names: Vec::new(),
            cache_state: CacheState::None,
            timing: SharedTiming::default(),
            error: None,
            socket: None,
        }
    }
}

impl ResponseRecord {
    pub fn new(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            ..Default::default()
        }
    }

    pub fn network_error(error: NetError) -> Self {
        Self {
            response_type: ResponseType::Error,
            status: 0,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn aborted_network_error(reason: AbortReason) -> Self {
        let mut response = Self::network_error(NetError::Aborted(reason));
        response.aborted = true;
        response
    }

    /// The network error matching how `controller` was cancelled: aborted
    /// with its reason, otherwise terminated.
    pub fn appropriate_network_error(
        controller: &FetchController,
        cause: Option<NetError>,
    ) -> Self {
        if controller.is_aborted() {
            Self::aborted_network_error(controller.abort_reason().unwrap_or(AbortReason::Aborted))
        } else {
            Self::network_error(NetError::terminated(cause))
        }
    }

    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    pub fn final_url(&self) -> Option<&Url> {
        self.url_list.last()
    }

    /// Copy with a teed body. Upgraded sockets are not cloned.
    pub fn try_clone(&mut self) -> Result<ResponseRecord, NetError> {
        let body = match self.body.as_mut() {
            Some(body) => Some(body.tee()?),
            None => None,
        };
        Ok(ResponseRecord {
            response_type: self.response_type,
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body,
            url_list: self.url_list.clone(),
            aborted: self.aborted,
            range_requested: self.range_requested,
            timing_allow_passed: self.timing_allow_passed,
            request_includes_credentials: self.request_includes_credentials,
            cors_exposed_header_names: self.cors_exposed_header_names.clone(),
            cache_state: self.cache_state,
            timing: self.timing.clone(),
            error: self.error.clone(),
            socket: None,
        })
    }
}

/// Read access to a response as the caller is allowed to see it.
pub trait ResponseView {
    fn internal(&self) -> &ResponseRecord;

    fn response_type(&self) -> ResponseType {
        self.internal().response_type
    }

    fn status(&self) -> u16 {
        self.internal().status
    }

    fn status_text(&self) -> &str {
        &self.internal().status_text
    }

    fn headers(&self) -> Cow<'_, HeaderTable> {
        Cow::Borrowed(&self.internal().headers)
    }

    fn url_list(&self) -> &[Url] {
        &self.internal().url_list
    }

    fn has_body(&self) -> bool {
        self.internal().body.is_some()
    }

    fn ok(&self) -> bool {
        (200..=299).contains(&self.status())
    }

    fn redirected(&self) -> bool {
        self.url_list().len() > 1
    }

    /// The final URL without its fragment, `""` when there is none.
    fn url(&self) -> String {
        self.url_list()
            .last()
            .map(|u| {
                let mut u = u.clone();
                u.set_fragment(None);
                u.to_string()
            })
            .unwrap_or_default()
    }

    fn timing(&self) -> TimingInfo {
        self.internal().timing.snapshot()
    }
}

impl ResponseView for ResponseRecord {
    fn internal(&self) -> &ResponseRecord {
        self
    }
}

/// A response filtered by the taint it was fetched under.
pub struct Response {
    internal: ResponseRecord,
    filter: Option<ResponseTainting>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("type", &self.response_type())
            .field("status", &self.status())
            .field("url", &self.url())
            .field("internal", &self.internal)
            .finish()
    }
}

impl ResponseView for Response {
    fn internal(&self) -> &ResponseRecord {
        &self.internal
    }

    fn response_type(&self) -> ResponseType {
        match self.filter {
            Some(ResponseTainting::Basic) => ResponseType::Basic,
            Some(ResponseTainting::Cors) => ResponseType::Cors,
            Some(ResponseTainting::Opaque) => ResponseType::Opaque,
            None => self.internal.response_type,
        }
    }

    fn status(&self) -> u16 {
        match self.filter {
            Some(ResponseTainting::Opaque) => 0,
            _ => self.internal.status,
        }
    }

    fn status_text(&self) -> &str {
        match self.filter {
            Some(ResponseTainting::Opaque) => "",
            _ => &self.internal.status_text,
        }
    }

    fn headers(&self) -> Cow<'_, HeaderTable> {
        match self.filter {
            None => Cow::Borrowed(&self.internal.headers),
            Some(ResponseTainting::Basic) => {
                let mut headers = self.internal.headers.clone();
                headers.retain(|name| name != "set-cookie" && name != "set-cookie2");
                Cow::Owned(headers)
            }
            Some(ResponseTainting::Cors) => {
                let exposed = &self.internal.cors_exposed_header_names;
                if exposed.iter().any(|e| e == "*") {
                    return Cow::Borrowed(&self.internal.headers);
                }
                let mut headers = self.internal.headers.clone();
                headers.retain(|name| {
                    CORS_SAFELISTED_RESPONSE_HEADERS.contains(&name)
                        || exposed.iter().any(|e| e.eq_ignore_ascii_case(name))
                });
                Cow::Owned(headers)
            }
            Some(ResponseTainting::Opaque) => Cow::Owned(HeaderTable::new()),
        }
    }

    fn url_list(&self) -> &[Url] {
        match self.filter {
            Some(ResponseTainting::Opaque) => &[],
            _ => &self.internal.url_list,
        }
    }

    fn has_body(&self) -> bool {
        self.filter != Some(ResponseTainting::Opaque) && self.internal.body.is_some()
    }
}

/// Options for [`Response::new`].
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: String::new(),
            headers: Vec::new(),
        }
    }
}

impl Response {
    /// An unfiltered response.
    pub fn from_record(internal: ResponseRecord) -> Self {
        Self {
            internal,
            filter: None,
        }
    }

    /// Wraps `internal` in the view for `tainting`. Network errors are never
    /// filtered.
    pub fn filtered(mut internal: ResponseRecord, tainting: ResponseTainting) -> Self {
        if internal.is_network_error() {
            return Self::from_record(internal);
        }
        if tainting == ResponseTainting::Cors && internal.request_includes_credentials {
            internal.cors_exposed_header_names.retain(|name| name != "*");
        }
        Self {
            internal,
            filter: Some(tainting),
        }
    }

    pub fn new(body: Option<BodyInit>, init: ResponseInit) -> Result<Response, NetError> {
        if !(200..=599).contains(&init.status) {
            return Err(NetError::InvalidStatus(init.status));
        }
        if !is_reason_phrase(&init.status_text) {
            return Err(NetError::InvalidStatusText(init.status_text));
        }
        let mut record = ResponseRecord::new(init.status, &init.status_text);
        for (name, value) in &init.headers {
            record.headers.try_append(name, value)?;
        }
        if let Some(body) = body {
            if is_null_body_status(init.status) {
                return Err(NetError::NullBodyStatus);
            }
            let (body, content_type) = messagebody::extract(body, false)?;
            if let Some(content_type) = content_type {
                if !record.headers.contains("content-type") {
                    record.headers.append("content-type", &content_type);
                }
            }
            record.body = Some(body);
        }
        Ok(Self::from_record(record))
    }

    /// A network error response.
    pub fn error() -> Response {
        Self::from_record(ResponseRecord::network_error(NetError::InvalidResponse))
    }

    pub fn redirect(url: &str, status: u16) -> Result<Response, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        if !is_redirect_status(status) {
            return Err(NetError::InvalidStatus(status));
        }
        let mut record = ResponseRecord::new(status, "");
        record.headers.append("location", url.as_str());
        Ok(Self::from_record(record))
    }

    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(data: &T, init: ResponseInit) -> Result<Response, NetError> {
        let text = serde_json::to_string(data).map_err(|e| NetError::JsonParse(e.to_string()))?;
        let mut response = Self::new(Some(Bytes::from(text).into()), init)?;
        if !response.internal.headers.contains("content-type") {
            response.internal.headers.append("content-type", "application/json");
        }
        Ok(response)
    }

    pub(crate) fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn internal_mut(&mut self) -> &mut ResponseRecord {
        &mut self.internal
    }

    pub fn into_internal(self) -> ResponseRecord {
        self.internal
    }

    /// Why the fetch failed, for network error responses.
    pub fn network_error(&self) -> Option<&NetError> {
        self.internal.error.as_ref()
    }

    /// Takes the upgraded connection of a `101` response.
    pub fn take_upgraded(&mut self) -> Option<Box<dyn UpgradedIo>> {
        self.internal.socket.take()
    }

    pub fn body_used(&self) -> bool {
        self.internal.body.as_ref().is_some_and(MessageBody::is_disturbed)
    }

    /// The body the caller may read.
    pub fn body_mut(&mut self) -> Option<&mut MessageBody> {
        match self.filter {
            Some(ResponseTainting::Opaque) => None,
            _ => self.internal.body.as_mut(),
        }
    }

    pub fn try_clone(&mut self) -> Result<Response, NetError> {
        if self.body_used() {
            return Err(NetError::BodyUnusable);
        }
        Ok(Response {
            internal: self.internal.try_clone()?,
            filter: self.filter,
        })
    }

    fn mime_type(&self) -> Option<MimeType> {
        MimeType::from_headers(&self.headers())
    }

    pub async fn bytes(&mut self) -> Result<Bytes, NetError> {
        messagebody::consume(self.body_mut()).await
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

/// Names listed in `Access-Control-Expose-Headers`.
pub fn exposed_header_names(headers: &HeaderTable, credentials: CredentialsMode) -> Vec<String> {
    let names = headers.get_list("access-control-expose-headers");
    if credentials == CredentialsMode::Include {
        names.into_iter().filter(|n| n != "*").collect()
    } else {
        names
    }
}

fn is_reason_phrase(text: &str) -> bool {
    text.chars().all(|c| c == '\t' || (' '..='\u{ff}').contains(&c) && c != '\u{7f}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(headers: &[(&str, &str)], body: &str) -> ResponseRecord {
        let mut r = ResponseRecord::new(200, "OK");
        for (n, v) in headers {
            r.headers.append(n, v);
        }
        r.body = Some(MessageBody::from_bytes(Bytes::from(body.to_string())));
        r.url_list = vec![Url::parse("https://a.com/x#frag").unwrap()];
        r
    }

    #[tokio::test]
    async fn test_opaque_hides_everything() {
        let internal = record_with(&[("content-type", "application/json")], r#"{"x":1}"#);
        let mut response = Response::filtered(internal, ResponseTainting::Opaque);
        assert_eq!(response.response_type(), ResponseType::Opaque);
        assert_eq!(response.status(), 0);
        assert_eq!(response.status_text(), "");
        assert!(response.headers().entries().is_empty());
        assert!(!response.has_body());
        assert!(response.url_list().is_empty());
        assert_eq!(response.url(), "");
        assert_eq!(response.text().await.unwrap(), "");
        assert_eq!(response.internal().status, 200);
    }

    #[test]
    fn test_basic_strips_set_cookie() {
        let internal = record_with(&[("Set-Cookie", "a=1"), ("X-Keep", "1")], "");
        let response = Response::filtered(internal, ResponseTainting::Basic);
        let headers = response.headers();
        assert!(headers.get("set-cookie").is_none());
        assert_eq!(headers.get("x-keep"), Some("1"));
        assert_eq!(response.internal().headers.raw_set_cookie_values(), ["a=1"]);
    }

    #[test]
    fn test_cors_exposes_safelisted_and_listed() {
        let mut internal = record_with(
            &[("Content-Type", "text/plain"), ("X-Secret", "s"), ("X-Public", "p")],
            "",
        );
        internal.cors_exposed_header_names = vec!["x-public".into()];
        let response = Response::filtered(internal, ResponseTainting::Cors);
        let headers = response.headers();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-public"), Some("p"));
        assert!(headers.get("x-secret").is_none());
    }

    #[test]
    fn test_filtered_view_is_live() {
        let internal = record_with(&[], "");
        let mut response = Response::filtered(internal, ResponseTainting::Basic);
        response.internal_mut().headers.append("x-late", "1");
        response.internal_mut().timing.update(|t| t.encoded_body_size = 42);
        assert_eq!(response.headers().get("x-late"), Some("1"));
        assert_eq!(response.timing().encoded_body_size, 42);
    }

    #[test]
    fn test_url_drops_fragment() {
        let response = Response::from_record(record_with(&[], ""));
        assert_eq!(response.url(), "https://a.com/x");
        assert!(!response.redirected());
    }

    #[test]
    fn test_network_error_not_filtered() {
        let record = ResponseRecord::network_error(NetError::InvalidUrl);
        let response = Response::filtered(record, ResponseTainting::Opaque);
        assert_eq!(response.response_type(), ResponseType::Error);
        assert_eq!(response.status(), 0);
        assert_eq!(response.network_error(), Some(&NetError::InvalidUrl));
    }

    #[test]
    fn test_constructor_validation() {
        let status = |status: u16| ResponseInit {
            status,
            ..Default::default()
        };
        let err = Response::new(None, status(99)).unwrap_err();
        assert_eq!(err, NetError::InvalidStatus(99));
        let err = Response::new(Some("x".into()), status(204)).unwrap_err();
        assert_eq!(err, NetError::NullBodyStatus);
        let init = ResponseInit {
            status_text: "bad\n".into(),
            ..Default::default()
        };
        let err = Response::new(None, init).unwrap_err();
        assert!(matches!(err, NetError::InvalidStatusText(_)));
    }

    #[test]
    fn test_redirect_sets_location() {
        let response = Response::redirect("https://a.com/next", 302).unwrap();
        assert_eq!(response.status(), 302);
        assert_eq!(response.headers().get("location"), Some("https://a.com/next"));
        let err = Response::redirect("https://a.com", 200).unwrap_err();
        assert_eq!(err, NetError::InvalidStatus(200));
    }

    #[cfg(feature = "json")]
    #[tokio::test]
    async fn test_json_roundtrip() {
        let value = serde_json::json!({"x": 1});
        let mut response = Response::json(&value, ResponseInit::default()).unwrap();
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["x"], 1);
    }

    #[tokio::test]
    async fn test_clone_then_consume_both() {
        let mut response = Response::new(Some("body".into()), ResponseInit::default()).unwrap();
        let mut clone = response.try_clone().unwrap();
        assert_eq!(clone.text().await.unwrap(), "body");
        assert_eq!(response.text().await.unwrap(), "body");
        assert!(response.try_clone().is_err());
    }

    #[test]
    fn test_exposed_header_names_wildcard() {
        let mut h = HeaderTable::new();
        h.append("Access-Control-Expose-Headers", "*, X-A");
        assert_eq!(exposed_header_names(&h, CredentialsMode::SameOrigin), vec!["*", "X-A"]);
        assert_eq!(exposed_header_names(&h, CredentialsMode::Include), vec!["X-A"]);
    }
}
