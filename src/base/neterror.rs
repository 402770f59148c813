use crate::base::abort::AbortReason;
use thiserror::Error;

/// Every failure the fetch engine can report.
///
/// Codes follow `net_error_list.h` where a Chromium equivalent exists
/// (connection errors in the -100 range, protocol errors in the -300 range).
/// Fetch-specific conditions with no Chromium counterpart live at -10000 and
/// below so they never collide with the Blob range (-900..=-906).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Generic
    #[error("fetch failed")]
    FetchFailed {
        #[source]
        cause: Box<NetError>,
    },
    #[error("{0}")]
    Aborted(AbortReason),
    #[error("fetch terminated")]
    Terminated {
        #[source]
        cause: Option<Box<NetError>>,
    },

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name {domain} not resolved: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Proxy authentication required")]
    ProxyAuthRequested,

    // URL / HTTP protocol errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("URL scheme {0:?} is not supported")]
    UnknownUrlScheme(String),
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Redirect carries credentials")]
    UnsafeRedirect,
    #[error("Port {0} is blocked")]
    UnsafePort(u16),
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Requested range not satisfiable")]
    RequestRangeNotSatisfiable,
    #[error("Content decoding failed: {0}")]
    ContentDecodingFailed(String),

    // Fetch pipeline policy
    #[error("CORS check failed: {0}")]
    CorsFailure(String),
    #[error("request mode is same-origin but the URL is cross-origin")]
    SameOriginRequired,
    #[error("unexpected redirect")]
    UnexpectedRedirect,
    #[error("request body cannot be replayed")]
    RequestBodyNotReplayable,
    #[error("integrity check failed")]
    IntegrityMismatch,
    #[error("blob not found")]
    BlobNotFound,
    #[error("invalid blob request: {0}")]
    InvalidBlobRequest(&'static str),
    #[error("invalid data: URL")]
    DataUrlParse,
    #[error("only-if-cached request has no cached response")]
    CacheMiss,

    // Body usability
    #[error("Body is unusable: body has already been read")]
    BodyUnusable,
    #[error("Request with GET/HEAD method cannot have body")]
    BodyWithGetOrHead,
    #[error("duplex option is required when sending a body")]
    DuplexRequired,
    #[error("keepalive cannot be used with a stream body")]
    KeepaliveStreamBody,
    #[error("a stream body requires mode \"same-origin\" or \"cors\"")]
    StreamBodyMode,

    // Construction / validation
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
    #[error("invalid header value for {0:?}")]
    InvalidHeaderValue(String),
    #[error("{0:?} is not a valid HTTP method")]
    InvalidMethod(String),
    #[error("{0:?} HTTP method is unsupported")]
    ForbiddenMethod(String),
    #[error("{0:?} is unsupported in no-cors mode")]
    NoCorsMethod(String),
    #[error("only-if-cached mode requires same-origin")]
    OnlyIfCachedMode,
    #[error("request URL includes credentials")]
    UrlHasCredentials,
    #[error("status {0} is out of range")]
    InvalidStatus(u16),
    #[error("response with null body status cannot have body")]
    NullBodyStatus,
    #[error("mode navigate cannot be set on a constructed request")]
    NavigateMode,
    #[error("invalid status text {0:?}")]
    InvalidStatusText(String),

    // Consumption parse failures
    #[error("failed to parse JSON: {0}")]
    JsonParse(String),
    #[error("failed to parse multipart body: {0}")]
    MultipartParse(String),
    #[error("content type is not multipart/form-data or application/x-www-form-urlencoded")]
    FormDataContentType,
}

impl NetError {
    pub fn connection_failed_to(host: &str, port: u16, e: std::io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        }
    }

    pub fn dns_failed(domain: &str, e: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: e.to_string(),
        }
    }

    /// Wraps a network error the way the public entry point reports it.
    pub fn fetch_failed(cause: NetError) -> Self {
        match cause {
            NetError::FetchFailed { .. } | NetError::Aborted(_) => cause,
            other => NetError::FetchFailed {
                cause: Box::new(other),
            },
        }
    }

    pub fn terminated(cause: Option<NetError>) -> Self {
        NetError::Terminated {
            cause: cause.map(Box::new),
        }
    }

    /// The underlying cause of a wrapped error.
    pub fn cause(&self) -> Option<&NetError> {
        match self {
            NetError::FetchFailed { cause } => Some(cause),
            NetError::Terminated { cause } => cause.as_deref(),
            _ => None,
        }
    }

    /// True when the error was raised by a cancellation token firing.
    pub fn is_abort(&self) -> bool {
        matches!(self, NetError::Aborted(_))
    }

    /// True for errors that a fetch reports as a network error response,
    /// as opposed to construction-time or consumption-time failures.
    pub fn is_network_error(&self) -> bool {
        !matches!(
            self,
            NetError::BodyUnusable
                | NetError::BodyWithGetOrHead
                | NetError::DuplexRequired
                | NetError::KeepaliveStreamBody
                | NetError::StreamBodyMode
                | NetError::InvalidHeaderName(_)
                | NetError::InvalidHeaderValue(_)
                | NetError::InvalidMethod(_)
                | NetError::ForbiddenMethod(_)
                | NetError::NoCorsMethod(_)
                | NetError::OnlyIfCachedMode
                | NetError::UrlHasCredentials
                | NetError::InvalidStatus(_)
                | NetError::NullBodyStatus
                | NetError::NavigateMode
                | NetError::InvalidStatusText(_)
                | NetError::JsonParse(_)
                | NetError::MultipartParse(_)
                | NetError::FormDataContentType
        )
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::FetchFailed { .. } => -2,
            NetError::Aborted(_) => -3,
            NetError::Terminated { .. } => -10001,

            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::ConnectionTimedOut => -118,
            NetError::ProxyAuthRequested => -127,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme(_) => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::UnsafeRedirect => -311,
            NetError::UnsafePort(_) => -312,
            NetError::InvalidResponse => -320,
            NetError::RequestRangeNotSatisfiable => -328,
            NetError::ContentDecodingFailed(_) => -330,

            NetError::CorsFailure(_) => -10002,
            NetError::SameOriginRequired => -10003,
            NetError::UnexpectedRedirect => -10004,
            NetError::RequestBodyNotReplayable => -10005,
            NetError::IntegrityMismatch => -10006,
            NetError::BlobNotFound => -10007,
            NetError::InvalidBlobRequest(_) => -10008,
            NetError::DataUrlParse => -10009,
            NetError::CacheMiss => -10010,

            NetError::BodyUnusable => -10101,
            NetError::BodyWithGetOrHead => -10102,
            NetError::DuplexRequired => -10103,
            NetError::KeepaliveStreamBody => -10104,
            NetError::StreamBodyMode => -10105,

            NetError::InvalidHeaderName(_) => -10201,
            NetError::InvalidHeaderValue(_) => -10202,
            NetError::InvalidMethod(_) => -10203,
            NetError::ForbiddenMethod(_) => -10204,
            NetError::NoCorsMethod(_) => -10205,
            NetError::OnlyIfCachedMode => -10206,
            NetError::UrlHasCredentials => -10207,
            NetError::InvalidStatus(_) => -10208,
            NetError::NullBodyStatus => -10209,
            NetError::NavigateMode => -10210,
            NetError::InvalidStatusText(_) => -10211,

            NetError::JsonParse(_) => -10301,
            NetError::MultipartParse(_) => -10302,
            NetError::FormDataContentType => -10303,
        }
    }
}

impl From<hyper::Error> for NetError {
    fn from(e: hyper::Error) -> Self {
        if e.is_canceled() {
            NetError::ConnectionAborted
        } else if e.is_incomplete_message() {
            NetError::ConnectionClosed
        } else if e.is_parse() || e.is_parse_status() {
            NetError::InvalidResponse
        } else if e.is_timeout() {
            NetError::ConnectionTimedOut
        } else {
            NetError::ConnectionReset
        }
    }
}
