//! Referrer policy: choosing the `Referer` value and downgrading `Origin`.

use crate::fetch::request::{RequestMode, RequestRecord, ResponseTainting};
use crate::http::headertable::HeaderTable;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use url::{Host, Url};

/// Longest referrer sent before falling back to the origin only.
const MAX_REFERRER_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferrerPolicy {
    NoReferrer,
    NoReferrerWhenDowngrade,
    SameOrigin,
    Origin,
    StrictOrigin,
    OriginWhenCrossOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

impl ReferrerPolicy {
    pub const DEFAULT: ReferrerPolicy = ReferrerPolicy::StrictOriginWhenCrossOrigin;

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferrerPolicy::NoReferrer => "no-referrer",
            ReferrerPolicy::NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
            ReferrerPolicy::SameOrigin => "same-origin",
            ReferrerPolicy::Origin => "origin",
            ReferrerPolicy::StrictOrigin => "strict-origin",
            ReferrerPolicy::OriginWhenCrossOrigin => "origin-when-cross-origin",
            ReferrerPolicy::StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
            ReferrerPolicy::UnsafeUrl => "unsafe-url",
        }
    }

    /// The policy named by a `Referrer-Policy` response header: the
    /// right-most recognized token wins, unknown tokens are skipped.
    pub fn from_header(headers: &HeaderTable) -> Option<ReferrerPolicy> {
        headers
            .get_list("referrer-policy")
            .iter()
            .rev()
            .find_map(|token| token.trim().parse().ok())
    }
}

impl fmt::Display for ReferrerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferrerPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "no-referrer" => ReferrerPolicy::NoReferrer,
            "no-referrer-when-downgrade" => ReferrerPolicy::NoReferrerWhenDowngrade,
            "same-origin" => ReferrerPolicy::SameOrigin,
            "origin" => ReferrerPolicy::Origin,
            "strict-origin" => ReferrerPolicy::StrictOrigin,
            "origin-when-cross-origin" => ReferrerPolicy::OriginWhenCrossOrigin,
            "strict-origin-when-cross-origin" => ReferrerPolicy::StrictOriginWhenCrossOrigin,
            "unsafe-url" => ReferrerPolicy::UnsafeUrl,
            _ => return Err(()),
        })
    }
}

/// A request's referrer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Referrer {
    NoReferrer,
    /// Resolved from the environment (the configured global origin).
    #[default]
    Client,
    Url(Url),
}

impl Referrer {
    /// `""`, `"about:client"` or the URL.
    pub fn serialize(&self) -> String {
        match self {
            Referrer::NoReferrer => String::new(),
            Referrer::Client => "about:client".to_string(),
            Referrer::Url(url) => url.to_string(),
        }
    }
}

/// Computes the `Referer` value for `request`, or `None` for no referrer.
pub fn determine_referrer(request: &RequestRecord, global_origin: Option<&Url>) -> Option<Url> {
    let policy = request.referrer_policy.unwrap_or(ReferrerPolicy::DEFAULT);
    let source = match &request.referrer {
        Referrer::NoReferrer => return None,
        Referrer::Client => global_origin?.clone(),
        Referrer::Url(url) => url.clone(),
    };

    let referrer_url = strip_url_for_referrer(&source, false)?;
    let origin_url = strip_url_for_referrer(&source, true)?;
    let referrer_url = if referrer_url.as_str().len() > MAX_REFERRER_LENGTH {
        origin_url.clone()
    } else {
        referrer_url
    };

    let current = request.current_url();
    let same = referrer_url.origin() == current.origin();
    let downgrade =
        is_potentially_trustworthy(&referrer_url) && !is_potentially_trustworthy(current);

    match policy {
        ReferrerPolicy::NoReferrer => None,
        ReferrerPolicy::Origin => Some(origin_url),
        ReferrerPolicy::UnsafeUrl => Some(referrer_url),
        ReferrerPolicy::StrictOrigin => {
            if downgrade {
                None
            } else {
                Some(origin_url)
            }
        }
        ReferrerPolicy::StrictOriginWhenCrossOrigin => {
            if same {
                Some(referrer_url)
            } else if downgrade {
                None
            } else {
                Some(origin_url)
            }
        }
        ReferrerPolicy::SameOrigin => same.then_some(referrer_url),
        ReferrerPolicy::OriginWhenCrossOrigin => {
            if same {
                Some(referrer_url)
            } else {
                Some(origin_url)
            }
        }
        ReferrerPolicy::NoReferrerWhenDowngrade => {
            if downgrade {
                None
            } else {
                Some(referrer_url)
            }
        }
    }
}

/// Removes credentials and fragment; `origin_only` also drops path and
/// query. Local schemes never produce a referrer.
pub fn strip_url_for_referrer(url: &Url, origin_only: bool) -> Option<Url> {
    if matches!(url.scheme(), "about" | "blob" | "data") {
        return None;
    }
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);
    if origin_only {
        url.set_path("");
        url.set_query(None);
    }
    Some(url)
}

/// Secure transport, or a loopback / local file destination.
pub fn is_potentially_trustworthy(url: &Url) -> bool {
    match url.scheme() {
        "about" => return url.path() == "blank" || url.path() == "srcdoc",
        "data" => return true,
        "https" | "wss" | "file" => return true,
        _ => {}
    }
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Adds the `Origin` header for CORS and for unsafe-method requests, using
/// `null` wherever the referrer policy would hide the origin.
pub fn append_origin_header(request: &mut RequestRecord) {
    let Some(origin) = request.origin.clone() else {
        return;
    };
    let mut serialized = origin.ascii_serialization();

    if request.tainting == ResponseTainting::Cors || request.mode == RequestMode::Websocket {
        request.headers.append("origin", &serialized);
        return;
    }
    if request.method == http::Method::GET || request.method == http::Method::HEAD {
        return;
    }

    let origin_is_https = origin.unicode_serialization().starts_with("https:");
    let current = request.current_url();
    match request.referrer_policy.unwrap_or(ReferrerPolicy::DEFAULT) {
        ReferrerPolicy::NoReferrer => serialized = "null".to_string(),
        ReferrerPolicy::NoReferrerWhenDowngrade
        | ReferrerPolicy::StrictOrigin
        | ReferrerPolicy::StrictOriginWhenCrossOrigin => {
            if origin_is_https && !is_potentially_trustworthy(current) {
                serialized = "null".to_string();
            }
        }
        ReferrerPolicy::SameOrigin => {
            if current.origin() != origin {
                serialized = "null".to_string();
            }
        }
        ReferrerPolicy::Origin
        | ReferrerPolicy::OriginWhenCrossOrigin
        | ReferrerPolicy::UnsafeUrl => {}
    }
    request.headers.append("origin", &serialized);
}
