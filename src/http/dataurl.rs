//! `data:` URL processing.

use crate::base::neterror::NetError;
use crate::http::headertable::isomorphic_decode;
use crate::http::mime::MimeType;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use url::{Position, Url};

const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: MimeType,
    pub body: Bytes,
}

impl DataUrl {
    pub fn process(url: &Url) -> Result<DataUrl, NetError> {
        if url.scheme() != "data" {
            return Err(NetError::DataUrlParse);
        }
        let input = &url[Position::BeforePath..Position::AfterQuery];
        let (mime_part, encoded) = input.split_once(',').ok_or(NetError::DataUrlParse)?;
        let mut mime_part = mime_part.trim_matches(|c: char| c.is_ascii_whitespace()).to_string();
        let mut body = percent_decode(encoded.as_bytes());

        if let Some(idx) = mime_part.rfind(';') {
            let tail = mime_part[idx + 1..].trim_matches(' ');
            if tail.eq_ignore_ascii_case("base64") {
                body = forgiving_base64_decode(&isomorphic_decode(&body))
                    .ok_or(NetError::DataUrlParse)?;
                mime_part.truncate(idx);
            }
        }

        if mime_part.starts_with(';') {
            mime_part.insert_str(0, "text/plain");
        }
        let mime_type = MimeType::parse(&mime_part).unwrap_or_else(default_mime);
        Ok(DataUrl {
            mime_type,
            body: Bytes::from(body),
        })
    }
}

fn default_mime() -> MimeType {
    MimeType {
        kind: "text".into(),
        subtype: "plain".into(),
        parameters: vec![("charset".into(), "US-ASCII".into())],
    }
}

fn forgiving_base64_decode(input: &str) -> Option<Vec<u8>> {
    let mut data: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if data.len() % 4 == 0 {
        if data.ends_with("==") {
            data.truncate(data.len() - 2);
        } else if data.ends_with('=') {
            data.truncate(data.len() - 1);
        }
    }
    if data.len() % 4 == 1 {
        return None;
    }
    FORGIVING.decode(data).ok()
}

pub(crate) fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            let hex = |b: u8| (b as char).to_digit(16);
            if let (Some(h), Some(l)) = (hex(input[i + 1]), hex(input[i + 2])) {
                out.push((h * 16 + l) as u8);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}
