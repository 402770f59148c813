//! MIME type parsing and serialization (WHATWG mimesniff subset).

use crate::http::headertable::{is_token_char, HeaderTable};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    pub kind: String,
    pub subtype: String,
    /// Parameters in order, names lower-cased, first occurrence wins.
    pub parameters: Vec<(String, String)>,
}

impl MimeType {
    pub fn parse(input: &str) -> Option<MimeType> {
        let input = input.trim_matches(is_http_whitespace);
        let (kind, rest) = input.split_once('/')?;
        if kind.is_empty() || !kind.bytes().all(is_token_char) {
            return None;
        }
        let (subtype, params) = match rest.find(';') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let subtype = subtype.trim_end_matches(is_http_whitespace);
        if subtype.is_empty() || !subtype.bytes().all(is_token_char) {
            return None;
        }

        let mut mime = MimeType {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters: Vec::new(),
        };
        mime.parse_parameters(params);
        Some(mime)
    }

    fn parse_parameters(&mut self, mut rest: &str) {
        while let Some(stripped) = rest.strip_prefix(';') {
            rest = stripped.trim_start_matches(is_http_whitespace);
            let name_end = rest.find([';', '=']).unwrap_or(rest.len());
            let name = rest[..name_end].to_ascii_lowercase();
            rest = &rest[name_end..];
            if rest.starts_with(';') || rest.is_empty() {
                continue;
            }
            rest = &rest[1..];

            let value;
            if let Some(quoted) = rest.strip_prefix('"') {
                let (v, remaining) = collect_quoted(quoted);
                value = v;
                rest = match remaining.find(';') {
                    Some(i) => &remaining[i..],
                    None => "",
                };
            } else {
                let end = rest.find(';').unwrap_or(rest.len());
                value = rest[..end].trim_end_matches(is_http_whitespace).to_string();
                rest = &rest[end..];
                if value.is_empty() {
                    continue;
                }
            }

            let valid_name = !name.is_empty() && name.bytes().all(is_token_char);
            let valid_value = value
                .chars()
                .all(|c| c == '\t' || (' '..='\u{ff}').contains(&c) && c != '\u{7f}');
            if valid_name && valid_value && self.param(&name).is_none() {
                self.parameters.push((name, value));
            }
        }
    }

    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Extracts the MIME type from a `Content-Type` header the way fetch does:
    /// the last parseable value wins, and a charset from an earlier value of
    /// the same essence is carried over.
    pub fn from_headers(headers: &HeaderTable) -> Option<MimeType> {
        let mut result: Option<MimeType> = None;
        let mut charset: Option<String> = None;
        let mut essence: Option<String> = None;
        for value in headers.get_list("content-type") {
            let Some(mut mime) = MimeType::parse(&value) else {
                continue;
            };
            if mime.essence() == "*/*" {
                continue;
            }
            let new_essence = mime.essence();
            match mime.param("charset") {
                Some(c) => charset = Some(c.to_string()),
                None => {
                    if essence.as_deref() == Some(new_essence.as_str()) {
                        if let Some(c) = &charset {
                            mime.parameters.push(("charset".into(), c.clone()));
                        }
                    } else {
                        charset = None;
                    }
                }
            }
            essence = Some(new_essence);
            result = Some(mime);
        }
        result
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (name, value) in &self.parameters {
            write!(f, ";{}=", name)?;
            if !value.is_empty() && value.bytes().all(is_token_char) {
                f.write_str(value)?;
            } else {
                f.write_str("\"")?;
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"")?;
            }
        }
        Ok(())
    }
}

fn is_http_whitespace(c: char) -> bool {
    matches!(c, '\t' | ' ' | '\r' | '\n')
}

fn collect_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return (value, &input[i + 1..]),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => {
                    value.push('\\');
                    return (value, "");
                }
            },
            _ => value.push(c),
        }
    }
    (value, "")
}
