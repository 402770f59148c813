//! `multipart/form-data` support.
//!
//! [`FormData`] is an ordered list of named text or file entries. It encodes
//! into a request body (RFC 7578) and is what `form_data()` yields when a
//! multipart or URL-encoded body is consumed.
//!
//! ```ignore
//! use fetchnet::http::multipart::FormData;
//! use fetchnet::http::blob::File;
//!
//! let form = FormData::new()
//!     .text("username", "user123")
//!     .file("upload", File::new(&b"file content"[..], "doc.txt", "text/plain"));
//! ```

use crate::base::neterror::NetError;
use crate::http::blob::File;
use crate::http::mime::MimeType;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormDataEntryValue {
    Text(String),
    File(File),
}

impl FormDataEntryValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormDataEntryValue::Text(s) => Some(s),
            FormDataEntryValue::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            FormDataEntryValue::File(f) => Some(f),
            FormDataEntryValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, FormDataEntryValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.append(name, value);
        self
    }

    /// Add a file field.
    pub fn file(mut self, name: &str, file: File) -> Self {
        self.append_file(name, file);
        self
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), FormDataEntryValue::Text(value.to_string())));
    }

    pub fn append_file(&mut self, name: &str, file: File) {
        self.entries.push((name.to_string(), FormDataEntryValue::File(file)));
    }

    pub fn get(&self, name: &str) -> Option<&FormDataEntryValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormDataEntryValue> {
        self.entries.iter().filter(|(n, _)| n == name).map(|(_, v)| v).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn entries(&self) -> &[(String, FormDataEntryValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks a boundary that occurs in no entry.
    pub fn generate_boundary(&self) -> String {
        loop {
            let candidate = random_boundary();
            let collides = self.entries.iter().any(|(name, value)| {
                let needle = candidate.as_bytes();
                contains(name.as_bytes(), needle)
                    || match value {
                        FormDataEntryValue::Text(s) => contains(s.as_bytes(), needle),
                        FormDataEntryValue::File(f) => {
                            contains(&f.blob.bytes(), needle) || contains(f.name.as_bytes(), needle)
                        }
                    }
            });
            if !collides {
                return candidate;
            }
        }
    }

    /// Encodes the form as an ordered list of chunks and their total length.
    pub fn encode(&self, boundary: &str) -> (Vec<Bytes>, u64) {
        let mut chunks = Vec::with_capacity(self.entries.len() * 2 + 1);
        for (name, value) in &self.entries {
            let mut head = format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
                boundary,
                escape(&normalize_newlines(name))
            );
            match value {
                FormDataEntryValue::Text(text) => {
                    head.push_str("\r\n\r\n");
                    head.push_str(&normalize_newlines(text));
                    head.push_str("\r\n");
                    chunks.push(Bytes::from(head));
                }
                FormDataEntryValue::File(file) => {
                    let content_type = match file.blob.content_type() {
                        "" => "application/octet-stream",
                        t => t,
                    };
                    head.push_str(&format!(
                        "; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        escape(&file.name),
                        content_type
                    ));
                    chunks.push(Bytes::from(head));
                    chunks.push(file.blob.bytes());
                    chunks.push(Bytes::from_static(b"\r\n"));
                }
            }
        }
        chunks.push(Bytes::from(format!("--{}--\r\n", boundary)));
        let length = chunks.iter().map(|c| c.len() as u64).sum();
        (chunks, length)
    }

    /// Parses a `multipart/form-data` payload. `mime` must carry the boundary.
    pub fn parse_multipart(input: &[u8], mime: &MimeType) -> Result<FormData, NetError> {
        let boundary = mime
            .param("boundary")
            .ok_or_else(|| NetError::MultipartParse("missing boundary".into()))?;
        let delimiter = format!("--{}", boundary).into_bytes();
        let mut form = FormData::new();

        let mut pos = 0;
        while input[pos..].starts_with(b"\r\n") {
            pos += 2;
        }

        loop {
            if !input[pos..].starts_with(&delimiter) {
                return Err(NetError::MultipartParse("expected boundary".into()));
            }
            pos += delimiter.len();
            if input[pos..].starts_with(b"--") {
                return Ok(form);
            }
            if !input[pos..].starts_with(b"\r\n") {
                return Err(NetError::MultipartParse("expected CRLF after boundary".into()));
            }
            pos += 2;

            let (headers, after_headers) = parse_part_headers(&input[pos..])?;
            pos += after_headers;

            let mut terminator = b"\r\n".to_vec();
            terminator.extend_from_slice(&delimiter);
            let end = find(&input[pos..], &terminator)
                .ok_or_else(|| NetError::MultipartParse("unterminated part".into()))?;
            let body = &input[pos..pos + end];
            pos += end + 2;

            let value = match headers.filename {
                Some(filename) => {
                    let content_type = headers.content_type.as_deref().unwrap_or("text/plain");
                    let file = File::new(Bytes::copy_from_slice(body), &filename, content_type);
                    FormDataEntryValue::File(file)
                }
                None => FormDataEntryValue::Text(String::from_utf8_lossy(body).into_owned()),
            };
            form.entries.push((headers.name, value));
        }
    }

    /// Parses an `application/x-www-form-urlencoded` payload.
    pub fn parse_urlencoded(input: &[u8]) -> FormData {
        let mut form = FormData::new();
        for (name, value) in url::form_urlencoded::parse(input) {
            form.append(&name, &value);
        }
        form
    }
}

#[derive(Debug, Default)]
struct PartHeaders {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

/// Returns the parsed headers and the number of bytes consumed, including
/// the blank line.
fn parse_part_headers(input: &[u8]) -> Result<(PartHeaders, usize), NetError> {
    let mut headers = PartHeaders::default();
    let mut seen_name = false;
    let mut pos = 0;
    loop {
        let line_end = find(&input[pos..], b"\r\n")
            .ok_or_else(|| NetError::MultipartParse("unterminated header".into()))?;
        let line = &input[pos..pos + line_end];
        pos += line_end + 2;
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| NetError::MultipartParse("malformed header".into()))?;
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                let mut params = value.split(';').map(str::trim);
                if !params.next().is_some_and(|d| d.eq_ignore_ascii_case("form-data")) {
                    return Err(NetError::MultipartParse("expected form-data disposition".into()));
                }
                for param in params {
                    let Some((key, raw)) = param.split_once('=') else {
                        continue;
                    };
                    let unquoted = unescape(raw.trim().trim_matches('"'));
                    match key.trim().to_ascii_lowercase().as_str() {
                        "name" => {
                            headers.name = unquoted;
                            seen_name = true;
                        }
                        "filename" => headers.filename = Some(unquoted),
                        _ => {}
                    }
                }
            }
            "content-type" => headers.content_type = Some(value.to_string()),
            _ => {}
        }
    }
    if !seen_name {
        return Err(NetError::MultipartParse("part without a name".into()));
    }
    Ok((headers, pos))
}

fn random_boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("----formdata-fetchnet-{:016x}{:08x}", nanos ^ u64::from(std::process::id()), count)
}

/// Escapes `"`, CR and LF in names the way browsers do.
fn escape(s: &str) -> String {
    s.replace('\n', "%0A").replace('\r', "%0D").replace('"', "%22")
}

fn unescape(s: &str) -> String {
    s.replace("%0A", "\n").replace("%0D", "\r").replace("%22", "\"")
}

/// Converts lone CR or LF to CRLF.
fn normalize_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            _ => out.push(c),
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
