//! Ordered, case-insensitive header container.
//!
//! One entry per lower-cased name, storing the first casing seen and the
//! combined value. Duplicate appends are joined with `", "` (`"; "` for
//! `cookie`). `set-cookie` values may contain commas, so they are kept as a
//! separate ordered list and never joined.

use crate::base::neterror::NetError;
use once_cell::sync::OnceCell;

const SET_COOKIE: &str = "set-cookie";

/// Below this size the sorted view uses insertion sort.
const INSERTION_SORT_THRESHOLD: usize = 32;

#[derive(Debug, Clone)]
struct HeaderEntry {
    lower: String,
    name: String,
    value: String,
}

#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    entries: Vec<HeaderEntry>,
    cookies: Vec<String>,
    sorted: OnceCell<Vec<(String, String)>>,
}

impl PartialEq for HeaderTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries() == other.entries()
    }
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from raw transport pairs. Bytes are mapped to chars
    /// one-to-one (isomorphic decode) so no value is ever rejected here.
    pub fn from_raw_pairs<N, V>(pairs: &[(N, V)]) -> Self
    where
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut table = HeaderTable::new();
        for (name, value) in pairs {
            table.append(&isomorphic_decode(name.as_ref()), &isomorphic_decode(value.as_ref()));
        }
        table
    }

    /// Appends without validation. Callers inside the crate only pass names
    /// and values that are already known to be well formed.
    pub fn append(&mut self, name: &str, value: &str) {
        self.invalidate();
        let lower = name.to_ascii_lowercase();
        let is_set_cookie = lower == SET_COOKIE;
        if is_set_cookie {
            self.cookies.push(value.to_string());
        }
        match self.find_mut(&lower) {
            Some(_) if is_set_cookie => {}
            Some(entry) => {
                let delimiter = if lower == "cookie" { "; " } else { ", " };
                entry.value.push_str(delimiter);
                entry.value.push_str(value);
            }
            None => self.entries.push(HeaderEntry {
                lower,
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Validating append used at the public boundary. The value is
    /// normalized (surrounding HTTP whitespace stripped) before checking.
    pub fn try_append(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let value = validate(name, value)?;
        self.append(name, value);
        Ok(())
    }

    /// Replaces every value stored under `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        self.invalidate();
        let lower = name.to_ascii_lowercase();
        if lower == SET_COOKIE {
            self.cookies = vec![value.to_string()];
        }
        match self.find_mut(&lower) {
            Some(entry) => entry.value = value.to_string(),
            None => self.entries.push(HeaderEntry {
                lower,
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn try_set(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let value = validate(name, value)?;
        self.set(name, value);
        Ok(())
    }

    /// The combined value for `name`. For `set-cookie` this is the first
    /// value only; use [`raw_set_cookie_values`](Self::raw_set_cookie_values)
    /// for the full list.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.lower.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.lower.eq_ignore_ascii_case(name))
    }

    pub fn delete(&mut self, name: &str) {
        let before = self.entries.len();
        self.entries.retain(|e| !e.lower.eq_ignore_ascii_case(name));
        if self.entries.len() != before {
            self.invalidate();
            if name.eq_ignore_ascii_case(SET_COOKIE) {
                self.cookies.clear();
            }
        }
    }

    /// Keeps only the headers whose name satisfies `pred` (given lower-cased).
    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut pred: F) {
        self.invalidate();
        self.entries.retain(|e| pred(&e.lower));
        if !self.contains(SET_COOKIE) {
            self.cookies.clear();
        }
    }

    pub fn clear(&mut self) {
        self.invalidate();
        self.entries.clear();
        self.cookies.clear();
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw_set_cookie_values(&self) -> &[String] {
        &self.cookies
    }

    /// `(lower-cased name, value)` pairs in insertion order, with
    /// `set-cookie` expanded to one pair per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().flat_map(move |e| {
            let expanded: Vec<(&str, &str)> = if e.lower == SET_COOKIE {
                self.cookies.iter().map(|c| (e.lower.as_str(), c.as_str())).collect()
            } else {
                vec![(e.lower.as_str(), e.value.as_str())]
            };
            expanded
        })
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
    }

    /// Pairs using the first casing seen for each name, for the wire.
    pub fn raw_entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.entries.len() + self.cookies.len());
        for e in &self.entries {
            if e.lower == SET_COOKIE {
                out.extend(self.cookies.iter().map(|c| (e.name.clone(), c.clone())));
            } else {
                out.push((e.name.clone(), e.value.clone()));
            }
        }
        out
    }

    /// Name-sorted `(lower-cased name, value)` pairs. Computed on first use
    /// and cached until the next mutation.
    pub fn sorted(&self) -> &[(String, String)] {
        self.sorted.get_or_init(|| self.build_sorted())
    }

    /// Splits a list-valued header on commas outside quoted strings,
    /// trimming each element.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(value) => split_list(value),
            None => Vec::new(),
        }
    }

    fn build_sorted(&self) -> Vec<(String, String)> {
        let mut names: Vec<&HeaderEntry> = self.entries.iter().collect();
        if names.len() <= INSERTION_SORT_THRESHOLD {
            for i in 1..names.len() {
                let mut j = i;
                while j > 0 && names[j - 1].lower.as_bytes() > names[j].lower.as_bytes() {
                    names.swap(j - 1, j);
                    j -= 1;
                }
            }
        } else {
            names.sort_by(|a, b| a.lower.as_bytes().cmp(b.lower.as_bytes()));
        }

        let mut out = Vec::with_capacity(names.len() + self.cookies.len());
        for e in names {
            if e.lower == SET_COOKIE {
                out.extend(self.cookies.iter().map(|c| (e.lower.clone(), c.clone())));
            } else {
                out.push((e.lower.clone(), e.value.clone()));
            }
        }
        out
    }

    fn find_mut(&mut self, lower: &str) -> Option<&mut HeaderEntry> {
        self.entries.iter_mut().find(|e| e.lower == lower)
    }

    fn invalidate(&mut self) {
        self.sorted = OnceCell::new();
    }
}

/// Maps each byte to the char with the same code point.
pub fn isomorphic_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Inverse of [`isomorphic_decode`]; chars above U+00FF are truncated.
pub fn isomorphic_encode(s: &str) -> Vec<u8> {
    s.chars().map(|c| c as u32 as u8).collect()
}

/// RFC 9110 `token`.
pub fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_char)
}

/// A value that needs no normalization: no NUL, CR or LF, no leading or
/// trailing tab/space, and nothing outside Latin-1.
pub fn is_valid_header_value(value: &str) -> bool {
    if value.starts_with([' ', '\t']) || value.ends_with([' ', '\t']) {
        return false;
    }
    value.chars().all(|c| (c as u32) <= 0xFF && !matches!(c, '\0' | '\r' | '\n'))
}

pub(crate) fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`'
        | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

/// Strips leading and trailing HTTP whitespace (tab, space, CR, LF).
pub fn normalize_value(value: &str) -> &str {
    value.trim_matches(['\t', ' ', '\r', '\n'])
}

fn validate<'a>(name: &str, value: &'a str) -> Result<&'a str, NetError> {
    if !is_valid_header_name(name) {
        return Err(NetError::InvalidHeaderName(name.to_string()));
    }
    let value = normalize_value(value);
    if !is_valid_header_value(value) {
        return Err(NetError::InvalidHeaderValue(name.to_string()));
    }
    Ok(value)
}

fn split_list(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in value.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    out.push(current.trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_append_combines() {
        let mut headers = HeaderTable::new();
        headers.append("x-foo", "1");
        headers.append("X-Foo", "2");
        assert_eq!(headers.get("x-foo"), Some("1, 2"));
        assert_eq!(headers.len(), 1);
        // First casing wins.
        assert_eq!(headers.raw_entries(), vec![("x-foo".to_string(), "1, 2".to_string())]);
    }

    #[test]
    fn test_cookie_uses_semicolon() {
        let mut headers = HeaderTable::new();
        headers.append("Cookie", "a=1");
        headers.append("cookie", "b=2");
        assert_eq!(headers.get("COOKIE"), Some("a=1; b=2"));
    }

    #[test]
    fn test_set_cookie_never_joined() {
        let mut headers = HeaderTable::new();
        headers.append("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT");
        headers.append("Set-Cookie", "b=2");
        assert_eq!(
            headers.raw_set_cookie_values(),
            ["a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", "b=2"]
        );
        assert_eq!(headers.get("set-cookie"), Some("a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(headers.iter().count(), 2);
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = HeaderTable::new();
        headers.append("Accept", "text/html");
        headers.append("accept", "*/*");
        headers.set("ACCEPT", "application/json");
        assert_eq!(headers.get("accept"), Some("application/json"));
        assert_eq!(headers.raw_entries()[0].0, "Accept");
    }

    #[test]
    fn test_delete_and_contains() {
        let mut headers = HeaderTable::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Host", "example.com");
        assert!(headers.contains("host"));
        headers.delete("HOST");
        headers.delete("set-cookie");
        assert!(!headers.contains("host"));
        assert!(headers.raw_set_cookie_values().is_empty());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_sorted_view_expands_set_cookie() {
        let mut headers = HeaderTable::new();
        headers.append("X-B", "2");
        headers.append("set-cookie", "s=1");
        headers.append("A", "1");
        headers.append("Set-Cookie", "s=2");
        let sorted: Vec<(&str, &str)> =
            headers.sorted().iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
        assert_eq!(
            sorted,
            vec![("a", "1"), ("set-cookie", "s=1"), ("set-cookie", "s=2"), ("x-b", "2")]
        );
    }

    #[test]
    fn test_sorted_view_invalidated_on_mutation() {
        let mut headers = HeaderTable::new();
        headers.append("b", "1");
        assert_eq!(headers.sorted().len(), 1);
        headers.append("a", "1");
        assert_eq!(headers.sorted()[0].0, "a");
        headers.clear();
        assert!(headers.sorted().is_empty());
    }

    #[test]
    fn test_sorted_view_large_table() {
        let mut headers = HeaderTable::new();
        for i in (0..100).rev() {
            headers.append(&format!("x-{:03}", i), "v");
        }
        let sorted = headers.sorted();
        assert_eq!(sorted.len(), 100);
        assert!(sorted.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_try_append_validates() {
        let mut headers = HeaderTable::new();
        assert!(matches!(
            headers.try_append("Invalid Header", "v"),
            Err(NetError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            headers.try_append("X-Valid", "bad\nvalue"),
            Err(NetError::InvalidHeaderValue(_))
        ));
        assert!(matches!(
            headers.try_append("X-Nul", "a\0b"),
            Err(NetError::InvalidHeaderValue(_))
        ));
        headers.try_append("X-Trim", "  padded\t").unwrap();
        assert_eq!(headers.get("x-trim"), Some("padded"));
    }

    #[test]
    fn test_value_predicate() {
        assert!(is_valid_header_value("text/html"));
        assert!(!is_valid_header_value(" leading"));
        assert!(!is_valid_header_value("trailing\t"));
        assert!(!is_valid_header_value("a\rb"));
    }

    #[test]
    fn test_from_raw_pairs_is_isomorphic() {
        let pairs: Vec<(&[u8], &[u8])> =
            vec![(b"Content-Type", b"text/plain"), (b"X-Latin", &[0xE9])];
        let headers = HeaderTable::from_raw_pairs(&pairs);
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-latin"), Some("\u{e9}"));
        assert_eq!(isomorphic_encode(headers.get("x-latin").unwrap()), vec![0xE9]);
    }

    #[test]
    fn test_get_list() {
        let mut headers = HeaderTable::new();
        headers.append("Content-Encoding", "gzip, BR");
        headers.append("content-encoding", "\"x,y\"");
        assert_eq!(headers.get_list("content-encoding"), vec!["gzip", "BR", "\"x,y\""]);
    }
}
