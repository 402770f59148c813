//! Single `bytes=` range parsing and `Content-Range` construction.

/// A parsed `bytes=start-end` value. Either side may be omitted, but not both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parses a simple range header value. Multiple ranges are rejected.
    /// With `allow_whitespace`, tabs and spaces are accepted around tokens.
    pub fn parse(value: &str, allow_whitespace: bool) -> Option<ByteRange> {
        let skip_ws = |s: &str| -> String {
            if allow_whitespace {
                s.trim_matches([' ', '\t']).to_string()
            } else {
                s.to_string()
            }
        };

        let rest = value.strip_prefix("bytes")?;
        let rest = skip_ws(rest);
        let rest = rest.strip_prefix('=')?;
        let rest = skip_ws(rest);
        let (start, end) = rest.split_once('-')?;
        let start = skip_ws(start);
        let end = skip_ws(end);

        let parse_digits = |s: &str| -> Result<Option<u64>, ()> {
            if s.is_empty() {
                Ok(None)
            } else if s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().map(Some).map_err(|_| ())
            } else {
                Err(())
            }
        };
        let start = parse_digits(&start).ok()?;
        let end = parse_digits(&end).ok()?;

        match (start, end) {
            (None, None) => None,
            (Some(s), Some(e)) if s > e => None,
            _ => Some(ByteRange { start, end }),
        }
    }

    /// Resolves the range against a resource of `full_length` bytes into an
    /// inclusive `(first, last)` pair, or `None` when unsatisfiable.
    pub fn resolve(&self, full_length: u64) -> Option<(u64, u64)> {
        match (self.start, self.end) {
            (None, Some(suffix)) => {
                if suffix == 0 || full_length == 0 {
                    return None;
                }
                let first = full_length.saturating_sub(suffix);
                Some((first, full_length - 1))
            }
            (Some(first), end) => {
                if first >= full_length {
                    return None;
                }
                let last = match end {
                    Some(e) if e < full_length => e,
                    _ => full_length - 1,
                };
                Some((first, last))
            }
            (None, None) => None,
        }
    }
}

/// `bytes first-last/full`
pub fn build_content_range(first: u64, last: u64, full_length: u64) -> String {
    format!("bytes {}-{}/{}", first, last, full_length)
}
