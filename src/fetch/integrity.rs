//! Subresource integrity: `sha256-…`, `sha384-…`, `sha512-…` metadata.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256, Sha384, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Algorithm> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(Algorithm::Sha256),
            "sha384" => Some(Algorithm::Sha384),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    fn digest(&self, bytes: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => STANDARD_NO_PAD.encode(Sha256::digest(bytes)),
            Algorithm::Sha384 => STANDARD_NO_PAD.encode(Sha384::digest(bytes)),
            Algorithm::Sha512 => STANDARD_NO_PAD.encode(Sha512::digest(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Metadata {
    algorithm: Algorithm,
    digest: String,
}

/// Recognized entries of a metadata string. Unknown algorithms and
/// malformed tokens are skipped.
fn parse_metadata(metadata: &str) -> Vec<Metadata> {
    metadata
        .split_ascii_whitespace()
        .filter_map(|token| {
            let (algorithm, rest) = token.split_once('-')?;
            let algorithm = Algorithm::parse(algorithm)?;
            let digest = rest.split('?').next().unwrap_or_default().trim_end_matches('=');
            if digest.is_empty() {
                return None;
            }
            Some(Metadata {
                algorithm,
                digest: digest.to_string(),
            })
        })
        .collect()
}

/// True when `bytes` match `metadata`. Empty or unrecognized metadata always
/// matches. Only the strongest algorithm present is compared, and any digest
/// for it may match.
pub fn bytes_match(bytes: &[u8], metadata: &str) -> bool {
    let parsed = parse_metadata(metadata);
    let Some(strongest) = parsed.iter().map(|m| m.algorithm).max() else {
        return true;
    };
    let actual = strongest.digest(bytes);
    parsed
        .iter()
        .filter(|m| m.algorithm == strongest)
        .any(|m| digests_equal(&actual, &m.digest))
}

/// Compares a standard base64 digest with one that may use the URL-safe
/// alphabet.
fn digests_equal(actual: &str, expected: &str) -> bool {
    actual.len() == expected.len()
        && actual.bytes().zip(expected.bytes()).all(|(a, e)| {
            let e = match e {
                b'-' => b'+',
                b'_' => b'/',
                other => other,
            };
            a == e
        })
}
