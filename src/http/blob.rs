//! In-memory binary objects and the `blob:` URL registry.

use crate::base::neterror::NetError;
use crate::http::messagebody::ByteStream;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use url::{Position, Url};

/// Immutable bytes plus a declared type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    content_type: String,
}

impl Blob {
    /// `content_type` is lower-cased; a type containing characters outside
    /// printable ASCII is dropped.
    pub fn new(data: impl Into<Bytes>, content_type: &str) -> Self {
        let content_type = if content_type.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            content_type.to_ascii_lowercase()
        } else {
            String::new()
        };
        Self {
            data: data.into(),
            content_type,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn stream(&self) -> ByteStream {
        ByteStream::from_bytes(self.data.clone())
    }

    /// Bytes in `[start, end)`, clamped to the blob.
    pub fn slice(&self, start: u64, end: u64, content_type: &str) -> Blob {
        let len = self.data.len();
        let start = (start as usize).min(len);
        let end = (end as usize).clamp(start, len);
        Blob::new(self.data.slice(start..end), content_type)
    }
}

/// A named blob, as carried by multipart form data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub blob: Blob,
    pub name: String,
    pub last_modified: u64,
}

impl File {
    pub fn new(data: impl Into<Bytes>, name: &str, content_type: &str) -> Self {
        let last_modified = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            blob: Blob::new(data, content_type),
            name: name.to_string(),
            last_modified,
        }
    }
}

/// Maps `blob:` URLs to the blobs they were created for.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    entries: DashMap<String, Blob>,
    counter: AtomicU64,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `blob` and returns its `blob:` URL. `origin` is the
    /// serialized origin embedded in the URL, `null` when absent.
    pub fn register(&self, blob: Blob, origin: Option<&Url>) -> Result<Url, NetError> {
        let origin = origin
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|| "null".to_string());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:016x}-{:08x}", nanos, count);

        let url = Url::parse(&format!("blob:{}/{}", origin, id)).map_err(|_| NetError::InvalidUrl)?;
        self.entries.insert(Self::key(&url), blob);
        Ok(url)
    }

    pub fn revoke(&self, url: &Url) {
        self.entries.remove(&Self::key(url));
    }

    /// Resolves a blob URL, ignoring any fragment.
    pub fn resolve(&self, url: &Url) -> Option<Blob> {
        self.entries.get(&Self::key(url)).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(url: &Url) -> String {
        url[..Position::AfterQuery].to_string()
    }
}
