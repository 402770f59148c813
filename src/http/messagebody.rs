//! Message bodies.
//!
//! A [`MessageBody`] is a lazy byte producer plus the input it was extracted
//! from (the *recorded source*) and its length when known. Bodies are
//! single-consumption: once the producer is read or handed off the body is
//! disturbed and every consumption API fails with
//! [`NetError::BodyUnusable`].

use crate::base::neterror::NetError;
use crate::http::blob::Blob;
use crate::http::mime::MimeType;
use crate::http::multipart::FormData;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use futures::task::{waker, ArcWake};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

pub type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetError>> + Send>>;

/// A lazy sequence of byte chunks that remembers whether it has been read.
pub struct ByteStream {
    inner: BoxByteStream,
    disturbed: Arc<AtomicBool>,
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").field("disturbed", &self.is_disturbed()).finish()
    }
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            disturbed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A stream yielding `bytes` as a single chunk (nothing when empty).
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::from_chunks(vec![bytes])
    }

    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let chunks: Vec<_> = chunks.into_iter().filter(|c| !c.is_empty()).map(Ok).collect();
        Self::new(stream::iter(chunks))
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    pub fn is_disturbed(&self) -> bool {
        self.disturbed.load(Ordering::Acquire)
    }

    /// Reads the remaining chunks into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, NetError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Splits into two streams yielding the same chunks. Each branch buffers
    /// what the other has not read yet.
    pub fn tee(self) -> (ByteStream, ByteStream) {
        let wakers = Arc::new(TeeWaker::default());
        let shared = Arc::new(Mutex::new(TeeShared {
            source: self,
            queues: [VecDeque::new(), VecDeque::new()],
            finished: false,
            dropped: [false, false],
        }));
        let branch = |index| {
            ByteStream::new(TeeBranch {
                shared: shared.clone(),
                wakers: wakers.clone(),
                index,
            })
        };
        (branch(0), branch(1))
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, NetError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.disturbed.store(true, Ordering::Release);
        self.inner.as_mut().poll_next(cx)
    }
}

struct TeeShared {
    source: ByteStream,
    queues: [VecDeque<Result<Bytes, NetError>>; 2],
    finished: bool,
    dropped: [bool; 2],
}

/// Wakes every branch that is waiting on the shared source.
#[derive(Default)]
struct TeeWaker {
    wakers: Mutex<[Option<Waker>; 2]>,
}

impl TeeWaker {
    fn register(&self, index: usize, waker: &Waker) {
        let mut wakers = self.wakers.lock().unwrap_or_else(|e| e.into_inner());
        wakers[index] = Some(waker.clone());
    }

    fn wake_branch(&self, index: usize) {
        let waker = self.wakers.lock().unwrap_or_else(|e| e.into_inner())[index].take();
        if let Some(w) = waker {
            w.wake();
        }
    }
}

impl ArcWake for TeeWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_branch(0);
        arc_self.wake_branch(1);
    }
}

struct TeeBranch {
    shared: Arc<Mutex<TeeShared>>,
    wakers: Arc<TeeWaker>,
    index: usize,
}

impl TeeBranch {
    fn lock(&self) -> MutexGuard<'_, TeeShared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Stream for TeeBranch {
    type Item = Result<Bytes, NetError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let other = 1 - this.index;
        let mut shared = this.lock();
        if let Some(item) = shared.queues[this.index].pop_front() {
            return Poll::Ready(Some(item));
        }
        if shared.finished {
            return Poll::Ready(None);
        }

        this.wakers.register(this.index, cx.waker());
        let tee_waker = waker(this.wakers.clone());
        let mut tee_cx = Context::from_waker(&tee_waker);
        match Pin::new(&mut shared.source).poll_next(&mut tee_cx) {
            Poll::Ready(Some(item)) => {
                if !shared.dropped[other] {
                    shared.queues[other].push_back(item.clone());
                    drop(shared);
                    this.wakers.wake_branch(other);
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                shared.finished = true;
                drop(shared);
                this.wakers.wake_branch(other);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let mut shared = self.lock();
        shared.dropped[self.index] = true;
        shared.queues[self.index].clear();
    }
}

/// The input a body was extracted from, retained so it can be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource {
    Text(String),
    Bytes(Bytes),
    UrlEncoded(Vec<(String, String)>),
    /// Keeps the boundary so a replay matches the `Content-Type` already sent.
    FormData { form: FormData, boundary: String },
    Blob(Blob),
}

/// Everything a body can be built from, decided once at construction.
pub enum BodyInit {
    Text(String),
    Bytes(Bytes),
    UrlEncoded(Vec<(String, String)>),
    FormData(FormData),
    Blob(Blob),
    Stream(ByteStream),
}

impl fmt::Debug for BodyInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyInit::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            BodyInit::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            BodyInit::UrlEncoded(p) => f.debug_tuple("UrlEncoded").field(&p.len()).finish(),
            BodyInit::FormData(form) => f.debug_tuple("FormData").field(&form.len()).finish(),
            BodyInit::Blob(b) => f.debug_tuple("Blob").field(&b.size()).finish(),
            BodyInit::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

impl From<&str> for BodyInit {
    fn from(s: &str) -> Self {
        BodyInit::Text(s.to_string())
    }
}

impl From<String> for BodyInit {
    fn from(s: String) -> Self {
        BodyInit::Text(s)
    }
}

impl From<Bytes> for BodyInit {
    fn from(b: Bytes) -> Self {
        BodyInit::Bytes(b)
    }
}

impl From<Vec<u8>> for BodyInit {
    fn from(v: Vec<u8>) -> Self {
        BodyInit::Bytes(Bytes::from(v))
    }
}

impl From<&'static [u8]> for BodyInit {
    fn from(v: &'static [u8]) -> Self {
        BodyInit::Bytes(Bytes::from_static(v))
    }
}

impl From<FormData> for BodyInit {
    fn from(form: FormData) -> Self {
        BodyInit::FormData(form)
    }
}

impl From<Blob> for BodyInit {
    fn from(blob: Blob) -> Self {
        BodyInit::Blob(blob)
    }
}

impl From<ByteStream> for BodyInit {
    fn from(stream: ByteStream) -> Self {
        BodyInit::Stream(stream)
    }
}

impl From<BodySource> for BodyInit {
    fn from(source: BodySource) -> Self {
        match source {
            BodySource::Text(s) => BodyInit::Text(s),
            BodySource::Bytes(b) => BodyInit::Bytes(b),
            BodySource::UrlEncoded(p) => BodyInit::UrlEncoded(p),
            BodySource::FormData { form, .. } => BodyInit::FormData(form),
            BodySource::Blob(b) => BodyInit::Blob(b),
        }
    }
}

pub struct MessageBody {
    stream: Option<ByteStream>,
    source: Option<BodySource>,
    length: Option<u64>,
    disturbed: Arc<AtomicBool>,
}

impl fmt::Debug for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBody")
            .field("source", &self.source.as_ref().map(|_| "recorded"))
            .field("length", &self.length)
            .field("disturbed", &self.is_disturbed())
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl MessageBody {
    pub fn from_stream(stream: ByteStream, length: Option<u64>) -> Self {
        let disturbed = stream.disturbed.clone();
        Self {
            stream: Some(stream),
            source: None,
            length,
            disturbed,
        }
    }

    /// A fully buffered body with `bytes` as its recorded source.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let length = Some(bytes.len() as u64);
        let mut body = Self::from_stream(ByteStream::from_bytes(bytes.clone()), length);
        body.source = Some(BodySource::Bytes(bytes));
        body
    }

    /// Re-extracts a body from a recorded source, e.g. after a redirect
    /// consumed the first producer.
    pub fn replay(source: &BodySource) -> Self {
        match source {
            BodySource::FormData { form, boundary } => {
                extract_form_data(form.clone(), boundary.clone())
            }
            other => match extract(other.clone().into(), false) {
                Ok((body, _)) => body,
                // Only stream inputs can fail, and a source is never a stream.
                Err(_) => MessageBody::from_bytes(Bytes::new()),
            },
        }
    }

    pub fn source(&self) -> Option<&BodySource> {
        self.source.as_ref()
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// True once reading has started.
    pub fn is_disturbed(&self) -> bool {
        self.disturbed.load(Ordering::Acquire)
    }

    /// True when the producer has been handed to another owner.
    pub fn is_locked(&self) -> bool {
        self.stream.is_none()
    }

    pub fn is_unusable(&self) -> bool {
        self.is_disturbed() || self.is_locked()
    }

    /// Hands the producer to a new owner. The body keeps its source and
    /// length but is disturbed from now on.
    pub fn take_stream(&mut self) -> Result<ByteStream, NetError> {
        if self.is_unusable() {
            return Err(NetError::BodyUnusable);
        }
        self.disturbed.store(true, Ordering::Release);
        self.stream.take().ok_or(NetError::BodyUnusable)
    }

    /// Moves the producer into a new body carrying the same source and
    /// length. This body stays behind disturbed and can only be replayed.
    pub fn hand_off(&mut self) -> Result<MessageBody, NetError> {
        let stream = self.take_stream()?;
        let mut moved = MessageBody::from_stream(stream, self.length);
        moved.source = self.source.clone();
        Ok(moved)
    }

    /// Wraps the producer in place, keeping source, length and the
    /// disturbed flag. A locked body is left alone.
    pub fn map_stream<F>(&mut self, f: F)
    where
        F: FnOnce(ByteStream) -> ByteStream,
    {
        if let Some(stream) = self.stream.take() {
            let disturbed = stream.disturbed.clone();
            let mut wrapped = f(stream);
            wrapped.disturbed = disturbed;
            self.stream = Some(wrapped);
        }
    }

    /// Duplicates the body. This body keeps one branch, the returned body
    /// gets the other; both share no mutable state.
    pub fn tee(&mut self) -> Result<MessageBody, NetError> {
        if self.is_unusable() {
            return Err(NetError::BodyUnusable);
        }
        let stream = self.stream.take().ok_or(NetError::BodyUnusable)?;
        let (mine, theirs) = stream.tee();
        self.disturbed = mine.disturbed.clone();
        self.stream = Some(mine);

        let mut clone = MessageBody::from_stream(theirs, self.length);
        clone.source = self.source.clone();
        Ok(clone)
    }

    /// Reads the whole body.
    pub async fn read_all(&mut self) -> Result<Bytes, NetError> {
        self.take_stream()?.collect_bytes().await
    }
}

/// Builds a body from `init`, returning the content type it implies.
pub fn extract(init: BodyInit, keepalive: bool) -> Result<(MessageBody, Option<String>), NetError> {
    let (body, content_type) = match init {
        BodyInit::Text(text) => {
            let mut body = MessageBody::from_bytes(Bytes::from(text.clone()));
            body.source = Some(BodySource::Text(text));
            (body, Some("text/plain;charset=UTF-8".to_string()))
        }
        BodyInit::Bytes(bytes) => (MessageBody::from_bytes(bytes), None),
        BodyInit::UrlEncoded(pairs) => {
            let serialized = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            let mut body = MessageBody::from_bytes(Bytes::from(serialized));
            body.source = Some(BodySource::UrlEncoded(pairs));
            (body, Some("application/x-www-form-urlencoded;charset=UTF-8".to_string()))
        }
        BodyInit::FormData(form) => {
            let boundary = form.generate_boundary();
            let content_type = format!("multipart/form-data; boundary={}", boundary);
            (extract_form_data(form, boundary), Some(content_type))
        }
        BodyInit::Blob(blob) => {
            let content_type = match blob.content_type() {
                "" => None,
                t => Some(t.to_string()),
            };
            let mut body = MessageBody::from_stream(blob.stream(), Some(blob.size()));
            body.source = Some(BodySource::Blob(blob));
            (body, content_type)
        }
        BodyInit::Stream(stream) => {
            if keepalive {
                return Err(NetError::KeepaliveStreamBody);
            }
            if stream.is_disturbed() {
                return Err(NetError::BodyUnusable);
            }
            (MessageBody::from_stream(stream, None), None)
        }
    };
    Ok((body, content_type))
}

fn extract_form_data(form: FormData, boundary: String) -> MessageBody {
    let (chunks, length) = form.encode(&boundary);
    let mut body = MessageBody::from_stream(ByteStream::from_chunks(chunks), Some(length));
    body.source = Some(BodySource::FormData { form, boundary });
    body
}

/// Reads a body for one of the consumption methods. A missing body reads as
/// empty.
pub(crate) async fn consume(body: Option<&mut MessageBody>) -> Result<Bytes, NetError> {
    match body {
        Some(body) => body.read_all().await,
        None => Ok(Bytes::new()),
    }
}

/// UTF-8 decode with BOM stripping; invalid sequences become U+FFFD.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(feature = "json")]
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, NetError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    serde_json::from_slice(bytes).map_err(|e| NetError::JsonParse(e.to_string()))
}

pub(crate) fn package_blob(bytes: Bytes, mime: Option<&MimeType>) -> Blob {
    let content_type = mime.map(MimeType::to_string).unwrap_or_default();
    Blob::new(bytes, &content_type)
}

/// Dispatches on the body's MIME type.
pub(crate) fn package_form_data(
    bytes: &[u8],
    mime: Option<&MimeType>,
) -> Result<FormData, NetError> {
    match mime {
        Some(m) if m.essence() == "multipart/form-data" => FormData::parse_multipart(bytes, m),
        Some(m) if m.essence() == "application/x-www-form-urlencoded" => {
            Ok(FormData::parse_urlencoded(bytes))
        }
        _ => Err(NetError::FormDataContentType),
    }
}
