//! Push-to-pull bridge between a [`Dispatcher`](super::dispatcher::Dispatcher)
//! and a response body.
//!
//! The dispatcher pushes chunks into [`NetworkTransportAdapter`]; the
//! consumer pulls them from [`ResponseBodyStream`]. Both sides share a queue
//! bounded by a high-water mark. `on_data` returns false once the queue is
//! full, and the transport stays paused until the pull side drains the
//! queue and invokes the resume callback.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::fetch::controller::{Connection, FetchController};
use crate::fetch::request::RedirectMode;
use crate::http::constants::{is_null_body_status, is_redirect_status};
use crate::http::decoder::DecoderChain;
use crate::http::headertable::HeaderTable;
use crate::transport::dispatcher::{AbortFn, DispatchHandler, RawHeaders, ResumeFn, UpgradedIo};
use bytes::Bytes;
use futures::Stream;
use http::Method;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Instant;
use tokio::sync::oneshot;

/// What the transport reported before the body phase.
pub enum HeadOutcome {
    Headers {
        status: u16,
        status_text: String,
        headers: HeaderTable,
    },
    Upgrade {
        status: u16,
        headers: HeaderTable,
        socket: Box<dyn UpgradedIo>,
    },
    Failed(NetError),
}

enum QueueState {
    Open,
    Closed,
    Errored(NetError),
    /// The error has been delivered; the stream is finished.
    Done,
}

struct QueueInner {
    chunks: VecDeque<Bytes>,
    queued_bytes: usize,
    high_water_mark: usize,
    state: QueueState,
    paused: bool,
    resume: Option<ResumeFn>,
    waker: Option<Waker>,
    /// The pull side was dropped.
    detached: bool,
}

#[derive(Clone)]
struct BodyQueue(Arc<Mutex<QueueInner>>);

impl BodyQueue {
    fn new(high_water_mark: usize) -> Self {
        BodyQueue(Arc::new(Mutex::new(QueueInner {
            chunks: VecDeque::new(),
            queued_bytes: 0,
            high_water_mark: high_water_mark.max(1),
            state: QueueState::Open,
            paused: false,
            resume: None,
            waker: None,
            detached: false,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a chunk. Returns whether the consumer still wants more.
    fn push(&self, chunk: Bytes) -> bool {
        let (waker, wants_more) = {
            let mut q = self.lock();
            if q.detached || !matches!(q.state, QueueState::Open) {
                return true;
            }
            if !chunk.is_empty() {
                q.queued_bytes += chunk.len();
                q.chunks.push_back(chunk);
            }
            let wants_more = q.queued_bytes < q.high_water_mark;
            if !wants_more {
                q.paused = true;
                tracing::trace!(queued = q.queued_bytes, "body queue full, pausing transport");
            }
            (q.waker.take(), wants_more)
        };
        if let Some(w) = waker {
            w.wake();
        }
        wants_more
    }

    /// Moves an open queue to `state`. Later transitions are ignored.
    fn finish(&self, state: QueueState) -> bool {
        let waker = {
            let mut q = self.lock();
            if !matches!(q.state, QueueState::Open) {
                return false;
            }
            q.state = state;
            q.waker.take()
        };
        if let Some(w) = waker {
            w.wake();
        }
        true
    }

    fn set_resume(&self, resume: ResumeFn) {
        self.lock().resume = Some(resume);
    }

    fn is_detached(&self) -> bool {
        self.lock().detached
    }

    fn is_open(&self) -> bool {
        matches!(self.lock().state, QueueState::Open)
    }
}

/// The handler given to the dispatcher for one network attempt.
pub struct NetworkTransportAdapter {
    controller: Arc<FetchController>,
    connection: Arc<Connection>,
    method: Method,
    redirect: RedirectMode,
    queue: BodyQueue,
    head: Option<oneshot::Sender<HeadOutcome>>,
    decoder: Option<DecoderChain>,
    listener: Option<u64>,
    encoded_body_size: u64,
}

/// Builds the adapter, the receiver for the response head and the body
/// stream for one network attempt.
pub fn channel(
    controller: Arc<FetchController>,
    connection: Arc<Connection>,
    method: Method,
    redirect: RedirectMode,
    high_water_mark: usize,
) -> (NetworkTransportAdapter, oneshot::Receiver<HeadOutcome>, ResponseBodyStream) {
    let queue = BodyQueue::new(high_water_mark);
    let (head_tx, head_rx) = oneshot::channel();

    // Leaving `Ongoing` errors a still-open body with the reason.
    let on_cancel = queue.clone();
    let listener = controller.on_terminated(move |error| {
        if on_cancel.finish(QueueState::Errored(error.clone())) {
            tracing::debug!(error = %error, "response body cancelled");
        }
    });

    let adapter = NetworkTransportAdapter {
        controller: controller.clone(),
        connection: connection.clone(),
        method,
        redirect,
        queue: queue.clone(),
        head: Some(head_tx),
        decoder: None,
        listener: Some(listener),
        encoded_body_size: 0,
    };
    let stream = ResponseBodyStream {
        queue,
        controller,
        connection,
        finished: false,
    };
    (adapter, head_rx, stream)
}

impl NetworkTransportAdapter {
    fn unregister(&mut self) {
        if let Some(id) = self.listener.take() {
            self.controller.off_terminated(id);
        }
    }

    fn send_head(&mut self, outcome: HeadOutcome) {
        if let Some(tx) = self.head.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Fails the attempt. A failure after the transport finished without
    /// delivering any body bytes closes the body cleanly instead.
    fn fail(&mut self, error: NetError) {
        self.unregister();
        if self.head.is_some() {
            self.send_head(HeadOutcome::Failed(error.clone()));
        }
        if self.controller.ended() && self.encoded_body_size == 0 {
            self.close();
            return;
        }
        if self.queue.is_detached() {
            return;
        }
        tracing::warn!(error = %error, "network transfer failed");
        self.queue.finish(QueueState::Errored(NetError::terminated(Some(error.clone()))));
        self.controller.terminate(Some(error));
    }

    fn close(&mut self) {
        if self.queue.finish(QueueState::Closed) {
            self.controller.timing().update(|t| t.end_time = Some(Instant::now()));
        }
        self.controller.set_load_state(LoadState::Done);
    }
}

impl DispatchHandler for NetworkTransportAdapter {
    fn on_connect(&mut self, abort: AbortFn) {
        self.connection.set_abort(abort);
        self.controller
            .timing()
            .update(|t| t.final_network_request_start_time = Some(Instant::now()));
        self.controller.set_load_state(LoadState::WaitingForResponse);
    }

    fn on_response_started(&mut self) {
        self.controller
            .timing()
            .update(|t| t.final_network_response_start_time = Some(Instant::now()));
    }

    fn on_headers(
        &mut self,
        status: u16,
        raw: RawHeaders,
        resume: ResumeFn,
        status_text: &str,
    ) -> bool {
        if status < 200 {
            return true;
        }
        let headers = HeaderTable::from_raw_pairs(&raw);
        let codings: Vec<String> = headers
            .get("content-encoding")
            .map(|v| v.to_ascii_lowercase().split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default();

        let will_follow = headers.contains("location")
            && self.redirect == RedirectMode::Follow
            && is_redirect_status(status);
        let skip_decoding = self.method == Method::HEAD
            || self.method == Method::CONNECT
            || is_null_body_status(status)
            || will_follow;
        if !skip_decoding {
            self.decoder = DecoderChain::from_codings(&codings);
        }

        self.queue.set_resume(resume);
        self.controller.set_load_state(LoadState::ReadingResponse);
        self.send_head(HeadOutcome::Headers {
            status,
            status_text: status_text.to_string(),
            headers,
        });
        true
    }

    fn on_data(&mut self, chunk: Bytes) -> bool {
        if self.controller.dump() {
            return true;
        }
        let len = chunk.len() as u64;
        self.encoded_body_size += len;
        self.controller.timing().update(|t| t.encoded_body_size += len);

        let decoded = match self.decoder.as_mut() {
            Some(chain) => chain.decode(&chunk),
            None => Ok(chunk),
        };
        match decoded {
            Ok(bytes) => self.queue.push(bytes),
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn on_complete(&mut self, _trailers: RawHeaders) {
        self.unregister();
        self.controller.set_ended();
        if let Some(mut chain) = self.decoder.take() {
            match chain.finish() {
                Ok(tail) => {
                    self.queue.push(tail);
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
        self.close();
    }

    fn on_error(&mut self, error: NetError) {
        self.decoder = None;
        self.fail(error);
    }

    fn on_upgrade(&mut self, status: u16, raw: RawHeaders, socket: Box<dyn UpgradedIo>) {
        if status != 101 {
            return;
        }
        self.unregister();
        let headers = HeaderTable::from_raw_pairs(&raw);
        self.send_head(HeadOutcome::Upgrade {
            status,
            headers,
            socket,
        });
        self.queue.finish(QueueState::Closed);
    }
}

impl Drop for NetworkTransportAdapter {
    fn drop(&mut self) {
        self.unregister();
        if self.head.is_some() {
            self.send_head(HeadOutcome::Failed(NetError::ConnectionClosed));
        }
        // A dispatcher that goes away mid-body must not leave the reader
        // waiting forever.
        if self.queue.is_open() && !self.queue.is_detached() {
            let error = NetError::terminated(Some(NetError::ConnectionClosed));
            self.queue.finish(QueueState::Errored(error));
        }
    }
}

/// The pull side of a network response body.
pub struct ResponseBodyStream {
    queue: BodyQueue,
    controller: Arc<FetchController>,
    connection: Arc<Connection>,
    finished: bool,
}

impl Stream for ResponseBodyStream {
    type Item = Result<Bytes, NetError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let (item, resume) = {
            let mut q = this.queue.lock();
            if let Some(chunk) = q.chunks.pop_front() {
                q.queued_bytes -= chunk.len();
                let resume = if q.paused && q.queued_bytes < q.high_water_mark {
                    q.paused = false;
                    q.resume.clone()
                } else {
                    None
                };
                (Poll::Ready(Some(Ok(chunk))), resume)
            } else {
                match std::mem::replace(&mut q.state, QueueState::Open) {
                    QueueState::Open => {
                        q.waker = Some(cx.waker().clone());
                        let resume = if q.paused {
                            q.paused = false;
                            q.resume.clone()
                        } else {
                            None
                        };
                        (Poll::Pending, resume)
                    }
                    QueueState::Closed => {
                        q.state = QueueState::Closed;
                        (Poll::Ready(None), None)
                    }
                    QueueState::Errored(e) => {
                        q.state = QueueState::Done;
                        (Poll::Ready(Some(Err(e))), None)
                    }
                    QueueState::Done => {
                        q.state = QueueState::Done;
                        (Poll::Ready(None), None)
                    }
                }
            }
        };

        if let Some(resume) = resume {
            tracing::trace!("body queue drained, resuming transport");
            resume();
        }
        match &item {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.len() as u64;
                this.controller.timing().update(|t| t.decoded_body_size += len);
            }
            Poll::Ready(_) => this.finished = true,
            Poll::Pending => {}
        }
        item
    }
}

impl Drop for ResponseBodyStream {
    fn drop(&mut self) {
        let still_open = {
            let mut q = self.queue.lock();
            q.detached = true;
            q.chunks.clear();
            matches!(q.state, QueueState::Open)
        };
        if still_open && !self.controller.dump() {
            tracing::debug!("response body dropped before completion, destroying connection");
            self.connection.destroy(None, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::timing::SharedTiming;
    use crate::transport::dispatcher::{DispatchOptions, Dispatcher};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn dispatch(&self, _options: DispatchOptions, _handler: Box<dyn DispatchHandler>) {}
    }

    fn setup(
        hwm: usize,
    ) -> (
        NetworkTransportAdapter,
        oneshot::Receiver<HeadOutcome>,
        ResponseBodyStream,
        Arc<FetchController>,
    ) {
        let controller = FetchController::new(Arc::new(NullDispatcher), SharedTiming::default());
        let connection = Connection::new();
        controller.set_connection(connection.clone());
        let (adapter, rx, stream) =
            channel(controller.clone(), connection, Method::GET, RedirectMode::Follow, hwm);
        (adapter, rx, stream, controller)
    }

    fn counting_resume() -> (ResumeFn, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let resume: ResumeFn = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (resume, count)
    }

    fn raw(pairs: &[(&'static str, &'static str)]) -> RawHeaders {
        pairs
            .iter()
            .map(|(n, v)| (Bytes::from_static(n.as_bytes()), Bytes::from_static(v.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn test_headers_then_body() {
        let (mut adapter, rx, mut stream, controller) = setup(1024);
        let (resume, _) = counting_resume();
        assert!(adapter.on_headers(100, raw(&[]), resume.clone(), "Continue"));
        assert!(adapter.on_headers(200, raw(&[("X-A", "1")]), resume, "OK"));
        match rx.await.unwrap() {
            HeadOutcome::Headers {
                status, headers, ..
            } => {
                assert_eq!(status, 200);
                assert_eq!(headers.get("x-a"), Some("1"));
            }
            _ => panic!("expected headers"),
        }
        assert!(adapter.on_data(Bytes::from_static(b"ab")));
        assert!(adapter.on_data(Bytes::from_static(b"cd")));
        adapter.on_complete(Vec::new());

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"cd"));
        assert!(stream.next().await.is_none());
        let timing = controller.timing().snapshot();
        assert_eq!(timing.encoded_body_size, 4);
        assert_eq!(timing.decoded_body_size, 4);
        assert_eq!(controller.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_backpressure_pause_and_resume() {
        let (mut adapter, _rx, mut stream, _c) = setup(4);
        let (resume, resumed) = counting_resume();
        adapter.on_headers(200, raw(&[]), resume, "OK");

        assert!(adapter.on_data(Bytes::from_static(b"ab")));
        assert!(!adapter.on_data(Bytes::from_static(b"cd")));
        assert_eq!(resumed.load(Ordering::SeqCst), 0);

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        assert!(adapter.on_data(Bytes::from_static(b"e")));
        adapter.on_complete(Vec::new());
        let rest: Vec<_> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(rest, vec![Bytes::from_static(b"cd"), Bytes::from_static(b"e")]);
    }

    #[tokio::test]
    async fn test_gzip_decoded_on_the_fly() {
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut e = GzEncoder::new(Vec::new(), flate2::Compression::default());
        e.write_all(b"plain text").unwrap();
        let gz = e.finish().unwrap();

        let (mut adapter, _rx, stream, controller) = setup(1024);
        let (resume, _) = counting_resume();
        adapter.on_headers(200, raw(&[("Content-Encoding", "GZIP")]), resume, "OK");
        for part in gz.chunks(3) {
            adapter.on_data(Bytes::copy_from_slice(part));
        }
        adapter.on_complete(Vec::new());
        let body = crate::http::messagebody::ByteStream::new(stream).collect_bytes().await.unwrap();
        assert_eq!(body, Bytes::from_static(b"plain text"));
        assert_eq!(controller.timing().snapshot().encoded_body_size, gz.len() as u64);
    }

    #[tokio::test]
    async fn test_redirect_response_not_decoded() {
        let (mut adapter, _rx, stream, _c) = setup(1024);
        let (resume, _) = counting_resume();
        let headers = raw(&[("Location", "/x"), ("Content-Encoding", "gzip")]);
        adapter.on_headers(302, headers, resume, "Found");
        adapter.on_data(Bytes::from_static(b"not gzip"));
        adapter.on_complete(Vec::new());
        let body = crate::http::messagebody::ByteStream::new(stream).collect_bytes().await.unwrap();
        assert_eq!(body, Bytes::from_static(b"not gzip"));
    }

    #[tokio::test]
    async fn test_abort_errors_body() {
        let (mut adapter, _rx, mut stream, controller) = setup(1024);
        let (resume, _) = counting_resume();
        adapter.on_headers(200, raw(&[]), resume, "OK");
        adapter.on_data(Bytes::from_static(b"x"));
        controller.abort(crate::base::abort::AbortReason::Aborted);

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(stream.next().await.unwrap().unwrap_err().is_abort());
        assert!(stream.next().await.is_none());
        assert_eq!(controller.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_terminates() {
        let (mut adapter, _rx, mut stream, controller) = setup(1024);
        let (resume, _) = counting_resume();
        adapter.on_headers(200, raw(&[]), resume, "OK");
        adapter.on_data(Bytes::from_static(b"x"));
        adapter.on_error(NetError::ConnectionReset);
        let _ = stream.next().await;
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.cause(), Some(&NetError::ConnectionReset));
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_error_before_headers_reported() {
        let (mut adapter, rx, _stream, _c) = setup(1024);
        adapter.on_error(NetError::ConnectionRefused);
        assert!(matches!(rx.await.unwrap(), HeadOutcome::Failed(NetError::ConnectionRefused)));
    }

    #[tokio::test]
    async fn test_empty_body_decoder_failure_closes_cleanly() {
        let (mut adapter, _rx, stream, controller) = setup(1024);
        let (resume, _) = counting_resume();
        adapter.on_headers(200, raw(&[("Content-Encoding", "gzip")]), resume, "OK");
        adapter.on_complete(Vec::new());
        let body = crate::http::messagebody::ByteStream::new(stream).collect_bytes().await.unwrap();
        assert!(body.is_empty());
        assert!(!controller.is_cancelled());
    }

    #[test]
    fn test_dropping_body_destroys_connection() {
        let (mut adapter, _rx, stream, controller) = setup(1024);
        let aborted = Arc::new(AtomicBool::new(false));
        let a = aborted.clone();
        adapter.on_connect(Box::new(move |_| a.store(true, Ordering::SeqCst)));
        let (resume, _) = counting_resume();
        adapter.on_headers(200, raw(&[]), resume, "OK");
        drop(stream);
        assert!(aborted.load(Ordering::SeqCst));
        assert!(!controller.is_cancelled());
        // Data arriving afterwards is discarded.
        assert!(adapter.on_data(Bytes::from_static(b"late")));
    }
}
