//! Scripted dispatcher shared by the integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use fetchnet::transport::{
    AbortFn, DispatchHandler, DispatchOptions, Dispatcher, RawHeaders, ResumeFn,
};
use fetchnet::{Client, NetError};
use futures::StreamExt;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};

/// One canned reply.
#[derive(Clone, Debug, Default)]
pub struct MockResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
    /// Reported through `on_error` after the chunks instead of completing.
    pub error: Option<NetError>,
    /// Never complete; only an abort ends the exchange.
    pub stall: bool,
    /// Never deliver the head.
    pub stall_head: bool,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: "OK".to_string(),
            ..Default::default()
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).status_text("Redirect").header("location", location)
    }

    pub fn status_text(mut self, text: &str) -> Self {
        self.status_text = text.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.chunks.push(body.into());
        self
    }

    pub fn chunks<I: IntoIterator<Item = &'static str>>(mut self, chunks: I) -> Self {
        self.chunks.extend(chunks.into_iter().map(Bytes::from));
        self
    }

    pub fn error(mut self, error: NetError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn stall_head(mut self) -> Self {
        self.stall_head = true;
        self
    }
}

/// What the dispatcher was asked to send.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub origin: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub max_redirections: u32,
    pub reset: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.origin, self.path)
    }
}

/// Replies to each dispatch with the next scripted response, in order.
#[derive(Default)]
pub struct MockDispatcher {
    script: Mutex<VecDeque<MockResponse>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    aborts: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
}

impl MockDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(responses: Vec<MockResponse>) -> Arc<Self> {
        let mock = Self::new();
        for r in responses {
            mock.push(r);
        }
        mock
    }

    pub fn push(&self, response: MockResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Times an abort callback handed out by this dispatcher was invoked.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Exchanges that have not yet delivered `on_complete` or `on_error`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn client(self: &Arc<Self>) -> Client {
        Client::builder().dispatcher(self.clone()).build()
    }
}

impl Dispatcher for MockDispatcher {
    fn dispatch(&self, options: DispatchOptions, mut handler: Box<dyn DispatchHandler>) {
        let next = self.script.lock().unwrap().pop_front();
        let (abort_tx, mut abort_rx) = oneshot::channel::<NetError>();
        let aborts = self.aborts.clone();
        let abort: AbortFn = Box::new(move |error| {
            aborts.fetch_add(1, Ordering::SeqCst);
            let _ = abort_tx.send(error);
        });
        handler.on_connect(abort);

        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        // Index reserved now so recordings keep dispatch order.
        let requests = self.requests.clone();
        let DispatchOptions {
            method,
            origin,
            path,
            headers,
            body,
            max_redirections,
            reset,
            ..
        } = options;
        let slot = {
            let mut list = requests.lock().unwrap();
            list.push(RecordedRequest {
                method: method.to_string(),
                origin,
                path,
                headers,
                body: None,
                max_redirections,
                reset,
            });
            list.len() - 1
        };

        tokio::spawn(async move {
            let outcome = {
                let exchange = async {
                    if let Some(mut stream) = body {
                        let mut collected = Vec::new();
                        while let Some(chunk) = stream.next().await {
                            collected.extend_from_slice(&chunk?);
                        }
                        requests.lock().unwrap()[slot].body = Some(Bytes::from(collected));
                    }
                    match next {
                        Some(response) => play(response, handler.as_mut()).await,
                        None => Err(NetError::ConnectionRefused),
                    }
                };
                tokio::select! {
                    result = exchange => result,
                    Ok(error) = &mut abort_rx => Err(error),
                }
            };
            if let Err(error) = outcome {
                handler.on_error(error);
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn play(response: MockResponse, handler: &mut dyn DispatchHandler) -> Result<(), NetError> {
    if response.stall_head {
        std::future::pending::<()>().await;
    }
    handler.on_response_started();
    let resume_signal = Arc::new(Notify::new());
    let signal = resume_signal.clone();
    let resume: ResumeFn = Arc::new(move || signal.notify_one());

    let raw: RawHeaders = response
        .headers
        .iter()
        .map(|(n, v)| (Bytes::from(n.clone()), Bytes::from(v.clone())))
        .collect();
    if !handler.on_headers(response.status, raw, resume, &response.status_text) {
        resume_signal.notified().await;
    }
    for chunk in response.chunks {
        if !handler.on_data(chunk) {
            resume_signal.notified().await;
        }
    }
    if response.stall {
        std::future::pending::<()>().await;
    }
    match response.error {
        Some(error) => Err(error),
        None => {
            handler.on_complete(Vec::new());
            Ok(())
        }
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
