use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Timestamps and byte counters for one fetch, across redirects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingInfo {
    pub start_time: Option<Instant>,
    pub redirect_start_time: Option<Instant>,
    pub redirect_end_time: Option<Instant>,
    pub post_redirect_start_time: Option<Instant>,
    pub final_network_request_start_time: Option<Instant>,
    /// First byte of the response head.
    pub final_network_response_start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    /// Bytes received before content decoding.
    pub encoded_body_size: u64,
    /// Bytes delivered to the body after content decoding.
    pub decoded_body_size: u64,
}

/// Timing info shared between the pipeline, the transport adapter and every
/// response view built from it.
#[derive(Debug, Clone, Default)]
pub struct SharedTiming(Arc<Mutex<TimingInfo>>);

impl SharedTiming {
    pub fn started() -> Self {
        let timing = SharedTiming::default();
        timing.update(|t| t.start_time = Some(Instant::now()));
        timing
    }

    pub fn update<F: FnOnce(&mut TimingInfo)>(&self, f: F) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn snapshot(&self) -> TimingInfo {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn ptr_eq(&self, other: &SharedTiming) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
