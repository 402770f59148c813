//! Cancellation tokens.
//!
//! An [`AbortController`] owns the ability to fire; any number of cloned
//! [`AbortSignal`]s observe it. Timeouts are ordinary controllers fired by a
//! timer task.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;

/// Why a signal fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Aborted,
    Timeout,
    Custom(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Aborted => f.write_str("This operation was aborted"),
            AbortReason::Timeout => f.write_str("The operation was aborted due to timeout"),
            AbortReason::Custom(msg) => f.write_str(msg),
        }
    }
}

/// Handle returned by [`AbortSignal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnOnce(&AbortReason) + Send>;

#[derive(Default)]
struct SignalState {
    reason: Option<AbortReason>,
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    notify: Notify,
    /// Subscriptions an [`AbortSignal::any`] signal holds on its sources.
    sources: Mutex<Vec<(AbortSignal, SubscriptionId)>>,
}

impl SignalInner {
    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, reason: AbortReason) {
        let listeners = {
            let mut state = self.lock();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason.clone());
            std::mem::take(&mut state.listeners)
        };
        tracing::debug!(reason = %reason, listeners = listeners.len(), "abort signal fired");
        self.release_sources();
        for (_, listener) in listeners {
            listener(&reason);
        }
        self.notify.notify_waiters();
    }

    fn release_sources(&self) {
        let sources = {
            let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *sources)
        };
        for (signal, id) in sources {
            signal.unsubscribe(id);
        }
    }
}

impl Drop for SignalInner {
    fn drop(&mut self) {
        self.release_sources();
    }
}

/// Observer side of a cancellation token.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal").field("reason", &self.reason()).finish()
    }
}

impl AbortSignal {
    /// A signal that has already fired.
    pub fn abort(reason: AbortReason) -> Self {
        let signal = AbortSignal::default();
        signal.inner.fire(reason);
        signal
    }

    /// A signal that fires with [`AbortReason::Timeout`] after `duration`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn timeout(duration: Duration) -> Self {
        let signal = AbortSignal::default();
        let weak: Weak<SignalInner> = Arc::downgrade(&signal.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(AbortReason::Timeout);
            }
        });
        signal
    }

    /// A signal that fires as soon as any of `signals` fires, with its reason.
    pub fn any(signals: &[AbortSignal]) -> Self {
        let combined = AbortSignal::default();
        if let Some(reason) = signals.iter().find_map(AbortSignal::reason) {
            combined.inner.fire(reason);
            return combined;
        }
        let mut sources = Vec::with_capacity(signals.len());
        for signal in signals {
            let weak = Arc::downgrade(&combined.inner);
            let id = signal.subscribe(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(reason.clone());
                }
            });
            sources.push((signal.clone(), id));
        }
        *combined.inner.sources.lock().unwrap_or_else(|e| e.into_inner()) = sources;
        combined
    }

    pub fn aborted(&self) -> bool {
        self.inner.lock().reason.is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.inner.lock().reason.clone()
    }

    /// Registers `listener` to run once when the signal fires.
    ///
    /// Listeners registered after the signal fired are never called; check
    /// [`aborted`](Self::aborted) first.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.reason.is_none() {
            state.listeners.push((id, Box::new(listener)));
        }
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().listeners.retain(|(lid, _)| *lid != id.0);
    }

    /// Number of listeners still waiting for the signal.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Resolves with the reason once the signal fires.
    pub async fn cancelled(&self) -> AbortReason {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

/// Owner side of a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fires the signal with [`AbortReason::Aborted`]. Later calls are no-ops.
    pub fn abort(&self) {
        self.signal.inner.fire(AbortReason::Aborted);
    }

    pub fn abort_with(&self, reason: AbortReason) {
        self.signal.inner.fire(reason);
    }
}
