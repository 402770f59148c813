//! Per-fetch control state.
//!
//! A [`FetchController`] moves from `Ongoing` to exactly one of `Aborted` or
//! `Terminated` and never back. Leaving `Ongoing` destroys the live
//! connection and notifies every registered listener with the reason.

use crate::base::abort::AbortReason;
use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::fetch::timing::SharedTiming;
use crate::transport::dispatcher::{AbortFn, Dispatcher};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Ongoing,
    Aborted,
    Terminated,
}

/// The connection of the single in-flight network attempt.
#[derive(Default)]
pub struct Connection {
    abort: Mutex<Option<AbortFn>>,
    destroyed: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("destroyed", &self.is_destroyed()).finish()
    }
}

impl Connection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs the transport's abort callback. A connection destroyed
    /// before the transport connected aborts it right away.
    pub fn set_abort(&self, abort: AbortFn) {
        if self.is_destroyed() {
            abort(NetError::Aborted(AbortReason::Aborted));
            return;
        }
        *self.abort.lock().unwrap_or_else(|e| e.into_inner()) = Some(abort);
    }

    /// Marks the connection destroyed. With `call_abort` the transport's
    /// abort callback runs with `error` (or a plain abort). Idempotent.
    pub fn destroy(&self, error: Option<NetError>, call_abort: bool) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let abort = self.abort.lock().unwrap_or_else(|e| e.into_inner()).take();
        if call_abort {
            if let Some(abort) = abort {
                abort(error.unwrap_or(NetError::Aborted(AbortReason::Aborted)));
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

type TerminatedListener = Box<dyn FnOnce(&NetError) + Send>;

struct Inner {
    state: ControllerState,
    abort_reason: Option<AbortReason>,
    listeners: Vec<(u64, TerminatedListener)>,
    next_listener: u64,
    connection: Option<Arc<Connection>>,
}

pub struct FetchController {
    inner: Mutex<Inner>,
    dispatcher: Arc<dyn Dispatcher>,
    timing: SharedTiming,
    dump: AtomicBool,
    ended: AtomicBool,
    load_state: AtomicU8,
}

impl fmt::Debug for FetchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchController")
            .field("state", &self.state())
            .field("load_state", &self.load_state())
            .field("dump", &self.dump())
            .field("ended", &self.ended())
            .finish()
    }
}

impl FetchController {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, timing: SharedTiming) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: ControllerState::Ongoing,
                abort_reason: None,
                listeners: Vec::new(),
                next_listener: 0,
                connection: None,
            }),
            dispatcher,
            timing,
            dump: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            load_state: AtomicU8::new(LoadState::Idle.as_u8()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ControllerState {
        self.lock().state
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == ControllerState::Aborted
    }

    /// Aborted or terminated.
    pub fn is_cancelled(&self) -> bool {
        self.state() != ControllerState::Ongoing
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.lock().abort_reason.clone()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn timing(&self) -> &SharedTiming {
        &self.timing
    }

    pub fn abort(&self, reason: AbortReason) {
        self.finish(ControllerState::Aborted, NetError::Aborted(reason.clone()), Some(reason));
    }

    pub fn terminate(&self, cause: Option<NetError>) {
        self.finish(ControllerState::Terminated, NetError::terminated(cause), None);
    }

    fn finish(&self, state: ControllerState, error: NetError, reason: Option<AbortReason>) {
        let (listeners, connection) = {
            let mut inner = self.lock();
            if inner.state != ControllerState::Ongoing {
                return;
            }
            inner.state = state;
            inner.abort_reason = reason;
            (std::mem::take(&mut inner.listeners), inner.connection.clone())
        };
        tracing::debug!(state = ?state, error = %error, "fetch controller finished");
        if let Some(connection) = connection {
            connection.destroy(Some(error.clone()), true);
        }
        for (_, listener) in listeners {
            listener(&error);
        }
        self.set_load_state(LoadState::Done);
    }

    /// Registers a listener for leaving `Ongoing`. When the controller has
    /// already left it, the listener runs immediately.
    pub fn on_terminated<F>(&self, listener: F) -> u64
    where
        F: FnOnce(&NetError) + Send + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        match inner.state {
            ControllerState::Ongoing => {
                inner.listeners.push((id, Box::new(listener)));
            }
            ControllerState::Aborted => {
                let reason = inner.abort_reason.clone().unwrap_or(AbortReason::Aborted);
                let error = NetError::Aborted(reason);
                drop(inner);
                listener(&error);
            }
            ControllerState::Terminated => {
                drop(inner);
                listener(&NetError::terminated(None));
            }
        }
        id
    }

    pub fn off_terminated(&self, id: u64) {
        self.lock().listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Installs the connection for a new network attempt. Any previous
    /// connection must already be destroyed.
    pub fn set_connection(&self, connection: Arc<Connection>) {
        let mut inner = self.lock();
        debug_assert!(inner.connection.as_ref().map_or(true, |c| c.is_destroyed()));
        inner.connection = Some(connection);
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.lock().connection.clone()
    }

    pub fn destroy_connection(&self, call_abort: bool) {
        if let Some(connection) = self.connection() {
            connection.destroy(None, call_abort);
        }
    }

    /// Discard response body bytes instead of queueing them.
    pub fn set_dump(&self, dump: bool) {
        self.dump.store(dump, Ordering::Release);
    }

    pub fn dump(&self) -> bool {
        self.dump.load(Ordering::Acquire)
    }

    /// The transport delivered the complete response.
    pub fn set_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn set_load_state(&self, state: LoadState) {
        self.load_state.store(state.as_u8(), Ordering::Release);
    }

    pub fn load_state(&self) -> LoadState {
        LoadState::from_u8(self.load_state.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::dispatcher::{DispatchHandler, DispatchOptions};
    use std::sync::atomic::AtomicUsize;

    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn dispatch(&self, _options: DispatchOptions, _handler: Box<dyn DispatchHandler>) {}
    }

    fn controller() -> Arc<FetchController> {
        FetchController::new(Arc::new(NullDispatcher), SharedTiming::default())
    }

    #[test]
    fn test_abort_is_terminal() {
        let c = controller();
        c.abort(AbortReason::Timeout);
        c.terminate(None);
        c.abort(AbortReason::Aborted);
        assert_eq!(c.state(), ControllerState::Aborted);
        assert_eq!(c.abort_reason(), Some(AbortReason::Timeout));
        assert_eq!(c.load_state(), LoadState::Done);
    }

    #[test]
    fn test_listeners_fire_once_with_reason() {
        let c = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        c.on_terminated(move |e| s.lock().unwrap().push(e.clone()));
        let removed = c.on_terminated(|_| panic!("removed listener ran"));
        c.off_terminated(removed);

        c.terminate(Some(NetError::ConnectionReset));
        c.terminate(None);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cause(), Some(&NetError::ConnectionReset));
        assert_eq!(c.listener_count(), 0);
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let c = controller();
        c.abort(AbortReason::Aborted);
        let hit = Arc::new(AtomicBool::new(false));
        let h = hit.clone();
        c.on_terminated(move |e| {
            assert!(e.is_abort());
            h.store(true, Ordering::SeqCst);
        });
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_abort_destroys_connection_once() {
        let c = controller();
        let conn = Connection::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = calls.clone();
        conn.set_abort(Box::new(move |e| {
            assert!(e.is_abort());
            k.fetch_add(1, Ordering::SeqCst);
        }));
        c.set_connection(conn.clone());
        c.abort(AbortReason::Aborted);
        conn.destroy(None, true);
        assert!(conn.is_destroyed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_connection_aborts_late_transport() {
        let conn = Connection::new();
        conn.destroy(None, false);
        let hit = Arc::new(AtomicBool::new(false));
        let h = hit.clone();
        conn.set_abort(Box::new(move |_| h.store(true, Ordering::SeqCst)));
        assert!(hit.load(Ordering::SeqCst));
    }
}
