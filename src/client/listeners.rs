//! Lifecycle listener registry.
//!
//! Listeners are appended under a short lock and invoked from a snapshot,
//! so a callback may register further listeners or call back into the
//! client without deadlocking. A panicking listener is logged and skipped.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::error::Error;

use super::state::DisconnectReason;

// ============================================================================
// Types
// ============================================================================

/// Called after every successful connect.
pub type ConnectListener = Arc<dyn Fn() + Send + Sync>;

/// Called when the client stops being connected.
pub type DisconnectListener = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Called on connection failures.
pub type ErrorListener = Arc<dyn Fn(&Error) + Send + Sync>;

// ============================================================================
// CallbackRegistry
// ============================================================================

/// Ordered lists of lifecycle callbacks.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    connect: RwLock<Vec<ConnectListener>>,
    disconnect: RwLock<Vec<DisconnectListener>>,
    error: RwLock<Vec<ErrorListener>>,
}

impl CallbackRegistry {
    pub(crate) fn add_connect(&self, listener: ConnectListener) {
        self.connect.write().push(listener);
    }

    pub(crate) fn add_disconnect(&self, listener: DisconnectListener) {
        self.disconnect.write().push(listener);
    }

    pub(crate) fn add_error(&self, listener: ErrorListener) {
        self.error.write().push(listener);
    }

    pub(crate) fn notify_connect(&self) {
        let snapshot = self.connect.read().clone();
        for listener in snapshot {
            guarded("on_connect", || listener());
        }
    }

    pub(crate) fn notify_disconnect(&self, reason: &DisconnectReason) {
        let snapshot = self.disconnect.read().clone();
        for listener in snapshot {
            guarded("on_disconnect", || listener(reason));
        }
    }

    pub(crate) fn notify_error(&self, err: &Error) {
        let snapshot = self.error.read().clone();
        for listener in snapshot {
            guarded("on_error", || listener(err));
        }
    }
}

fn guarded(kind: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(listener = kind, "Listener panicked");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let listeners = CallbackRegistry::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = Arc::clone(&order);
            listeners.add_connect(Arc::new(move || order.lock().push(n)));
        }
        listeners.notify_connect();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let listeners = CallbackRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        listeners.add_disconnect(Arc::new(|_| panic!("listener bug")));
        let sink = Arc::clone(&seen);
        listeners.add_disconnect(Arc::new(move |reason| sink.lock().push(*reason)));

        listeners.notify_disconnect(&DisconnectReason::Manual);
        assert_eq!(*seen.lock(), vec![DisconnectReason::Manual]);
    }

    #[test]
    fn test_listener_may_register_another() {
        let listeners = Arc::new(CallbackRegistry::default());
        let inner = Arc::clone(&listeners);
        listeners.add_error(Arc::new(move |_| inner.add_error(Arc::new(|_| {}))));

        listeners.notify_error(&Error::NotConnected);
        assert_eq!(listeners.error.read().len(), 2);
    }
}
