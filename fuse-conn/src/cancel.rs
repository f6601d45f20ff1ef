//! Hierarchical cancellation scopes.
//!
//! Every in-flight operation runs under a scope derived from the
//! connection's root scope. Cancelling a scope cancels every scope derived
//! from it; a derived scope can also be fired individually through the
//! [`CancelHandle`] split off at creation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use event_listener::Event;
use futures_util::future::select_all;

#[derive(Debug)]
struct State {
    fired: AtomicBool,
    event: Event,
    parent: Option<Arc<State>>,
}

impl State {
    fn new(parent: Option<Arc<State>>) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            event: Event::new(),
            parent,
        })
    }

    fn is_cancelled(&self) -> bool {
        if self.fired.load(Ordering::Acquire) {
            return true;
        }
        match self.parent {
            Some(ref parent) => parent.is_cancelled(),
            None => false,
        }
    }

    fn fire(&self) {
        // flag before notify: a waiter that wakes must observe the flag
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.event.notify(usize::MAX);
        }
    }
}

/// A cancellable scope handed to operation handlers.
#[derive(Debug, Clone)]
pub struct CancelScope {
    state: Arc<State>,
}

/// Fires the scope it was split from. Idempotent and callable from any
/// thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<State>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::root()
    }
}

impl CancelScope {
    /// Creates a scope with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self {
            state: State::new(None),
        }
    }

    /// Derives a child scope and the handle that fires it.
    #[must_use]
    pub fn child(&self) -> (CancelScope, CancelHandle) {
        let state = State::new(Some(Arc::clone(&self.state)));
        let scope = CancelScope {
            state: Arc::clone(&state),
        };
        (scope, CancelHandle { state })
    }

    /// Cancels this scope and, transitively, every scope derived from it.
    pub fn cancel(&self) {
        self.state.fire();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Resolves once this scope or any ancestor has been cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }

            let mut listeners = Vec::new();
            let mut cur = Some(&self.state);
            while let Some(state) = cur {
                listeners.push(Box::pin(state.event.listen()));
                cur = state.parent.as_ref();
            }

            // re-check after registering, or a fire between the check and
            // `listen` would be missed
            if self.is_cancelled() {
                return;
            }

            let _ = select_all(listeners).await;
        }
    }
}

impl CancelHandle {
    /// Fires the associated scope.
    pub fn fire(&self) {
        self.state.fire();
    }
}
