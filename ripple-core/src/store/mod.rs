//! Transactional State Store
//!
//! A [`Store`] holds one record-like state object, independent of the
//! observable/computed graph, with its own listeners.
//!
//! # Updates
//!
//! The state is replaced wholesale on every update: a patch is shallow-merged
//! into the current state to produce a new value. Readers get an `Arc` of an
//! immutable snapshot, which the store never touches again.
//!
//! # Transactions
//!
//! [`Store::transaction`] groups updates. Listeners hear nothing until the
//! callback returns `Ok`, then get exactly one notification comparing the
//! state at the start of the transaction with the final state. If the
//! callback returns `Err` (or panics), state and history are restored to
//! their values at entry and the error is handed back unchanged.
//!
//! Nested transactions act as savepoints: a failing inner transaction rolls
//! back to its own entry point, and only the outermost one notifies.
//!
//! # History
//!
//! With history enabled, every update outside a transaction records the
//! replaced state on a bounded undo stack and clears the redo stack. A
//! committed transaction records a single entry.

mod config;
mod history;
mod state;

pub use config::{StoreConfig, DEFAULT_HISTORY_LIMIT};
pub use state::StoreState;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{ChangeListener, ListenerSet, Subscription};
use history::History;

/// A transactional, history-aware state container.
///
/// # Example
///
/// ```rust
/// use ripple_core::store::{Store, StoreConfig};
/// use serde_json::json;
///
/// let store = Store::new(json!({ "a": 1, "b": 2 }), StoreConfig::default().with_history(10));
///
/// store.set_state(json!({ "a": 2 }));
/// assert_eq!(*store.get_state(), json!({ "a": 2, "b": 2 }));
///
/// assert!(store.undo());
/// assert_eq!(store.get_state()["a"], 1);
/// ```
pub struct Store<T: StoreState> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    config: StoreConfig,
    initial: Arc<T>,
    core: Mutex<Core<T>>,
    listeners: ListenerSet<ChangeListener<T>>,
    destroyed: AtomicBool,
}

struct Core<T> {
    state: Arc<T>,
    /// `None` when history is disabled.
    history: Option<History<T>>,
    transaction_depth: usize,
    /// State at entry of the outermost running transaction.
    transaction_start: Option<Arc<T>>,
    /// Set when a transaction changed the state.
    pending_notification: bool,
}

/// What a transaction restores on failure.
struct Savepoint<T> {
    state: Arc<T>,
    history: Option<History<T>>,
    pending_notification: bool,
}

type Notification<T> = (Arc<T>, Arc<T>);

impl<T: StoreState> Core<T> {
    fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    /// Swap in `next`. Outside a transaction, returns the `(new, previous)`
    /// pair listeners must hear about; inside one, defers it.
    fn replace(&mut self, next: Arc<T>, record: bool) -> Option<Notification<T>> {
        let previous = std::mem::replace(&mut self.state, next.clone());
        if self.in_transaction() {
            self.pending_notification = true;
            return None;
        }
        if record {
            if let Some(history) = self.history.as_mut() {
                history.record(previous.clone());
            }
        }
        Some((next, previous))
    }
}

impl<T: StoreState> Store<T> {
    /// Create a store holding `initial_state`.
    pub fn new(initial_state: T, config: StoreConfig) -> Self {
        let initial = Arc::new(initial_state);
        let history = config
            .enable_history
            .then(|| History::new(config.history_limit));

        Self {
            inner: Arc::new(StoreInner {
                config,
                initial: initial.clone(),
                core: Mutex::new(Core {
                    state: initial,
                    history,
                    transaction_depth: 0,
                    transaction_start: None,
                    pending_notification: false,
                }),
                listeners: ListenerSet::new(),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    /// The current state as an immutable snapshot.
    pub fn get_state(&self) -> Arc<T> {
        self.inner.core.lock().state.clone()
    }

    /// Shallow-merge `patch` into the state.
    pub fn set_state(&self, patch: T::Patch) {
        let next = Arc::new(self.get_state().merge(patch));
        self.commit(next, true);
    }

    /// Shallow-merge the patch computed from the current state.
    pub fn update<F>(&self, updater: F)
    where
        F: FnOnce(&T) -> T::Patch,
    {
        let current = self.get_state();
        let next = Arc::new(current.merge(updater(&current)));
        self.commit(next, true);
    }

    /// Register a listener called with `(new, previous)` after each change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.inner.listeners.insert(Arc::new(listener))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Run `f` as one atomic, batched update.
    ///
    /// On `Ok`, listeners get one notification if anything changed and the
    /// entry state becomes a single undo entry. On `Err`, every change made
    /// inside is discarded and the error is returned unchanged.
    pub fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Self) -> Result<R, E>,
    {
        let savepoint = {
            let mut core = self.inner.core.lock();
            let savepoint = Savepoint {
                state: core.state.clone(),
                history: core.history.clone(),
                pending_notification: core.pending_notification,
            };
            if !core.in_transaction() {
                core.transaction_start = Some(core.state.clone());
                core.pending_notification = false;
            }
            core.transaction_depth += 1;
            savepoint
        };

        let guard = TransactionGuard {
            store: self,
            savepoint: Some(savepoint),
        };
        let result = f(self);
        match result {
            Ok(value) => {
                guard.commit();
                Ok(value)
            }
            Err(err) => {
                drop(guard);
                Err(err)
            }
        }
    }

    pub fn is_in_transaction(&self) -> bool {
        self.inner.core.lock().in_transaction()
    }

    /// Restore the state before the last recorded change.
    ///
    /// Returns `false` if history is disabled or there is nothing to undo.
    pub fn undo(&self) -> bool {
        self.step(|history, current| history.undo(current), "undo")
    }

    /// Re-apply the change most recently undone.
    ///
    /// Returns `false` if history is disabled or there is nothing to redo.
    pub fn redo(&self) -> bool {
        self.step(|history, current| history.redo(current), "redo")
    }

    pub fn can_undo(&self) -> bool {
        let core = self.inner.core.lock();
        core.history.as_ref().is_some_and(History::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        let core = self.inner.core.lock();
        core.history.as_ref().is_some_and(History::can_redo)
    }

    /// Number of entries on the undo stack.
    pub fn undo_depth(&self) -> usize {
        let core = self.inner.core.lock();
        core.history.as_ref().map_or(0, History::undo_len)
    }

    /// Number of entries on the redo stack.
    pub fn redo_depth(&self) -> usize {
        let core = self.inner.core.lock();
        core.history.as_ref().map_or(0, History::redo_len)
    }

    /// Go back to the initial state. The replaced state is recorded in
    /// history like any other update.
    pub fn reset(&self) {
        tracing::debug!("store reset to initial state");
        self.commit(self.inner.initial.clone(), true);
    }

    /// Drop every listener and all history.
    pub fn destroy(&self) {
        self.inner.listeners.clear();
        if let Some(history) = self.inner.core.lock().history.as_mut() {
            history.clear();
        }
        self.inner.destroyed.store(true, Ordering::Release);
        tracing::debug!("store destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    fn commit(&self, next: Arc<T>, record: bool) {
        let notification = self.inner.core.lock().replace(next, record);
        if let Some((new, previous)) = notification {
            self.notify(&new, &previous);
        }
    }

    fn step<F>(&self, pop: F, action: &'static str) -> bool
    where
        F: FnOnce(&mut History<T>, Arc<T>) -> Option<Arc<T>>,
    {
        let notification = {
            let mut core = self.inner.core.lock();
            let current = core.state.clone();
            let Some(history) = core.history.as_mut() else {
                return false;
            };
            let Some(restored) = pop(history, current) else {
                return false;
            };
            core.replace(restored, false)
        };

        tracing::debug!(action, "history step applied");
        if let Some((new, previous)) = notification {
            self.notify(&new, &previous);
        }
        true
    }

    fn notify(&self, new: &T, previous: &T) {
        self.inner.listeners.for_each(|listener| listener(new, previous));
    }
}

/// Rolls a transaction back unless it is committed first. Rollback on drop
/// also covers a panicking transaction body.
struct TransactionGuard<'a, T: StoreState> {
    store: &'a Store<T>,
    savepoint: Option<Savepoint<T>>,
}

impl<T: StoreState> TransactionGuard<'_, T> {
    fn commit(mut self) {
        self.savepoint = None;

        let notification = {
            let mut core = self.store.inner.core.lock();
            core.transaction_depth -= 1;
            if core.in_transaction() {
                return;
            }

            let start = core.transaction_start.take();
            let changed = std::mem::take(&mut core.pending_notification);
            match start {
                Some(start) if changed => {
                    if let Some(history) = core.history.as_mut() {
                        history.record(start.clone());
                    }
                    Some((core.state.clone(), start))
                }
                _ => None,
            }
        };

        tracing::debug!(notified = notification.is_some(), "transaction committed");
        if let Some((new, previous)) = notification {
            self.store.notify(&new, &previous);
        }
    }
}

impl<T: StoreState> Drop for TransactionGuard<'_, T> {
    fn drop(&mut self) {
        let Some(savepoint) = self.savepoint.take() else {
            return;
        };

        let mut core = self.store.inner.core.lock();
        core.state = savepoint.state;
        core.history = savepoint.history;
        core.pending_notification = savepoint.pending_notification;
        core.transaction_depth -= 1;
        if !core.in_transaction() {
            core.transaction_start = None;
            core.pending_notification = false;
        }
        tracing::debug!(depth = core.transaction_depth, "transaction rolled back");
    }
}

impl<T: StoreState> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: StoreState + Debug> Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.get_state())
            .field("config", &self.inner.config)
            .field("undo_depth", &self.undo_depth())
            .field("redo_depth", &self.redo_depth())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
