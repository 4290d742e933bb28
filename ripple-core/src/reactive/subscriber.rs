//! Subscriber identities and listener registries.
//!
//! Every reactive node and every registered listener gets a [`SubscriberId`].
//! Listeners live in a [`ListenerSet`], which hands back a [`Subscription`]
//! the caller uses to detach the listener again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for a subscriber.
///
/// Observables, computed values and individual listeners all draw from the
/// same counter, so an id never collides across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability to remove a previously registered listener.
///
/// Dropping a `Subscription` leaves the listener registered: disposal is the
/// consumer's call, made explicitly through [`Subscription::unsubscribe`].
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: SubscriberId,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, remove: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            remove: Some(Box::new(remove)),
        }
    }

    /// The id of the listener this subscription controls.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the listener. A no-op if its owner is already gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Ordered set of listeners that tolerates mutation while it is notifying.
///
/// Notification works on a snapshot, so a listener added mid-notification
/// is not called for the in-flight round. Membership is re-checked before
/// each call; a listener removed mid-notification is skipped.
pub struct ListenerSet<F: ?Sized> {
    entries: Arc<Mutex<IndexMap<SubscriberId, Arc<F>>>>,
}

impl<F> ListenerSet<F>
where
    F: ?Sized + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// Register a listener and return the capability that removes it.
    pub fn insert(&self, listener: Arc<F>) -> Subscription {
        let id = SubscriberId::new();
        self.entries.lock().insert(id, listener);

        let entries = Arc::downgrade(&self.entries);
        Subscription::new(id, move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().shift_remove(&id);
            }
        })
    }

    /// Call every listener registered at the time of the call.
    pub fn for_each(&self, mut call: impl FnMut(&F)) {
        let snapshot: Vec<(SubscriberId, Arc<F>)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            if !self.contains(id) {
                continue;
            }
            call(&listener);
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<F> Default for ListenerSet<F>
where
    F: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
