//! Reactive Runtime
//!
//! The runtime connects observables and computed values. Each node keeps the
//! set of computed values that read it during their last evaluation, and
//! change propagation walks those edges.
//!
//! # How It Works
//!
//! 1. While a computed value evaluates, every reactive read registers with
//!    the active [`ReactiveContext`](super::ReactiveContext).
//!
//! 2. After the evaluation, the computed value registers itself as a
//!    dependent of each node it read, and drops its previous registrations.
//!
//! 3. When an observable changes, the runtime:
//!    a. Marks direct dependents `Dirty` and everything further downstream
//!       `MaybeDirty`, without running any computation
//!    b. Collects the invalidated computed values that have listeners
//!    c. Refreshes those, in discovery order, once the whole downstream
//!       graph has been invalidated
//!
//! Because invalidation completes before anything recomputes, a refresh
//! always pulls fresh inputs and never sees a half-updated diamond.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::subscriber::SubscriberId;
use crate::error::Result;

/// Freshness of a computed value's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// An upstream computed value might have changed. Need to check.
    MaybeDirty,

    /// A direct dependency changed. The value must be recomputed.
    Dirty,
}

impl MemoState {
    /// Whether the cache may not reflect the dependencies.
    pub fn is_stale(self) -> bool {
        self != MemoState::Clean
    }
}

/// A node that can be read inside a tracked evaluation.
pub(crate) trait Source: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Incremented every time the node's value changes.
    fn version(&self) -> u64;

    fn add_dependent(&self, id: SubscriberId, dependent: Weak<dyn Dependent>);

    fn remove_dependent(&self, id: SubscriberId);

    /// Bring the node's value up to date without tracking the read.
    fn update(&self) -> Result<()>;
}

/// A node that is notified when something it read changes.
pub(crate) trait Dependent: Send + Sync {
    /// Raise staleness to at least `level`. Observed nodes that just left
    /// the clean state are pushed onto `scheduled`.
    fn invalidate(&self, level: MemoState, scheduled: &mut Vec<Arc<dyn Dependent>>);

    /// Recompute now if still stale.
    fn refresh(&self);
}

/// The dependents of one node, keyed by their subscriber id.
#[derive(Default)]
pub(crate) struct DependentSet {
    entries: Mutex<IndexMap<SubscriberId, Weak<dyn Dependent>>>,
}

impl DependentSet {
    pub(crate) fn insert(&self, id: SubscriberId, dependent: Weak<dyn Dependent>) {
        self.entries.lock().insert(id, dependent);
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        self.entries.lock().shift_remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Invalidate every live dependent. Dead entries are pruned.
    pub(crate) fn invalidate_all(&self, level: MemoState, scheduled: &mut Vec<Arc<dyn Dependent>>) {
        let live: Vec<Arc<dyn Dependent>> = {
            let mut entries = self.entries.lock();
            entries.retain(|_, weak| weak.strong_count() > 0);
            entries.values().filter_map(Weak::upgrade).collect()
        };

        for dependent in live {
            dependent.invalidate(level, scheduled);
        }
    }
}

/// Propagate a change of a source node through its dependents.
///
/// `notify` runs after invalidation and before observed dependents are
/// refreshed, so listeners that read downstream values pull fresh results.
pub(crate) fn propagate_change(dependents: &DependentSet, notify: impl FnOnce()) {
    let mut scheduled = Vec::new();
    dependents.invalidate_all(MemoState::Dirty, &mut scheduled);

    notify();

    for dependent in scheduled {
        dependent.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct MockDependent {
        state: Mutex<MemoState>,
        observed: bool,
        refreshed: AtomicI32,
        downstream: DependentSet,
        this: Weak<MockDependent>,
    }

    impl MockDependent {
        fn new(observed: bool) -> Arc<Self> {
            Arc::new_cyclic(|this| Self {
                state: Mutex::new(MemoState::Clean),
                observed,
                refreshed: AtomicI32::new(0),
                downstream: DependentSet::default(),
                this: this.clone(),
            })
        }

        fn as_weak(self: &Arc<Self>) -> Weak<dyn Dependent> {
            let weak: Weak<MockDependent> = Arc::downgrade(self);
            weak
        }
    }

    impl Dependent for MockDependent {
        fn invalidate(&self, level: MemoState, scheduled: &mut Vec<Arc<dyn Dependent>>) {
            let was_clean = {
                let mut state = self.state.lock();
                let was_clean = *state == MemoState::Clean;
                *state = (*state).max(level);
                was_clean
            };
            if !was_clean {
                return;
            }
            if self.observed {
                if let Some(this) = self.this.upgrade() {
                    scheduled.push(this);
                }
            }
            self.downstream.invalidate_all(MemoState::MaybeDirty, scheduled);
        }

        fn refresh(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = MemoState::Clean;
        }
    }

    #[test]
    fn direct_dependents_become_dirty_transitive_maybe_dirty() {
        let direct = MockDependent::new(false);
        let transitive = MockDependent::new(false);
        direct.downstream.insert(SubscriberId::new(), transitive.as_weak());

        let root = DependentSet::default();
        root.insert(SubscriberId::new(), direct.as_weak());

        propagate_change(&root, || {});

        assert_eq!(*direct.state.lock(), MemoState::Dirty);
        assert_eq!(*transitive.state.lock(), MemoState::MaybeDirty);
        assert_eq!(direct.refreshed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn only_observed_dependents_are_refreshed_after_notify() {
        let observed = MockDependent::new(true);
        let lazy = MockDependent::new(false);

        let root = DependentSet::default();
        root.insert(SubscriberId::new(), observed.as_weak());
        root.insert(SubscriberId::new(), lazy.as_weak());

        let notified_before_refresh = AtomicI32::new(-1);
        propagate_change(&root, || {
            notified_before_refresh.store(observed.refreshed.load(Ordering::SeqCst), Ordering::SeqCst);
        });

        assert_eq!(notified_before_refresh.load(Ordering::SeqCst), 0);
        assert_eq!(observed.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.refreshed.load(Ordering::SeqCst), 0);
        assert_eq!(*lazy.state.lock(), MemoState::Dirty);
    }

    #[test]
    fn dropped_dependents_are_pruned() {
        let root = DependentSet::default();
        {
            let gone = MockDependent::new(false);
            root.insert(SubscriberId::new(), gone.as_weak());
            assert_eq!(root.len(), 1);
        }

        propagate_change(&root, || {});
        assert_eq!(root.len(), 0);
    }

    #[test]
    fn memo_state_orders_by_staleness() {
        assert!(MemoState::Clean < MemoState::MaybeDirty);
        assert!(MemoState::MaybeDirty < MemoState::Dirty);
        assert!(!MemoState::Clean.is_stale());
        assert!(MemoState::MaybeDirty.is_stale());
    }
}
