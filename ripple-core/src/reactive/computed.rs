//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at construction. The first `get()` or `subscribe()` runs
//!    the computation inside a fresh reactive context and caches the result.
//!
//! 2. Every observable or computed read during that run becomes a
//!    dependency. The previous dependency registrations are dropped before
//!    the run, so the dependency sets always match the most recent run.
//!
//! 3. When a direct dependency changes, the computed value is marked
//!    `Dirty`; values further downstream are marked `MaybeDirty`.
//!
//! 4. On the next access, a `MaybeDirty` value first brings its computed
//!    dependencies up to date and recomputes only if one of them actually
//!    changed. A `Dirty` value always recomputes.
//!
//! 5. If nobody listens, that is all: recomputation waits for the next
//!    `get()`. If listeners are registered, the value is refreshed as soon as
//!    the change has finished propagating, and listeners hear about it only
//!    when the new result differs from the old one.
//!
//! # Cycles
//!
//! A computed value that is read while it is still being evaluated on the
//! same thread reports [`ReactiveError::CircularDependency`] instead of
//! recursing. The check runs before any recursive evaluation.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::{self, EvaluationGuard, ReactiveContext};
use super::observable::{ChangeListener, EqualsFn};
use super::runtime::{Dependent, DependentSet, MemoState, Source};
use super::subscriber::{ListenerSet, Subscription};
use super::SubscriberId;
use crate::error::{ReactiveError, Result};

type Computation<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Computed, Observable};
///
/// let price = Observable::new(20);
/// let quantity = Observable::new(3);
///
/// let total = Computed::new({
///     let (price, quantity) = (price.clone(), quantity.clone());
///     move || price.get() * quantity.get()
/// });
///
/// assert_eq!(total.get().unwrap(), 60);
/// quantity.set(4);
/// assert_eq!(total.get().unwrap(), 80);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: SubscriberId,
    label: RwLock<Option<String>>,
    compute: Computation<T>,
    equals: EqualsFn<T>,
    cache: Mutex<Cache<T>>,
    /// Bumped whenever a recomputation yields a value unequal to the cache.
    version: AtomicU64,
    listeners: ListenerSet<ChangeListener<T>>,
    dependents: DependentSet,
    this: Weak<ComputedInner<T>>,
}

struct Cache<T> {
    value: Option<T>,
    state: MemoState,
    observable_deps: SmallVec<[Arc<dyn Source>; 4]>,
    /// Computed dependencies with the version seen by the last run.
    computed_deps: SmallVec<[(Arc<dyn Source>, u64); 4]>,
    recompute_count: u64,
    /// Bumped by every invalidation, including ones that land mid-run.
    generation: u64,
    /// The last run returned an error.
    failed: bool,
    /// Dependents read a failed run and are still clean; the next
    /// invalidation must reach them even though this node is not clean.
    passthrough: bool,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a computed value from an infallible computation.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_equals(move || Ok(compute()), |a: &T, b: &T| a == b)
    }

    /// Create a computed value from a computation that may fail.
    ///
    /// Reads of other computed values inside it can use `?`.
    pub fn try_new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::with_equals(compute, |a: &T, b: &T| a == b)
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed value with a custom equality for change detection.
    pub fn with_equals<F, E>(compute: F, equals: E) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| ComputedInner {
            id: SubscriberId::new(),
            label: RwLock::new(None),
            compute: Box::new(compute),
            equals: Arc::new(equals),
            cache: Mutex::new(Cache {
                value: None,
                state: MemoState::Dirty,
                observable_deps: SmallVec::new(),
                computed_deps: SmallVec::new(),
                recompute_count: 0,
                generation: 0,
                failed: false,
                passthrough: false,
            }),
            version: AtomicU64::new(0),
            listeners: ListenerSet::new(),
            dependents: DependentSet::default(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Attach a name used in diagnostics and cycle reports.
    pub fn labeled(self, label: impl Into<String>) -> Self {
        *self.inner.label.write() = Some(label.into());
        self
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn label(&self) -> String {
        self.inner.display_label()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside another computation, this also registers the read as a
    /// dependency of the evaluating value.
    pub fn get(&self) -> Result<T> {
        self.inner.check_cycle()?;
        if ReactiveContext::is_active() {
            let source: Arc<dyn Source> = self.inner.clone();
            ReactiveContext::track_computed(source);
        }
        self.inner.read()
    }

    /// Register a listener called with `(new, old)` whenever a recomputation
    /// produces a different value.
    ///
    /// Brings the cache up to date first, so the value is computed at least
    /// once and later changes are pushed.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.inner.read()?;
        Ok(self.inner.listeners.insert(Arc::new(listener)))
    }

    /// Mark the value as stale by hand.
    ///
    /// Observed values recompute immediately, others on the next `get()`.
    pub fn mark_stale(&self) {
        let mut scheduled = Vec::new();
        self.inner.invalidate(MemoState::Dirty, &mut scheduled);
        for dependent in scheduled {
            dependent.refresh();
        }
    }

    /// Ids of the observables read by the last successful run, in read order.
    pub fn observable_dependencies(&self) -> Vec<SubscriberId> {
        let cache = self.inner.cache.lock();
        cache.observable_deps.iter().map(|dep| dep.id()).collect()
    }

    /// Ids of the computed values read by the last successful run.
    pub fn computed_dependencies(&self) -> Vec<SubscriberId> {
        let cache = self.inner.cache.lock();
        cache.computed_deps.iter().map(|(dep, _)| dep.id()).collect()
    }

    /// How many times the computation has completed.
    pub fn recompute_count(&self) -> u64 {
        self.inner.cache.lock().recompute_count
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        self.inner.cache.lock().state
    }

    pub fn is_stale(&self) -> bool {
        self.state().is_stale()
    }

    /// Check if the computed value has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.cache.lock().value.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of computed values that read this one in their last run.
    pub fn dependent_count(&self) -> usize {
        self.inner.dependents.len()
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn display_label(&self) -> String {
        self.label
            .read()
            .clone()
            .unwrap_or_else(|| format!("Computed{}", self.id))
    }

    fn check_cycle(&self) -> Result<()> {
        if !context::is_evaluating(self.id) {
            return Ok(());
        }
        let chain = context::cycle_chain(self.id, &self.display_label());
        tracing::debug!(chain = ?chain, "circular dependency detected");
        Err(ReactiveError::CircularDependency { chain })
    }

    /// Return the cached value, refreshing it first if it may be stale.
    fn read(&self) -> Result<T> {
        self.check_cycle()?;

        let computed_deps = {
            let cache = self.cache.lock();
            match (&cache.value, cache.state) {
                (Some(value), MemoState::Clean) => return Ok(value.clone()),
                (Some(_), MemoState::MaybeDirty) => Some(cache.computed_deps.clone()),
                _ => None,
            }
        };

        if let Some(deps) = computed_deps {
            if !self.inputs_changed(&deps) {
                let mut cache = self.cache.lock();
                if cache.state == MemoState::MaybeDirty {
                    cache.state = MemoState::Clean;
                }
                if let (Some(value), MemoState::Clean) = (&cache.value, cache.state) {
                    return Ok(value.clone());
                }
            }
        }

        self.recompute()
    }

    /// Bring computed dependencies up to date and report whether any of
    /// them moved past the version the last run saw. A dependency that
    /// fails counts as changed so the own computation sees the error.
    fn inputs_changed(&self, deps: &[(Arc<dyn Source>, u64)]) -> bool {
        deps.iter()
            .any(|(dep, seen)| dep.update().is_err() || dep.version() != *seen)
    }

    fn recompute(&self) -> Result<T> {
        let label = self.display_label();
        tracing::trace!(computed = %label, "recomputing");
        let evaluating = EvaluationGuard::enter(self.id, label);

        let (old_observables, old_computeds, generation) = {
            let mut cache = self.cache.lock();
            (
                std::mem::take(&mut cache.observable_deps),
                std::mem::take(&mut cache.computed_deps),
                cache.generation,
            )
        };
        for dep in old_observables
            .iter()
            .chain(old_computeds.iter().map(|(dep, _)| dep))
        {
            dep.remove_dependent(self.id);
        }

        let ctx = ReactiveContext::enter(self.id);
        let result = (self.compute)();
        let tracked = ctx.finish();
        drop(evaluating);

        // Reads are registered whether or not the run succeeded, so a failed
        // value still hears about the change that may fix it.
        let weak: Weak<dyn Dependent> = self.this.clone();
        let observable_deps: SmallVec<[Arc<dyn Source>; 4]> = tracked
            .observables
            .into_values()
            .inspect(|dep| dep.add_dependent(self.id, weak.clone()))
            .collect();
        let computed_deps: SmallVec<[(Arc<dyn Source>, u64); 4]> = tracked
            .computeds
            .into_values()
            .map(|dep| {
                dep.add_dependent(self.id, weak.clone());
                let version = dep.version();
                (dep, version)
            })
            .collect();

        let (value, previous, recovered) = {
            let mut cache = self.cache.lock();
            cache.observable_deps = observable_deps;
            cache.computed_deps = computed_deps;
            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    cache.state = MemoState::Dirty;
                    cache.failed = true;
                    cache.passthrough = true;
                    return Err(err);
                }
            };
            cache.state = if cache.generation == generation {
                MemoState::Clean
            } else {
                MemoState::Dirty
            };
            cache.recompute_count += 1;
            let recovered = std::mem::take(&mut cache.failed);
            cache.passthrough = false;
            let previous = cache.value.replace(value.clone());
            (value, previous, recovered)
        };

        let changed = previous
            .as_ref()
            .map_or(true, |old| !(self.equals)(old, &value));
        if changed || recovered {
            self.version.fetch_add(1, Ordering::AcqRel);
        }

        // Listeners run only now, after the evaluation mark is gone, so a
        // listener that reads this value is not mistaken for a cycle.
        if let (Some(old), true) = (previous, changed) {
            self.listeners.for_each(|listener| listener(&value, &old));
        }

        Ok(value)
    }
}

impl<T> Source for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn add_dependent(&self, id: SubscriberId, dependent: Weak<dyn Dependent>) {
        self.dependents.insert(id, dependent);
    }

    fn remove_dependent(&self, id: SubscriberId) {
        self.dependents.remove(id);
    }

    fn update(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}

impl<T> Dependent for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self, level: MemoState, scheduled: &mut Vec<Arc<dyn Dependent>>) {
        let (was_clean, has_value) = {
            let mut cache = self.cache.lock();
            cache.generation += 1;
            let was_clean =
                cache.state == MemoState::Clean || std::mem::take(&mut cache.passthrough);
            cache.state = cache.state.max(level);
            (was_clean, cache.value.is_some())
        };
        if !was_clean {
            return;
        }

        if has_value && !self.listeners.is_empty() && !context::is_evaluating(self.id) {
            if let Some(this) = self.this.upgrade() {
                scheduled.push(this);
            }
        }
        self.dependents.invalidate_all(MemoState::MaybeDirty, scheduled);
    }

    fn refresh(&self) {
        if let Err(err) = self.read() {
            tracing::warn!(
                computed = %self.display_label(),
                error = %err,
                "eager recomputation failed; value stays stale"
            );
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("recompute_count", &self.recompute_count())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
