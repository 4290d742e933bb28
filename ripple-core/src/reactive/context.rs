//! Reactive Context
//!
//! The reactive context records which reactive values are read while a
//! computed value evaluates. This enables automatic dependency tracking:
//! when an observable or computed is read, it registers itself with the
//! innermost active frame.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a context pushes a fresh
//! frame and the guard pops it again, so nested evaluations (a computed that
//! reads a computed that reads an observable) each collect only their own
//! direct reads.
//!
//! A second thread-local stack holds the computed values currently being
//! evaluated. Re-entering one of them is a dependency cycle.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use super::runtime::Source;
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
    static EVALUATING: RefCell<Vec<(SubscriberId, String)>> = const { RefCell::new(Vec::new()) };
}

/// Reads collected during one tracked evaluation, in first-read order.
#[derive(Default)]
pub struct TrackedDependencies {
    pub(crate) observables: IndexMap<SubscriberId, Arc<dyn Source>>,
    pub(crate) computeds: IndexMap<SubscriberId, Arc<dyn Source>>,
}

impl TrackedDependencies {
    pub fn observable_ids(&self) -> Vec<SubscriberId> {
        self.observables.keys().copied().collect()
    }

    pub fn computed_ids(&self) -> Vec<SubscriberId> {
        self.computeds.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.observables.is_empty() && self.computeds.is_empty()
    }
}

struct ContextEntry {
    /// `None` for an untracked frame.
    subscriber_id: Option<SubscriberId>,
    dependencies: TrackedDependencies,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, reactive reads register with it.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: TrackedDependencies::default(),
            });
        });

        Self {
            subscriber_id,
            popped: false,
        }
    }

    /// Leave the context and hand back everything read inside it.
    pub fn finish(mut self) -> TrackedDependencies {
        self.popped = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.subscriber_id, self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id, entry.subscriber_id
            );
        }
        popped
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber_id.is_some())
        })
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Record a read of an observable.
    pub(crate) fn track_observable(source: Arc<dyn Source>) {
        Self::track(source, false);
    }

    /// Record a read of a computed value.
    pub(crate) fn track_computed(source: Arc<dyn Source>) {
        Self::track(source, true);
    }

    fn track(source: Arc<dyn Source>, computed: bool) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(entry) = stack.last_mut() else {
                return;
            };
            if entry.subscriber_id.is_none() {
                return;
            }
            let deps = &mut entry.dependencies;
            let slot = if computed {
                &mut deps.computeds
            } else {
                &mut deps.observables
            };
            slot.entry(source.id()).or_insert(source);
        });
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.popped {
            self.popped = true;
            self.pop();
        }
    }
}

/// Run `f` without registering any reads with the enclosing context.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::push(None);
    f()
}

/// Marks a computed value as mid-evaluation for as long as it lives.
pub(crate) struct EvaluationGuard {
    id: SubscriberId,
}

impl EvaluationGuard {
    pub(crate) fn enter(id: SubscriberId, label: String) -> Self {
        EVALUATING.with(|stack| stack.borrow_mut().push((id, label)));
        Self { id }
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        EVALUATING.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped.map(|(id, _)| id), Some(self.id));
        });
    }
}

/// Whether the given computed value is being evaluated on this thread.
pub(crate) fn is_evaluating(id: SubscriberId) -> bool {
    EVALUATING.with(|stack| stack.borrow().iter().any(|(entry, _)| *entry == id))
}

/// Participants of the cycle closed by re-entering `id`.
pub(crate) fn cycle_chain(id: SubscriberId, label: &str) -> Vec<String> {
    EVALUATING.with(|stack| {
        let stack = stack.borrow();
        let start = stack.iter().position(|(entry, _)| *entry == id).unwrap_or(0);
        stack[start..]
            .iter()
            .map(|(_, name)| name.clone())
            .chain(std::iter::once(label.to_string()))
            .collect()
    })
}
