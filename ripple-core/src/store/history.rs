//! Bounded undo/redo stacks of state snapshots.

use std::collections::VecDeque;
use std::sync::Arc;

/// Undo and redo stacks for one store.
///
/// Snapshots are shared `Arc`s of states the store never mutates, so cloning
/// the whole history (as a transaction does) copies pointers only.
#[derive(Debug)]
pub(crate) struct History<T> {
    limit: usize,
    undo: VecDeque<Arc<T>>,
    redo: Vec<Arc<T>>,
}

impl<T> History<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            undo: VecDeque::new(),
            redo: Vec::new(),
        }
    }

    /// Record the state a new action replaced. Invalidates the redo branch.
    pub(crate) fn record(&mut self, previous: Arc<T>) {
        self.push_undo(previous);
        self.redo.clear();
    }

    /// Step back: returns the state to restore and remembers `current` for redo.
    pub(crate) fn undo(&mut self, current: Arc<T>) -> Option<Arc<T>> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    /// Step forward again after an undo.
    pub(crate) fn redo(&mut self, current: Arc<T>) -> Option<Arc<T>> {
        let next = self.redo.pop()?;
        self.push_undo(current);
        Some(next)
    }

    fn push_undo(&mut self, snapshot: Arc<T>) {
        self.undo.push_back(snapshot);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
            tracing::trace!(limit = self.limit, "evicted oldest undo entry");
        }
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub(crate) fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub(crate) fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

// Derived Clone would require T: Clone; only the Arcs are cloned.
impl<T> Clone for History<T> {
    fn clone(&self) -> Self {
        Self {
            limit: self.limit,
            undo: self.undo.clone(),
            redo: self.redo.clone(),
        }
    }
}
