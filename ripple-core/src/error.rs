//! Error types for reactive evaluation.
//!
//! Only derived values can fail: reading a `Computed` that is already on the
//! evaluation stack is a dependency cycle, and fallible computations may
//! report their own failure. Store transactions never wrap errors; they hand
//! the callback's error back untouched.

use thiserror::Error;

/// Errors raised while evaluating derived values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computed value was read while it was still being evaluated.
    ///
    /// `chain` lists the participants from the first re-entered value to the
    /// read that closed the loop, e.g. `["total", "tax", "total"]`.
    #[error("circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Best-effort participant chain, outermost first.
        chain: Vec<String>,
    },

    /// A fallible computation reported a failure of its own.
    #[error("computation failed: {message}")]
    Computation {
        /// Message supplied by the computation.
        message: String,
    },
}

impl ReactiveError {
    /// Build a [`ReactiveError::Computation`] from any displayable message.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }

    /// The participant chain of a cycle, if this error is one.
    pub fn cycle_chain(&self) -> Option<&[String]> {
        match self {
            Self::CircularDependency { chain } => Some(chain),
            Self::Computation { .. } => None,
        }
    }
}

/// Result alias used throughout the reactive module.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
