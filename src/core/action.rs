//! # Actions
//!
//! Everything a collaborator wants to happen becomes an action value.
//! User types a username? That's `SetUsername(..)`.
//! User taps "sign in"? That's `Login`.
//!
//! The engine never looks inside an action. It only needs to route it to a
//! lane and pair it with the state that resulted from running it:
//!
//! ```text
//! Action  →  lane  →  Reducer(s)  →  ActionAndState { action, state }
//! ```
//!
//! This module holds those pairings plus the `ExecuteMode` that picks the lane.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// The error a reducer stream fails with.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A published error. Shared so a single failure can reach every subscriber.
pub type ActionError = Arc<dyn Error + Send + Sync + 'static>;

/// An action paired with the state it produced.
///
/// On the on-next signal `state` is the result of one reducer application.
/// On the on-complete signal it is the engine's current state at the moment
/// the action finished.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionAndState<A, S> {
    pub action: A,
    pub state: S,
}

impl<A, S> ActionAndState<A, S> {
    pub fn new(action: A, state: S) -> Self {
        Self { action, state }
    }
}

/// An error paired with the action that caused it.
/// `action` is `None` for framework-level errors that belong to no action.
#[derive(Clone)]
pub struct ActionAndError<A> {
    pub action: Option<A>,
    pub error: ActionError,
}

impl<A: fmt::Debug> fmt::Debug for ActionAndError<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionAndError")
            .field("action", &self.action)
            .field("error", &self.error.to_string())
            .finish()
    }
}

/// Selects the lane an action is routed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExecuteMode {
    /// Runs concurrently; results arrive in whatever order the work finishes.
    UnorderedParallel,
    /// Runs concurrently; results are released in submission order.
    #[default]
    OrderedParallel,
    /// Waits for every earlier ordered action to finish before starting.
    DeferredParallel,
    /// One at a time. A failure skips the rest of its batch.
    Sequential,
    /// A new action cancels the one still running on this lane.
    LatestOnly,
}

impl ExecuteMode {
    pub fn label(&self) -> &'static str {
        match self {
            ExecuteMode::UnorderedParallel => "unordered-parallel",
            ExecuteMode::OrderedParallel => "ordered-parallel",
            ExecuteMode::DeferredParallel => "deferred-parallel",
            ExecuteMode::Sequential => "sequential",
            ExecuteMode::LatestOnly => "latest-only",
        }
    }
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
