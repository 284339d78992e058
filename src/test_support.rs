//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};

use crate::core::action::{ActionError, BoxError, ExecuteMode};
use crate::core::reducer::{self, ReducerStream};
use crate::engine::{StateReader, ViewModel};

/// Everything already buffered on `signal`, without waiting.
pub fn drain<St: Stream + Unpin>(signal: &mut St) -> Vec<St::Item> {
    std::iter::from_fn(|| signal.next().now_or_never().flatten()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FooAction {
    /// Add to the score after `delay_ms`.
    Add { amount: i32, delay_ms: u64 },
    /// Fail after `delay_ms`.
    Fail { delay_ms: u64 },
    /// Produce no reducer at all.
    Noop,
    /// Panic while building the reducer stream.
    PanicInReducers,
    /// Produce a reducer that panics when applied.
    PanicInReducer,
}

/// A score counter whose actions sleep before reducing.
pub struct FooViewModel {
    pub mode: Option<ExecuteMode>,
    pub spinner: bool,
    /// Keep every error off the error signals.
    pub suppress_errors: bool,
}

impl Default for FooViewModel {
    fn default() -> Self {
        Self {
            mode: None,
            spinner: true,
            suppress_errors: false,
        }
    }
}

impl ViewModel for FooViewModel {
    type Action = FooAction;
    type State = i32;

    fn initial_state(&self) -> i32 {
        0
    }

    fn reducers(&self, action: &FooAction, _state: &StateReader<i32>) -> Option<ReducerStream<i32>> {
        match *action {
            FooAction::Add { amount, delay_ms } => Some(reducer::from_future(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<_, BoxError>(reducer::reducer(move |score: i32| score + amount))
            })),
            FooAction::Fail { delay_ms } => Some(reducer::from_future(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(BoxError::from("foo failed"))
            })),
            FooAction::Noop => None,
            FooAction::PanicInReducers => panic!("boom in reducers"),
            FooAction::PanicInReducer => Some(reducer::just(|_: i32| -> i32 {
                panic!("boom in reducer")
            })),
        }
    }

    fn show_spinner(&self, _action: &FooAction) -> bool {
        self.spinner
    }

    fn execute_mode(&self, _action: &FooAction) -> Option<ExecuteMode> {
        self.mode
    }

    fn handle_error(&self, _action: Option<&FooAction>, _error: &ActionError) -> bool {
        self.suppress_errors
    }
}
