//! statecore: a reactive state container.
//!
//! A [`ViewModel`](engine::ViewModel) maps actions to streams of reducers;
//! an [`Engine`](engine::Engine) schedules them on one of five lanes,
//! commits them through a single writer and publishes the results as
//! signals.

pub mod core;
pub mod engine;
pub mod login;
pub mod signal;

#[cfg(test)]
pub mod test_support;

pub use crate::core::action::{ActionAndError, ActionAndState, ActionError, BoxError, ExecuteMode};
pub use crate::core::config::EngineConfig;
pub use crate::core::reducer::{Reducer, ReducerStream};
pub use engine::{Dispatcher, Engine, LoadingGuard, Signals, StateReader, ViewModel};
