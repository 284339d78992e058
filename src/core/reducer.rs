//! # Reducers
//!
//! A reducer is a pure `State -> State` function. View-models don't hand the
//! engine a new state directly; they hand it a *stream* of reducers, produced
//! asynchronously (possibly after I/O), and the engine applies each one to
//! whatever the current state is at that moment.
//!
//! ```text
//! Action ──▶ ReducerStream ──▶ Reducer ──▶ Reducer ──▶ (end)
//!                                 │           │
//!                                 ▼           ▼
//!                             on-next     on-next      on-complete
//! ```
//!
//! Zero reducers means "no state change", but the action still completes.
//! The helpers below cover the shapes view-models actually need.

use std::future::Future;

use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::action::BoxError;

/// A pure state transition.
pub type Reducer<S> = Box<dyn FnOnce(S) -> S + Send + 'static>;

/// The asynchronous sequence of reducers produced for one action.
pub type ReducerStream<S> = BoxStream<'static, Result<Reducer<S>, BoxError>>;

/// Boxes a closure as a [`Reducer`].
pub fn reducer<S, F>(f: F) -> Reducer<S>
where
    F: FnOnce(S) -> S + Send + 'static,
{
    Box::new(f)
}

/// The reducer that leaves state untouched.
pub fn identity<S: 'static>() -> Reducer<S> {
    Box::new(|state| state)
}

/// A stream of exactly one reducer, available immediately.
pub fn just<S, F>(f: F) -> ReducerStream<S>
where
    S: 'static,
    F: FnOnce(S) -> S + Send + 'static,
{
    stream::once(async move { Ok(reducer(f)) }).boxed()
}

/// A stream of one reducer produced by an async computation that may fail.
pub fn from_future<S, Fut>(fut: Fut) -> ReducerStream<S>
where
    S: 'static,
    Fut: Future<Output = Result<Reducer<S>, BoxError>> + Send + 'static,
{
    stream::once(fut).boxed()
}

/// Several reducers applied one after another.
pub fn sequence<S: 'static>(reducers: Vec<Reducer<S>>) -> ReducerStream<S> {
    stream::iter(reducers.into_iter().map(Ok)).boxed()
}

/// A stream that produces no reducer at all.
pub fn none<S: 'static>() -> ReducerStream<S> {
    stream::empty().boxed()
}

/// A stream that fails straight away.
pub fn fail<S: 'static>(error: impl Into<BoxError>) -> ReducerStream<S> {
    let error = error.into();
    stream::once(async move { Err(error) }).boxed()
}
