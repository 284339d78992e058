//! # Signal Derivation
//!
//! The public outputs of an engine, derived from the raw subjects the
//! dispatch task publishes into.
//!
//! | Signal          | Replays latest | Source                                |
//! |-----------------|----------------|---------------------------------------|
//! | `state`         | yes            | every committed state                 |
//! | `loading`       | yes            | loading ledger, projected to a bool   |
//! | `on_next`       | no             | one record per applied reducer        |
//! | `on_complete`   | no             | one record per completed action       |
//! | `errors`        | no             | unsuppressed failures                 |
//!
//! `Signals` is cheap to clone, so bindings can own one and resubscribe on
//! every connection.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;

use crate::core::action::{ActionAndError, ActionAndState, ActionError};
use crate::signal::{Signal, Subject, Subscription, distinct, skip_none};

/// Which spinner-eligible work is running at one instant.
///
/// Entries without an action come from manual loading guards.
pub struct LoadingSnapshot<A> {
    running: Arc<Vec<(u64, Option<A>)>>,
}

impl<A> Clone for LoadingSnapshot<A> {
    fn clone(&self) -> Self {
        Self {
            running: Arc::clone(&self.running),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for LoadingSnapshot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.running.iter().map(|(_, action)| action))
            .finish()
    }
}

impl<A> LoadingSnapshot<A> {
    pub(crate) fn new(running: Vec<(u64, Option<A>)>) -> Self {
        Self {
            running: Arc::new(running),
        }
    }

    pub fn is_loading(&self) -> bool {
        !self.running.is_empty()
    }

    /// Whether any running action matches `predicate`.
    pub fn any(&self, predicate: impl Fn(&A) -> bool) -> bool {
        self.running
            .iter()
            .any(|(_, action)| action.as_ref().is_some_and(&predicate))
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Every observable output of one engine.
pub struct Signals<A, S> {
    pub(crate) state: Subject<S>,
    pub(crate) on_next: Subject<ActionAndState<A, S>>,
    pub(crate) on_complete: Subject<ActionAndState<A, S>>,
    pub(crate) errors: Subject<ActionAndError<A>>,
    pub(crate) loading: Subject<LoadingSnapshot<A>>,
}

impl<A, S> Clone for Signals<A, S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            on_next: self.on_next.clone(),
            on_complete: self.on_complete.clone(),
            errors: self.errors.clone(),
            loading: self.loading.clone(),
        }
    }
}

impl<A, S> Signals<A, S>
where
    A: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(initial: S) -> Self {
        Self {
            state: Subject::replay(initial),
            on_next: Subject::publish(),
            on_complete: Subject::publish(),
            errors: Subject::publish(),
            loading: Subject::replay(LoadingSnapshot::new(Vec::new())),
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Every committed state, starting with the latest one.
    pub fn state(&self) -> Subscription<S> {
        self.state.subscribe()
    }

    /// A projection of the state, with consecutive duplicates dropped.
    pub fn state_map<R, F>(&self, project: F) -> Signal<R>
    where
        R: Clone + PartialEq + Send + 'static,
        F: Fn(&S) -> R + Send + 'static,
    {
        distinct(self.state.subscribe().map(move |state| project(&state)))
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// `true` while any spinner-eligible work runs. Replays, de-duplicated.
    pub fn loading(&self) -> Signal<bool> {
        distinct(self.loading.subscribe().map(|snapshot| snapshot.is_loading()))
    }

    /// `true` while a spinner-eligible action matching `predicate` runs.
    pub fn loading_for<F>(&self, predicate: F) -> Signal<bool>
    where
        F: Fn(&A) -> bool + Send + 'static,
    {
        distinct(
            self.loading
                .subscribe()
                .map(move |snapshot| snapshot.any(&predicate)),
        )
    }

    /// Raw ledger snapshots, one per loading change.
    pub fn loading_snapshots(&self) -> Subscription<LoadingSnapshot<A>> {
        self.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
            .latest()
            .is_some_and(|snapshot| snapshot.is_loading())
    }

    // ========================================================================
    // Action lifecycle
    // ========================================================================

    /// One record per applied reducer.
    pub fn on_next(&self) -> Subscription<ActionAndState<A, S>> {
        self.on_next.subscribe()
    }

    /// One record per completed action, carrying the state at completion.
    pub fn on_complete(&self) -> Subscription<ActionAndState<A, S>> {
        self.on_complete.subscribe()
    }

    pub fn on_next_matching<F>(&self, predicate: F) -> Signal<A>
    where
        F: Fn(&A) -> bool + Send + 'static,
    {
        matching(self.on_next.subscribe(), predicate)
    }

    pub fn on_complete_matching<F>(&self, predicate: F) -> Signal<A>
    where
        F: Fn(&A) -> bool + Send + 'static,
    {
        matching(self.on_complete.subscribe(), predicate)
    }

    /// Project the state of matching on-next records, skipping `None`.
    pub fn on_next_map<R, P, F>(&self, predicate: P, project: F) -> Signal<R>
    where
        R: Send + 'static,
        P: Fn(&A) -> bool + Send + 'static,
        F: Fn(&S) -> Option<R> + Send + 'static,
    {
        projected(self.on_next.subscribe(), predicate, project)
    }

    /// Project the state of matching on-complete records, skipping `None`.
    pub fn on_complete_map<R, P, F>(&self, predicate: P, project: F) -> Signal<R>
    where
        R: Send + 'static,
        P: Fn(&A) -> bool + Send + 'static,
        F: Fn(&S) -> Option<R> + Send + 'static,
    {
        projected(self.on_complete.subscribe(), predicate, project)
    }

    // ========================================================================
    // Errors
    // ========================================================================

    pub fn errors(&self) -> Signal<ActionError> {
        self.errors.subscribe().map(|record| record.error).boxed()
    }

    pub fn action_errors(&self) -> Subscription<ActionAndError<A>> {
        self.errors.subscribe()
    }

    /// Errors raised by actions matching `predicate`. Framework errors never match.
    pub fn action_errors_matching<F>(&self, predicate: F) -> Signal<ActionError>
    where
        F: Fn(&A) -> bool + Send + 'static,
    {
        skip_none(self.errors.subscribe(), move |record: ActionAndError<A>| {
            record
                .action
                .as_ref()
                .is_some_and(&predicate)
                .then_some(record.error)
        })
    }
}

fn matching<A, S, F>(records: Subscription<ActionAndState<A, S>>, predicate: F) -> Signal<A>
where
    A: Send + 'static,
    S: Send + 'static,
    F: Fn(&A) -> bool + Send + 'static,
{
    skip_none(records, move |record: ActionAndState<A, S>| {
        predicate(&record.action).then_some(record.action)
    })
}

fn projected<A, S, R, P, F>(
    records: Subscription<ActionAndState<A, S>>,
    predicate: P,
    project: F,
) -> Signal<R>
where
    A: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
    P: Fn(&A) -> bool + Send + 'static,
    F: Fn(&S) -> Option<R> + Send + 'static,
{
    skip_none(records, move |record: ActionAndState<A, S>| {
        if predicate(&record.action) {
            project(&record.state)
        } else {
            None
        }
    })
}
