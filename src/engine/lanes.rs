//! # Execution Lanes
//!
//! Each lane turns submitted actions into reducer applications with its own
//! concurrency contract. All of them end in the same routine,
//! [`LaneContext::execute_and_combine`], which commits reducers through the
//! state worker and reports on-next / on-complete / error emissions.
//!
//! ```text
//!                 ┌────────────────────────┐
//!  unordered ───▶ │ spawn per action       │ ──┐
//!                 └────────────────────────┘   │
//!                 ┌────────┐   ┌───────────┐   │
//!  ordered ─────▶ │ intake │──▶│ drain     │ ──┤
//!                 │(eager) │   │(in order) │   │      ┌──────────────┐
//!                 └────────┘   └─────┬─────┘   ├────▶ │ state worker │
//!                          deferred  │         │      └──────────────┘
//!                 ┌────────┐   ┌─────▼─────┐   │
//!  (re-entry) ──▶ │ intake │──▶│ drain     │ ──┤
//!                 └────────┘   └───────────┘   │
//!                 ┌────────────────────────┐   │
//!  sequential ──▶ │ one at a time, batches │ ──┤
//!                 └────────────────────────┘   │
//!                 ┌────────────────────────┐   │
//!  latest-only ─▶ │ abort previous, spawn  │ ──┘
//!                 └────────────────────────┘
//! ```
//!
//! Guards created when an action starts (loading, in-flight ticket) are
//! moved into whatever future runs it, so they are released on completion,
//! failure, panic and cancellation alike.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt, stream};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use super::ViewModel;
use super::dispatch::{Emission, LoadingGuard, Ticket, Tracker};
use super::error::{EngineError, panic_message};
use super::state::{Committer, StateReader};
use crate::core::action::{ActionAndError, ActionAndState, ActionError, BoxError};
use crate::core::reducer::{self, Reducer, ReducerStream};

type Item<S> = Result<Reducer<S>, BoxError>;

/// A routed action and its claim on the in-flight count.
pub(crate) struct Submission<A, S> {
    pub(crate) action: A,
    pub(crate) ticket: Ticket<A, S>,
}

/// Input of the ordered lanes. `deferred` actions wait for their turn
/// before they even start.
pub(crate) struct OrderedSubmission<A, S> {
    pub(crate) submission: Submission<A, S>,
    pub(crate) deferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
}

/// Guards held for exactly as long as one action executes.
/// Fields drop in order: loading is released before the action settles.
struct Running<A, S> {
    _spinner: Option<LoadingGuard<A, S>>,
    _ticket: Ticket<A, S>,
}

/// What every lane needs to run an action.
pub(crate) struct LaneContext<V: ViewModel> {
    pub(crate) vm: Arc<V>,
    pub(crate) committer: Committer<V::State>,
    pub(crate) reader: StateReader<V::State>,
    pub(crate) tracker: Tracker<V::Action, V::State>,
}

impl<V: ViewModel> LaneContext<V> {
    fn start(
        &self,
        submission: Submission<V::Action, V::State>,
    ) -> (V::Action, Running<V::Action, V::State>) {
        let Submission { action, ticket } = submission;
        debug!("Action #{} started: {:?}", ticket.id(), action);
        let spinner = self
            .vm
            .show_spinner(&action)
            .then(|| self.tracker.loading(Some(action.clone())));
        (
            action,
            Running {
                _spinner: spinner,
                _ticket: ticket,
            },
        )
    }

    /// The view-model's reducers for `action`. `None` behaves like an empty stream.
    fn reducer_stream(&self, action: &V::Action) -> ReducerStream<V::State> {
        match catch_unwind(AssertUnwindSafe(|| self.vm.reducers(action, &self.reader))) {
            Ok(Some(reducers)) => reducers,
            Ok(None) => reducer::none(),
            Err(payload) => reducer::fail(EngineError::ReducerPanicked(panic_message(
                payload.as_ref(),
            ))),
        }
    }

    /// Apply every reducer of `action` in order, then mark it complete.
    ///
    /// An empty stream still commits one identity reducer, so the action is
    /// visible on both on-next and on-complete. A failing stream stops at the
    /// failure and never completes.
    pub(crate) async fn execute_and_combine<St>(&self, action: &V::Action, reducers: St) -> Outcome
    where
        St: Stream<Item = Item<V::State>> + Send,
    {
        match AssertUnwindSafe(self.apply(action, reducers))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let err = EngineError::ReducerPanicked(panic_message(payload.as_ref()));
                self.fail(Some(action), Box::new(err));
                Outcome::Failed
            }
        }
    }

    async fn apply<St>(&self, action: &V::Action, reducers: St) -> Outcome
    where
        St: Stream<Item = Item<V::State>> + Send,
    {
        let mut reducers = std::pin::pin!(reducers);
        let mut applied = 0usize;

        while let Some(item) = reducers.next().await {
            let reducer = match item {
                Ok(reducer) => reducer,
                Err(e) => {
                    self.fail(Some(action), e);
                    return Outcome::Failed;
                }
            };
            if !self.commit(action, reducer).await {
                return Outcome::Failed;
            }
            applied += 1;
        }

        if applied == 0 && !self.commit(action, reducer::identity()).await {
            return Outcome::Failed;
        }

        self.tracker.emit(Emission::Complete(ActionAndState::new(
            action.clone(),
            self.reader.snapshot(),
        )));
        debug!("Action completed after {} reducer(s): {:?}", applied, action);
        Outcome::Completed
    }

    async fn commit(&self, action: &V::Action, reducer: Reducer<V::State>) -> bool {
        match self.committer.commit(reducer).await {
            Ok(state) => {
                self.tracker
                    .emit(Emission::Next(ActionAndState::new(action.clone(), state)));
                true
            }
            Err(e) => {
                self.fail(Some(action), Box::new(e));
                false
            }
        }
    }

    /// Route a failure through the view-model's handler, then the error signal.
    pub(crate) fn fail(&self, action: Option<&V::Action>, error: BoxError) {
        let error: ActionError = Arc::from(error);
        if self.vm.handle_error(action, &error) {
            debug!("Error handled by view-model ({:?}): {}", action, error);
            return;
        }
        warn!("Action {:?} failed: {}", action, error);
        self.tracker.emit(Emission::Error(ActionAndError {
            action: action.cloned(),
            error,
        }));
    }
}

// ============================================================================
// Unordered parallel
// ============================================================================

/// Every action runs in its own task; results land in completion order.
pub(crate) fn spawn_unordered<V: ViewModel>(
    ctx: Arc<LaneContext<V>>,
    mut rx: mpsc::UnboundedReceiver<Submission<V::Action, V::State>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(submission) = next else { break };
                    let ctx = Arc::clone(&ctx);
                    running.spawn(async move {
                        let (action, guards) = ctx.start(submission);
                        let reducers = ctx.reducer_stream(&action);
                        ctx.execute_and_combine(&action, reducers).await;
                        drop(guards);
                    });
                }
                Some(_) = running.join_next(), if !running.is_empty() => {}
            }
        }
        while running.join_next().await.is_some() {}
    })
}

// ============================================================================
// Ordered parallel (and the deferred lane, which is another instance of it)
// ============================================================================

enum Pending<A, S> {
    /// Reducers are being produced eagerly into `buffer`.
    Run {
        action: A,
        guards: Running<A, S>,
        buffer: mpsc::UnboundedReceiver<Item<S>>,
    },
    /// Forward to the deferred lane once everything ahead has finished.
    Defer(Submission<A, S>),
}

/// Eagerly start every action, but apply and emit strictly in submission order.
///
/// With `defer_to` set, deferred submissions hold their place in the queue
/// and are re-submitted there once they reach the head.
pub(crate) fn spawn_ordered<V: ViewModel>(
    ctx: Arc<LaneContext<V>>,
    mut rx: mpsc::UnboundedReceiver<OrderedSubmission<V::Action, V::State>>,
    defer_to: Option<mpsc::UnboundedSender<OrderedSubmission<V::Action, V::State>>>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<Pending<V::Action, V::State>>();
    let can_defer = defer_to.is_some();

    let intake_ctx = Arc::clone(&ctx);
    let intake = tokio::spawn(async move {
        let ctx = intake_ctx;
        let mut producers = JoinSet::new();
        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(OrderedSubmission { submission, deferred }) = next else { break };
                    let pending = if deferred && can_defer {
                        debug!("Action #{} deferred: {:?}", submission.ticket.id(), submission.action);
                        Pending::Defer(submission)
                    } else {
                        let (action, guards) = ctx.start(submission);
                        let (buffer_tx, buffer) = mpsc::unbounded_channel();
                        producers.spawn(produce(ctx.reducer_stream(&action), buffer_tx));
                        Pending::Run { action, guards, buffer }
                    };
                    if pending_tx.send(pending).is_err() {
                        break;
                    }
                }
                Some(_) = producers.join_next(), if !producers.is_empty() => {}
            }
        }
        while producers.join_next().await.is_some() {}
    });

    let drain = tokio::spawn(async move {
        while let Some(pending) = pending_rx.recv().await {
            match pending {
                Pending::Run {
                    action,
                    guards,
                    buffer,
                } => {
                    ctx.execute_and_combine(&action, buffered(buffer)).await;
                    drop(guards);
                }
                Pending::Defer(submission) => {
                    let Some(defer_to) = defer_to.as_ref() else {
                        continue;
                    };
                    let resubmitted = OrderedSubmission {
                        submission,
                        deferred: false,
                    };
                    if defer_to.send(resubmitted).is_err() {
                        warn!("Deferred lane closed, action dropped");
                    }
                }
            }
        }
    });

    (intake, drain)
}

/// Pump a reducer stream into a buffer, stopping after the first error.
async fn produce<S>(mut reducers: ReducerStream<S>, buffer: mpsc::UnboundedSender<Item<S>>) {
    let pumped = AssertUnwindSafe(async {
        while let Some(item) = reducers.next().await {
            let failed = item.is_err();
            if buffer.send(item).is_err() || failed {
                break;
            }
        }
    })
    .catch_unwind()
    .await;

    if let Err(payload) = pumped {
        let err = EngineError::ReducerPanicked(panic_message(payload.as_ref()));
        let _ = buffer.send(Err(Box::new(err)));
    }
}

fn buffered<S>(mut buffer: mpsc::UnboundedReceiver<Item<S>>) -> impl Stream<Item = Item<S>> + Send
where
    S: 'static,
{
    stream::poll_fn(move |cx| buffer.poll_recv(cx))
}

// ============================================================================
// Sequential
// ============================================================================

/// One action at a time. A failure skips the rest of its batch only.
pub(crate) fn spawn_sequential<V: ViewModel>(
    ctx: Arc<LaneContext<V>>,
    mut rx: mpsc::UnboundedReceiver<Vec<Submission<V::Action, V::State>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let mut batch = batch.into_iter();
            for submission in batch.by_ref() {
                let (action, guards) = ctx.start(submission);
                let reducers = ctx.reducer_stream(&action);
                let outcome = ctx.execute_and_combine(&action, reducers).await;
                drop(guards);
                if outcome == Outcome::Failed {
                    break;
                }
            }
            for skipped in batch {
                debug!(
                    "Action #{} skipped after batch failure: {:?}",
                    skipped.ticket.id(),
                    skipped.action
                );
            }
        }
    })
}

// ============================================================================
// Latest only
// ============================================================================

/// Each new action cancels the one still running on this lane.
pub(crate) fn spawn_latest<V: ViewModel>(
    ctx: Arc<LaneContext<V>>,
    mut rx: mpsc::UnboundedReceiver<Submission<V::Action, V::State>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut running = JoinSet::new();
        let mut current: Option<(u64, AbortHandle)> = None;
        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(submission) = next else { break };
                    if let Some((id, handle)) = current.take()
                        && !handle.is_finished()
                    {
                        handle.abort();
                        debug!("Action #{} cancelled: superseded", id);
                    }
                    let id = submission.ticket.id();
                    // Start here, not in the task, so the new spinner is up
                    // before the cancelled one is released.
                    let (action, guards) = ctx.start(submission);
                    let ctx = Arc::clone(&ctx);
                    let handle = running.spawn(async move {
                        let reducers = ctx.reducer_stream(&action);
                        ctx.execute_and_combine(&action, reducers).await;
                        drop(guards);
                    });
                    current = Some((id, handle));
                }
                Some(_) = running.join_next(), if !running.is_empty() => {}
            }
        }
        while running.join_next().await.is_some() {}
    })
}
