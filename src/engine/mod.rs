//! # Engine
//!
//! Owns one view-model and everything needed to run its actions:
//!
//! - a state worker, the only writer of the current state
//! - five execution lanes, one per [`ExecuteMode`] (deferred actions get a
//!   second ordered lane of their own)
//! - a dispatch task that serializes every public emission into [`Signals`]
//!
//! ```text
//! execute(action) ──▶ route by mode ──▶ lane ──▶ reducers ──▶ state worker
//!                                        │                        │
//!                                        └──── Emission ──▶ dispatch ──▶ Signals
//! ```
//!
//! All of it runs on tokio tasks spawned in [`Engine::new`], so an engine
//! must be created inside a runtime. Dropping the engine stops every task.

mod dispatch;
pub mod error;
mod lanes;
pub mod signals;
pub mod state;

use std::fmt::Debug;
use std::sync::Arc;

use futures::Stream;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

pub use dispatch::LoadingGuard;
pub use error::EngineError;
pub use signals::{LoadingSnapshot, Signals};
pub use state::StateReader;

use crate::core::action::{ActionError, BoxError, ExecuteMode};
use crate::core::config::EngineConfig;
use crate::core::reducer::ReducerStream;
use crate::signal::ActionBinding;
use dispatch::Emission;
use lanes::{LaneContext, OrderedSubmission, Submission};

/// The business logic an [`Engine`] runs.
///
/// Implementors only describe *what* an action does, as a stream of
/// reducers. Scheduling, state commits and signal publication belong to the
/// engine.
pub trait ViewModel: Send + Sync + 'static {
    type Action: Clone + Debug + Send + Sync + 'static;
    type State: Clone + Debug + Send + Sync + 'static;

    fn initial_state(&self) -> Self::State;

    /// Reducers for `action`. `None` means the action changes nothing but
    /// still completes.
    ///
    /// Called when the action starts on its lane. Work inside the stream is
    /// lazy, so reading `state` from within it sees the state at that moment.
    fn reducers(
        &self,
        action: &Self::Action,
        state: &StateReader<Self::State>,
    ) -> Option<ReducerStream<Self::State>>;

    /// Whether `action` holds the loading signal while it runs.
    fn show_spinner(&self, _action: &Self::Action) -> bool {
        false
    }

    /// Lane for `action`. `None` uses the engine's configured default.
    fn execute_mode(&self, _action: &Self::Action) -> Option<ExecuteMode> {
        None
    }

    /// Return `true` to keep `error` off the error signals.
    fn handle_error(&self, _action: Option<&Self::Action>, _error: &ActionError) -> bool {
        false
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct LaneSenders<A, S> {
    unordered: mpsc::UnboundedSender<Submission<A, S>>,
    ordered: mpsc::UnboundedSender<OrderedSubmission<A, S>>,
    sequential: mpsc::UnboundedSender<Vec<Submission<A, S>>>,
    latest: mpsc::UnboundedSender<Submission<A, S>>,
}

impl<A, S> Clone for LaneSenders<A, S> {
    fn clone(&self) -> Self {
        Self {
            unordered: self.unordered.clone(),
            ordered: self.ordered.clone(),
            sequential: self.sequential.clone(),
            latest: self.latest.clone(),
        }
    }
}

/// A cloneable handle that submits actions to an engine's lanes.
///
/// Handy for collaborators that must trigger actions without owning the
/// engine. Submissions made after the engine is dropped are discarded.
pub struct Dispatcher<V: ViewModel> {
    ctx: Arc<LaneContext<V>>,
    lanes: LaneSenders<V::Action, V::State>,
    config: EngineConfig,
}

impl<V: ViewModel> Clone for Dispatcher<V> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            lanes: self.lanes.clone(),
            config: self.config.clone(),
        }
    }
}

impl<V: ViewModel> Dispatcher<V> {
    /// Run `action` on the lane its view-model picks.
    pub fn execute(&self, action: V::Action) {
        let mode = self
            .ctx
            .vm
            .execute_mode(&action)
            .unwrap_or(self.config.default_mode);
        self.execute_with(action, mode);
    }

    /// Run `action` on an explicit lane, ignoring the view-model's choice.
    pub fn execute_with(&self, action: V::Action, mode: ExecuteMode) {
        let submission = self.submit(action, mode);
        if let Err(e) = self.route(submission, mode) {
            warn!("{}: action dropped", e);
        }
    }

    /// Run `actions` one after another. The first failure skips the rest of
    /// this batch; later batches are unaffected.
    pub fn execute_in_sequence<I>(&self, actions: I)
    where
        I: IntoIterator<Item = V::Action>,
    {
        let batch: Vec<_> = actions
            .into_iter()
            .map(|action| self.submit(action, ExecuteMode::Sequential))
            .collect();
        if batch.is_empty() {
            return;
        }
        if self.lanes.sequential.send(batch).is_err() {
            warn!("{}: sequential batch dropped", EngineError::Shutdown);
        }
    }

    pub fn execute_in_parallel(&self, action: V::Action) {
        self.execute_with(action, ExecuteMode::OrderedParallel);
    }

    pub fn execute_in_parallel_with_defer(&self, action: V::Action) {
        self.execute_with(action, ExecuteMode::DeferredParallel);
    }

    pub fn execute_in_parallel_without_order(&self, action: V::Action) {
        self.execute_with(action, ExecuteMode::UnorderedParallel);
    }

    pub fn execute_with_switch(&self, action: V::Action) {
        self.execute_with(action, ExecuteMode::LatestOnly);
    }

    fn submit(&self, action: V::Action, mode: ExecuteMode) -> Submission<V::Action, V::State> {
        let ticket = self.ctx.tracker.ticket();
        if self.config.trace_actions {
            info!("Action #{} → {}: {:?}", ticket.id(), mode, action);
        } else {
            debug!("Action #{} → {}: {:?}", ticket.id(), mode, action);
        }
        Submission { action, ticket }
    }

    fn route(
        &self,
        submission: Submission<V::Action, V::State>,
        mode: ExecuteMode,
    ) -> Result<(), EngineError> {
        let sent = match mode {
            ExecuteMode::UnorderedParallel => self.lanes.unordered.send(submission).is_ok(),
            ExecuteMode::OrderedParallel => self
                .lanes
                .ordered
                .send(OrderedSubmission {
                    submission,
                    deferred: false,
                })
                .is_ok(),
            ExecuteMode::DeferredParallel => self
                .lanes
                .ordered
                .send(OrderedSubmission {
                    submission,
                    deferred: true,
                })
                .is_ok(),
            ExecuteMode::Sequential => self.lanes.sequential.send(vec![submission]).is_ok(),
            ExecuteMode::LatestOnly => self.lanes.latest.send(submission).is_ok(),
        };
        if sent { Ok(()) } else { Err(EngineError::Shutdown) }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs a [`ViewModel`]'s actions and publishes the results.
pub struct Engine<V: ViewModel> {
    dispatcher: Dispatcher<V>,
    signals: Signals<V::Action, V::State>,
    in_flight: watch::Receiver<usize>,
    tasks: Vec<AbortHandle>,
}

impl<V: ViewModel> Engine<V> {
    pub fn new(vm: V) -> Self {
        Self::with_config(vm, EngineConfig::default())
    }

    pub fn with_config(vm: V, config: EngineConfig) -> Self {
        let vm = Arc::new(vm);
        let initial = vm.initial_state();
        let signals = Signals::new(initial.clone());

        let (tracker, emissions, in_flight) = dispatch::channel();
        let dispatch_task = tokio::spawn(dispatch::run_dispatch(
            emissions,
            signals.clone(),
            tracker.in_flight_sender(),
        ));

        let state_tracker = tracker.clone();
        let (committer, reader, state_task) = state::spawn_state_worker(initial, move |state| {
            state_tracker.emit(Emission::State(state));
        });

        let ctx = Arc::new(LaneContext {
            vm,
            committer,
            reader,
            tracker,
        });

        let (unordered, unordered_rx) = mpsc::unbounded_channel();
        let (ordered, ordered_rx) = mpsc::unbounded_channel();
        let (deferred, deferred_rx) = mpsc::unbounded_channel();
        let (sequential, sequential_rx) = mpsc::unbounded_channel();
        let (latest, latest_rx) = mpsc::unbounded_channel();

        let (ordered_intake, ordered_drain) =
            lanes::spawn_ordered(Arc::clone(&ctx), ordered_rx, Some(deferred));
        let (deferred_intake, deferred_drain) =
            lanes::spawn_ordered(Arc::clone(&ctx), deferred_rx, None);
        let handles: [JoinHandle<()>; 9] = [
            lanes::spawn_unordered(Arc::clone(&ctx), unordered_rx),
            ordered_intake,
            ordered_drain,
            deferred_intake,
            deferred_drain,
            lanes::spawn_sequential(Arc::clone(&ctx), sequential_rx),
            lanes::spawn_latest(Arc::clone(&ctx), latest_rx),
            state_task,
            dispatch_task,
        ];

        info!(
            "Engine started (default lane: {}, tracing: {})",
            config.default_mode, config.trace_actions
        );

        Self {
            dispatcher: Dispatcher {
                ctx,
                lanes: LaneSenders {
                    unordered,
                    ordered,
                    sequential,
                    latest,
                },
                config,
            },
            signals,
            in_flight,
            tasks: handles.iter().map(JoinHandle::abort_handle).collect(),
        }
    }

    // ========================================================================
    // Submission
    // ========================================================================

    pub fn execute(&self, action: V::Action) {
        self.dispatcher.execute(action);
    }

    pub fn execute_with(&self, action: V::Action, mode: ExecuteMode) {
        self.dispatcher.execute_with(action, mode);
    }

    pub fn execute_in_sequence<I>(&self, actions: I)
    where
        I: IntoIterator<Item = V::Action>,
    {
        self.dispatcher.execute_in_sequence(actions);
    }

    pub fn execute_in_parallel(&self, action: V::Action) {
        self.dispatcher.execute_in_parallel(action);
    }

    pub fn execute_in_parallel_with_defer(&self, action: V::Action) {
        self.dispatcher.execute_in_parallel_with_defer(action);
    }

    pub fn execute_in_parallel_without_order(&self, action: V::Action) {
        self.dispatcher.execute_in_parallel_without_order(action);
    }

    pub fn execute_with_switch(&self, action: V::Action) {
        self.dispatcher.execute_with_switch(action);
    }

    /// A cloneable submission handle for this engine.
    pub fn dispatcher(&self) -> Dispatcher<V> {
        self.dispatcher.clone()
    }

    /// Execute every action `actions` yields until the stream ends or the
    /// returned binding is dropped.
    pub fn bind_actions<St>(&self, actions: St) -> ActionBinding
    where
        St: Stream<Item = V::Action> + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        ActionBinding::spawn(actions, move |action| dispatcher.execute(action))
    }

    // ========================================================================
    // State & signals
    // ========================================================================

    pub fn current_state(&self) -> V::State {
        self.dispatcher.ctx.reader.snapshot()
    }

    pub fn state_reader(&self) -> StateReader<V::State> {
        self.dispatcher.ctx.reader.clone()
    }

    pub fn signals(&self) -> &Signals<V::Action, V::State> {
        &self.signals
    }

    pub fn view_model(&self) -> &V {
        &self.dispatcher.ctx.vm
    }

    pub fn config(&self) -> &EngineConfig {
        &self.dispatcher.config
    }

    pub fn is_loading(&self) -> bool {
        self.signals.is_loading()
    }

    /// Hold the loading signal for work the engine doesn't run itself.
    pub fn begin_loading(&self) -> LoadingGuard<V::Action, V::State> {
        self.dispatcher.ctx.tracker.loading(None)
    }

    /// Publish an error that isn't tied to any action.
    pub fn report_error(&self, error: impl Into<BoxError>) {
        self.dispatcher.ctx.fail(None, error.into());
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Actions submitted but not yet completed, failed, cancelled or skipped.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until every submitted action has settled.
    pub async fn until_idle(&self) {
        let mut in_flight = self.in_flight.clone();
        if in_flight.wait_for(|n| *n == 0).await.is_err() {
            debug!("Dispatch stopped while waiting for idle");
        }
    }
}

impl<V: ViewModel> Drop for Engine<V> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("Engine stopped with {} action(s) in flight", self.in_flight());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FooAction, FooViewModel, drain};
    use futures::stream;
    use std::time::Duration;

    fn add(amount: i32, delay_ms: u64) -> FooAction {
        FooAction::Add { amount, delay_ms }
    }

    fn amounts(records: Vec<crate::core::action::ActionAndState<FooAction, i32>>) -> Vec<i32> {
        records
            .into_iter()
            .filter_map(|record| match record.action {
                FooAction::Add { amount, .. } => Some(amount),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_reducer_stream_still_completes() {
        let engine = Engine::new(FooViewModel::default());
        let mut next = engine.signals().on_next();
        let mut complete = engine.signals().on_complete();

        engine.execute(FooAction::Noop);
        engine.until_idle().await;

        assert_eq!(next.drain().len(), 1);
        let completed = complete.drain();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].state, 0);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_lane_completes_in_submission_order() {
        let engine = Engine::new(FooViewModel::default());
        let mut complete = engine.signals().on_complete();

        engine.execute_in_parallel(add(1, 300));
        engine.execute_in_parallel(add(2, 100));
        engine.execute_in_parallel(add(3, 0));
        engine.until_idle().await;

        assert_eq!(amounts(complete.drain()), vec![1, 2, 3]);
        assert_eq!(engine.current_state(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unordered_lane_completes_in_finish_order() {
        let engine = Engine::new(FooViewModel::default());
        let mut complete = engine.signals().on_complete();

        engine.execute_in_parallel_without_order(add(1, 300));
        engine.execute_in_parallel_without_order(add(2, 100));
        engine.execute_in_parallel_without_order(add(3, 0));
        engine.until_idle().await;

        assert_eq!(amounts(complete.drain()), vec![3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_action_waits_for_earlier_work() {
        let engine = Engine::new(FooViewModel::default());
        let started = tokio::time::Instant::now();

        engine.execute_in_parallel(add(1, 100));
        engine.execute_in_parallel_with_defer(add(2, 100));
        engine.until_idle().await;

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(engine.current_state(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_only_cancels_previous_action() {
        let engine = Engine::new(FooViewModel::default());
        let mut complete = engine.signals().on_complete();
        let mut loading = engine.signals().loading();

        engine.execute_with_switch(add(1, 100));
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.execute_with_switch(add(10, 100));
        engine.until_idle().await;

        assert_eq!(amounts(complete.drain()), vec![10]);
        assert_eq!(engine.current_state(), 10);
        assert_eq!(drain(&mut loading), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_failure_skips_only_its_batch() {
        let engine = Engine::new(FooViewModel::default());
        let mut errors = engine.signals().action_errors();

        engine.execute_in_sequence([add(1, 10), FooAction::Fail { delay_ms: 10 }, add(100, 0)]);
        engine.execute_in_sequence([add(3, 0)]);
        engine.until_idle().await;

        assert_eq!(engine.current_state(), 4);
        let errors = errors.drain();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, Some(FooAction::Fail { delay_ms: 10 }));
        assert_eq!(errors[0].error.to_string(), "foo failed");
    }

    #[tokio::test]
    async fn test_handled_errors_are_not_published() {
        let vm = FooViewModel {
            suppress_errors: true,
            ..Default::default()
        };
        let engine = Engine::new(vm);
        let mut errors = engine.signals().errors();

        engine.execute(FooAction::Fail { delay_ms: 0 });
        engine.report_error("detached failure");
        engine.until_idle().await;

        assert!(drain(&mut errors).is_empty());
    }

    #[tokio::test]
    async fn test_report_error_carries_no_action() {
        let engine = Engine::new(FooViewModel::default());
        let mut errors = engine.signals().action_errors();
        let mut fail_errors = engine.signals().action_errors_matching(|_| true);

        engine.report_error("observer blew up");
        // Errors carry no ticket; a trailing action flushes dispatch.
        engine.execute(FooAction::Noop);
        engine.until_idle().await;

        let errors = errors.drain();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].action.is_none());
        assert!(drain(&mut fail_errors).is_empty());
    }

    #[tokio::test]
    async fn test_begin_loading_holds_signal_until_dropped() {
        let vm = FooViewModel {
            spinner: false,
            ..Default::default()
        };
        let engine = Engine::new(vm);
        let mut loading = engine.signals().loading_snapshots();

        let guard = engine.begin_loading();
        drop(guard);
        engine.execute(FooAction::Noop);
        engine.until_idle().await;

        let seen: Vec<bool> = loading.drain().iter().map(|s| s.is_loading()).collect();
        assert_eq!(seen, vec![false, true, false]);
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn test_bind_actions_forwards_every_item() {
        let engine = Engine::new(FooViewModel::default());
        let binding = engine.bind_actions(stream::iter(vec![add(1, 0), add(2, 0)]));

        while binding.is_active() {
            tokio::task::yield_now().await;
        }
        engine.until_idle().await;

        assert_eq!(engine.current_state(), 3);
    }

    #[tokio::test]
    async fn test_dispatcher_outliving_engine_drops_actions() {
        let engine = Engine::new(FooViewModel::default());
        let dispatcher = engine.dispatcher();
        let reader = engine.state_reader();
        let mut states = engine.signals().state();
        let mut complete = engine.signals().on_complete();
        assert_eq!(states.drain(), vec![0]);

        drop(engine);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        dispatcher.execute(add(1, 0));
        dispatcher.execute_in_sequence([add(2, 0)]);
        dispatcher.execute_with_switch(add(3, 0));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(reader.snapshot(), 0);
        assert!(states.drain().is_empty());
        assert!(complete.drain().is_empty());
    }

    #[tokio::test]
    async fn test_panic_building_reducers_fails_only_that_action() {
        let engine = Engine::new(FooViewModel::default());
        let mut errors = engine.signals().action_errors();

        engine.execute_in_sequence([add(1, 0), FooAction::PanicInReducers, add(100, 0)]);
        engine.execute_in_sequence([add(2, 0)]);
        engine.until_idle().await;

        let errors = errors.drain();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, Some(FooAction::PanicInReducers));
        assert_eq!(errors[0].error.to_string(), "reducer panicked: boom in reducers");
        assert_eq!(engine.current_state(), 3);
        assert_eq!(engine.in_flight(), 0);
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn test_panicking_reducer_skips_rest_of_sequential_batch() {
        let engine = Engine::new(FooViewModel::default());
        let mut errors = engine.signals().action_errors();
        let mut complete = engine.signals().on_complete();

        engine.execute_in_sequence([add(2, 0), FooAction::PanicInReducer, add(100, 0)]);
        engine.execute_in_sequence([add(10, 0)]);
        engine.until_idle().await;

        let errors = errors.drain();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, Some(FooAction::PanicInReducer));
        assert_eq!(errors[0].error.to_string(), "reducer panicked: boom in reducer");
        assert_eq!(amounts(complete.drain()), vec![2, 10]);
        assert_eq!(engine.current_state(), 12);
        assert_eq!(engine.in_flight(), 0);
    }
}
