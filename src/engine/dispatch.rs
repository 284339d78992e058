//! # Dispatch
//!
//! The single fan-in point for everything consumers can observe. Lanes and
//! the state worker never touch a public signal directly; they send an
//! [`Emission`] here, and this task publishes it. That gives every consumer
//! one serialized order of events regardless of how many lanes are busy.
//!
//! Two pieces of bookkeeping also live here:
//!
//! - **Loading ledger**: which spinner-eligible work is running right now.
//!   Published as a [`LoadingSnapshot`] so derived loading signals can be
//!   scoped to any action predicate.
//! - **In-flight count**: actions submitted but not yet settled. Backs
//!   `Engine::until_idle()`.
//!
//! Both are driven by RAII guards, so every exit path of an action
//! (completion, failure, cancellation, being skipped) releases them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};
use tokio::sync::{mpsc, watch};

use super::signals::{LoadingSnapshot, Signals};
use crate::core::action::{ActionAndError, ActionAndState};

pub(crate) enum Emission<A, S> {
    State(S),
    Next(ActionAndState<A, S>),
    Complete(ActionAndState<A, S>),
    Error(ActionAndError<A>),
    LoadingStarted { id: u64, action: Option<A> },
    LoadingFinished { id: u64 },
    Settled { id: u64 },
}

pub(crate) type EmissionSender<A, S> = mpsc::UnboundedSender<Emission<A, S>>;

/// Hands out tickets and loading guards that report back to the dispatch task.
pub(crate) struct Tracker<A, S> {
    tx: EmissionSender<A, S>,
    next_id: Arc<AtomicU64>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl<A, S> Clone for Tracker<A, S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_id: Arc::clone(&self.next_id),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<A, S> Tracker<A, S> {
    pub(crate) fn emit(&self, emission: Emission<A, S>) {
        if self.tx.send(emission).is_err() {
            debug!("Dispatch task gone, emission dropped");
        }
    }

    pub(crate) fn in_flight_sender(&self) -> Arc<watch::Sender<usize>> {
        Arc::clone(&self.in_flight)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a submitted action. Dropping the ticket settles it.
    pub(crate) fn ticket(&self) -> Ticket<A, S> {
        self.in_flight.send_modify(|n| *n += 1);
        Ticket {
            id: self.next_id(),
            tx: self.tx.clone(),
        }
    }

    /// Start counting toward the loading signal until the guard drops.
    pub(crate) fn loading(&self, action: Option<A>) -> LoadingGuard<A, S> {
        let id = self.next_id();
        self.emit(Emission::LoadingStarted { id, action });
        LoadingGuard {
            id,
            tx: self.tx.clone(),
        }
    }
}

/// One submitted action's claim on the in-flight count.
pub(crate) struct Ticket<A, S> {
    id: u64,
    tx: EmissionSender<A, S>,
}

impl<A, S> Ticket<A, S> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl<A, S> Drop for Ticket<A, S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Emission::Settled { id: self.id });
    }
}

/// Holds the loading signal up until dropped.
///
/// Returned by [`Engine::begin_loading`](super::Engine::begin_loading) for
/// work the engine doesn't run itself.
pub struct LoadingGuard<A, S> {
    id: u64,
    tx: EmissionSender<A, S>,
}

impl<A, S> Drop for LoadingGuard<A, S> {
    fn drop(&mut self) {
        let _ = self.tx.send(Emission::LoadingFinished { id: self.id });
    }
}

/// Publishes emissions until every sender is gone.
pub(crate) async fn run_dispatch<A, S>(
    mut rx: mpsc::UnboundedReceiver<Emission<A, S>>,
    signals: Signals<A, S>,
    in_flight: Arc<watch::Sender<usize>>,
) where
    A: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    let mut running: Vec<(u64, Option<A>)> = Vec::new();

    while let Some(emission) = rx.recv().await {
        match emission {
            Emission::State(state) => signals.state.emit(state),
            Emission::Next(record) => signals.on_next.emit(record),
            Emission::Complete(record) => signals.on_complete.emit(record),
            Emission::Error(record) => signals.errors.emit(record),
            Emission::LoadingStarted { id, action } => {
                running.push((id, action));
                signals.loading.emit(LoadingSnapshot::new(running.clone()));
            }
            Emission::LoadingFinished { id } => {
                let before = running.len();
                running.retain(|(running_id, _)| *running_id != id);
                if running.len() == before {
                    warn!("Loading finished for unknown entry #{}", id);
                    continue;
                }
                signals.loading.emit(LoadingSnapshot::new(running.clone()));
            }
            Emission::Settled { id } => {
                debug!("Action #{} settled", id);
                in_flight.send_modify(|n| *n = n.saturating_sub(1));
            }
        }
    }

    debug!("Dispatch stopped");
}

/// Build the emission channel, its tracker and the in-flight watch.
pub(crate) fn channel<A, S>() -> (
    Tracker<A, S>,
    mpsc::UnboundedReceiver<Emission<A, S>>,
    watch::Receiver<usize>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (in_flight, in_flight_rx) = watch::channel(0usize);
    let tracker = Tracker {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        in_flight: Arc::new(in_flight),
    };
    (tracker, rx, in_flight_rx)
}
