//! # State Slot
//!
//! Exactly one task ever writes the current state: the state worker.
//! Lanes hand it reducers over a channel and wait for the committed result,
//! so two lanes can never interleave a read-modify-write.
//!
//! ```text
//! lane A ──┐                    ┌──▶ StateReader::snapshot()  (sync)
//! lane B ──┼──▶ Commit ──▶ worker ┤
//! lane C ──┘   (reducer,         └──▶ on_commit(new_state)     (state signal)
//!               reply)
//! ```
//!
//! Readers only ever get clones; the slot itself is never handed out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::{EngineError, panic_message};
use crate::core::reducer::Reducer;

/// Read-only handle to the current state.
///
/// View-models receive one so reducer streams can read the state lazily,
/// at the moment their work actually starts.
pub struct StateReader<S> {
    cell: Arc<RwLock<S>>,
}

impl<S> Clone for StateReader<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<S: Clone> StateReader<S> {
    /// The most recently committed state.
    pub fn snapshot(&self) -> S {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read a projection without cloning the whole state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.cell.read().unwrap_or_else(PoisonError::into_inner))
    }
}

struct Commit<S> {
    reducer: Reducer<S>,
    reply: oneshot::Sender<Result<S, EngineError>>,
}

/// Sending half of the state worker.
pub(crate) struct Committer<S> {
    tx: mpsc::UnboundedSender<Commit<S>>,
}

impl<S> Clone for Committer<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> Committer<S> {
    /// Apply `reducer` to the current state and return the new state.
    pub(crate) async fn commit(&self, reducer: Reducer<S>) -> Result<S, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Commit { reducer, reply })
            .map_err(|_| EngineError::StateWorkerStopped)?;
        rx.await.map_err(|_| EngineError::StateWorkerStopped)?
    }
}

/// Spawn the single writer. `on_commit` sees every new state in commit order.
pub(crate) fn spawn_state_worker<S, F>(
    initial: S,
    on_commit: F,
) -> (Committer<S>, StateReader<S>, JoinHandle<()>)
where
    S: Clone + Send + Sync + 'static,
    F: Fn(S) + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Commit<S>>();
    let reader = StateReader {
        cell: Arc::new(RwLock::new(initial)),
    };
    let cell = Arc::clone(&reader.cell);

    let handle = tokio::spawn(async move {
        let mut commits = 0u64;
        while let Some(Commit { reducer, reply }) = rx.recv().await {
            let current = cell.read().unwrap_or_else(PoisonError::into_inner).clone();
            let result = match catch_unwind(AssertUnwindSafe(|| reducer(current))) {
                Ok(next) => {
                    *cell.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
                    commits += 1;
                    on_commit(next.clone());
                    Ok(next)
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!("Reducer panicked, state left unchanged: {}", msg);
                    Err(EngineError::ReducerPanicked(msg))
                }
            };
            // The lane may have been cancelled while waiting; the commit stands.
            let _ = reply.send(result);
        }
        debug!("State worker stopped after {} commits", commits);
    });

    (Committer { tx }, reader, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reducer::reducer;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_commit_replaces_state_and_notifies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (committer, reader, _handle) =
            spawn_state_worker(1, move |s| sink.lock().unwrap().push(s));

        let next = committer.commit(reducer(|n: i32| n + 4)).await.unwrap();
        assert_eq!(next, 5);
        assert_eq!(reader.snapshot(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_concurrent_commits_never_lose_updates() {
        let (committer, reader, _handle) = spawn_state_worker(0u32, |_| {});
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let committer = committer.clone();
            tasks.spawn(async move { committer.commit(reducer(|n: u32| n + 1)).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(reader.snapshot(), 50);
    }

    #[tokio::test]
    async fn test_panicking_reducer_keeps_previous_state() {
        let (committer, reader, _handle) = spawn_state_worker(String::from("kept"), |_| {});
        let result = committer
            .commit(reducer(|_: String| panic!("bad reducer")))
            .await;
        assert_eq!(
            result,
            Err(EngineError::ReducerPanicked("bad reducer".to_string()))
        );
        assert_eq!(reader.snapshot(), "kept");

        // The worker survives and keeps serving commits.
        let next = committer
            .commit(reducer(|s: String| s + "!"))
            .await
            .unwrap();
        assert_eq!(next, "kept!");
    }

    #[tokio::test]
    async fn test_commit_after_worker_stops_fails() {
        let (committer, _reader, handle) = spawn_state_worker(0, |_| {});
        handle.abort();
        let _ = handle.await;
        let result = committer.commit(reducer(|n: i32| n)).await;
        assert_eq!(result, Err(EngineError::StateWorkerStopped));
    }
}
