//! # Signals
//!
//! Push-based, multicast value streams. The engine publishes into a
//! [`Subject`]; every consumer holds its own [`Subscription`].
//!
//! ```text
//!   emit(v) ──▶ Subject ──┬──▶ Subscription (buffered, unbounded)
//!                         ├──▶ Subscription
//!                         └──▶ Subscription
//! ```
//!
//! A replaying subject remembers its latest value and hands it to every new
//! subscriber first, so a late subscriber never misses "what is it now".
//! A plain subject only delivers what is emitted after subscription.
//!
//! Emission happens under the subject's lock, so every subscriber observes
//! the same order even when `emit` is called from several tasks.

pub mod binding;

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use futures::StreamExt;
use futures::future;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

pub use binding::{ActionBinding, Binding, ObserverHandle};

/// A derived, type-erased signal.
pub type Signal<T> = BoxStream<'static, T>;

struct SubjectInner<T> {
    latest: Option<T>,
    replay: bool,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

/// A hot multicast source with optional replay of the latest value.
pub struct Subject<T> {
    inner: Arc<Mutex<SubjectInner<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// A subject that only delivers values emitted after subscription.
    pub fn publish() -> Self {
        Self::with(None, false)
    }

    /// A subject that replays its latest value, starting with `initial`.
    pub fn replay(initial: T) -> Self {
        Self::with(Some(initial), true)
    }

    fn with(latest: Option<T>, replay: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubjectInner {
                latest,
                replay,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubjectInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `value` to every live subscriber. Dropped subscribers are pruned.
    pub fn emit(&self, value: T) {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
        if inner.replay {
            inner.latest = Some(value);
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(latest) = inner.latest.as_ref() {
            // Receiver is alive, the send cannot fail.
            let _ = tx.send(latest.clone());
        }
        inner.subscribers.push(tx);
        Subscription { rx }
    }

    /// The replayed value, if this subject replays.
    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    /// Number of subscribers that have not been dropped yet.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

/// One consumer's view of a [`Subject`].
///
/// Values are buffered until read; dropping the subscription unsubscribes.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// The next buffered value, without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Every value buffered so far, without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Drops consecutive duplicates.
pub fn distinct<T, St>(stream: St) -> Signal<T>
where
    T: Clone + PartialEq + Send + 'static,
    St: Stream<Item = T> + Send + 'static,
{
    let mut last: Option<T> = None;
    stream
        .filter_map(move |value| {
            let fresh = last.as_ref() != Some(&value);
            if fresh {
                last = Some(value.clone());
            }
            future::ready(fresh.then_some(value))
        })
        .boxed()
}

/// Projects each value, skipping those the projector maps to `None`.
pub fn skip_none<T, R, St, F>(stream: St, mut project: F) -> Signal<R>
where
    St: Stream<Item = T> + Send + 'static,
    F: FnMut(T) -> Option<R> + Send + 'static,
    R: Send + 'static,
{
    stream
        .filter_map(move |value| future::ready(project(value)))
        .boxed()
}
