//! # Bindings
//!
//! Glue between signals and whoever renders them.
//!
//! A [`Binding`] activates its source lazily: the first attached observer
//! connects it, the last detached observer tears it down. Attaching and
//! detaching any number of times never leaves a second pump running.
//!
//! ```text
//! observe() #1 ──▶ connect ──▶ pump task ──▶ every observer callback
//! observe() #2 ──────────────────┘
//! drop(handle #1)
//! drop(handle #2) ──▶ abort pump
//! ```
//!
//! An [`ActionBinding`] is the other direction: it feeds a stream of actions
//! into the engine until it is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::{Stream, StreamExt};
use log::debug;
use tokio::task::AbortHandle;

use super::Signal;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
type Source<T> = Arc<dyn Fn() -> Signal<T> + Send + Sync + 'static>;

struct BindingInner<T> {
    observers: Vec<(u64, Observer<T>)>,
    next_id: u64,
    pump: Option<AbortHandle>,
    connections: usize,
}

/// A reference-counted, lazily connected view of a signal.
pub struct Binding<T> {
    source: Source<T>,
    inner: Arc<Mutex<BindingInner<T>>>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(inner: &Mutex<BindingInner<T>>) -> MutexGuard<'_, BindingInner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> Binding<T> {
    /// `source` is called once per connection to obtain a fresh signal.
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> Signal<T> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(source),
            inner: Arc::new(Mutex::new(BindingInner {
                observers: Vec::new(),
                next_id: 0,
                pump: None,
                connections: 0,
            })),
        }
    }

    /// Attach an observer. Must be called from within a tokio runtime.
    ///
    /// The observer stays attached until the returned handle is dropped.
    pub fn observe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, Arc::new(observer)));

        if inner.pump.is_none() {
            // Subscribe before spawning so nothing emitted in between is lost.
            let signal = (self.source)();
            let weak = Arc::downgrade(&self.inner);
            let pump = tokio::spawn(pump(signal, weak));
            inner.pump = Some(pump.abort_handle());
            inner.connections += 1;
            debug!("Binding connected (connection #{})", inner.connections);
        }

        let inner_dyn: Arc<dyn Detach> = self.inner.clone();
        ObserverHandle {
            id,
            binding: Arc::downgrade(&inner_dyn),
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner).observers.len()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner).pump.is_some()
    }

    /// How many times the source has been connected so far.
    pub fn connections(&self) -> usize {
        lock(&self.inner).connections
    }
}

async fn pump<T>(mut signal: Signal<T>, inner: Weak<Mutex<BindingInner<T>>>) {
    while let Some(value) = signal.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        // Call observers outside the lock so they may detach themselves.
        let observers: Vec<Observer<T>> = lock(&inner)
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(&value);
        }
    }
    // The source ended on its own; the next observer reconnects.
    if let Some(inner) = inner.upgrade() {
        lock(&inner).pump = None;
        debug!("Binding source ended");
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send + 'static> Detach for Mutex<BindingInner<T>> {
    fn detach(&self, id: u64) {
        let mut inner = lock(self);
        inner.observers.retain(|(observer_id, _)| *observer_id != id);
        if inner.observers.is_empty()
            && let Some(pump) = inner.pump.take()
        {
            pump.abort();
            debug!("Binding disconnected (last observer left)");
        }
    }
}

/// Keeps an observer attached to a [`Binding`]; detaches on drop.
pub struct ObserverHandle {
    id: u64,
    binding: Weak<dyn Detach>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.upgrade() {
            binding.detach(self.id);
        }
    }
}

/// Forwards a stream of actions into the engine while alive.
pub struct ActionBinding {
    handle: AbortHandle,
}

impl ActionBinding {
    pub(crate) fn spawn<St, F>(actions: St, mut sink: F) -> Self
    where
        St: Stream + Send + 'static,
        St::Item: Send,
        F: FnMut(St::Item) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut actions = std::pin::pin!(actions);
            while let Some(action) = actions.next().await {
                sink(action);
            }
            debug!("Action stream finished");
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    /// Whether the underlying stream is still being forwarded.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ActionBinding {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Subject;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_observer(counter: &Arc<AtomicUsize>) -> impl Fn(&i32) + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_first_observer_connects_once() {
        let subject = Subject::publish();
        let source = subject.clone();
        let binding = Binding::new(move || source.subscribe().boxed());
        assert!(!binding.is_connected());

        let seen = Arc::new(AtomicUsize::new(0));
        let _a = binding.observe(counting_observer(&seen));
        let _b = binding.observe(counting_observer(&seen));
        assert_eq!(binding.connections(), 1);
        assert_eq!(subject.subscriber_count(), 1);

        subject.emit(1);
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_observer_disconnects() {
        let subject: Subject<i32> = Subject::publish();
        let source = subject.clone();
        let binding = Binding::new(move || source.subscribe().boxed());

        let a = binding.observe(|_| {});
        let b = binding.observe(|_| {});
        drop(a);
        assert!(binding.is_connected());
        drop(b);
        assert!(!binding.is_connected());
        assert_eq!(binding.observer_count(), 0);

        // The aborted pump drops its subscription once it is polled again.
        settle().await;
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_reattach_cycles_reconnect_without_leaking() {
        let subject: Subject<i32> = Subject::publish();
        let source = subject.clone();
        let binding = Binding::new(move || source.subscribe().boxed());

        for _ in 0..3 {
            let handle = binding.observe(|_| {});
            drop(handle);
        }
        settle().await;

        assert_eq!(binding.connections(), 3);
        assert!(!binding.is_connected());
        assert_eq!(subject.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_ended_source_reconnects_on_next_observe() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<i32>();
        let first = std::sync::Mutex::new(Some(rx));
        let binding = Binding::new(move || match first.lock().unwrap().take() {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|v| (v, rx))
            })
            .boxed(),
            None => futures::stream::iter(vec![7]).boxed(),
        });

        let _a = binding.observe(|_| {});
        assert!(binding.is_connected());
        drop(tx);
        settle().await;
        assert!(!binding.is_connected());

        let seen = Arc::new(AtomicUsize::new(0));
        let _b = binding.observe(counting_observer(&seen));
        assert!(binding.is_connected());
        settle().await;
        assert_eq!(binding.connections(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_binding_stops_on_drop() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<i32>();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let binding = ActionBinding::spawn(
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tx.send(1).unwrap();
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(binding);
        settle().await;
        assert!(tx.send(2).is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
