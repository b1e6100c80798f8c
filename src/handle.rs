use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexSet;

use crate::error::Cause;
use crate::monitoring::ProducerMonitor;
use crate::produced::Produced;
use crate::utils::{isolate, panic_message};

/// Anything a producer can yield: cheap to clone and safe to share.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

pub type Outcome<T> = Result<T, Cause>;

/// The execution substrate supplied by the host.
///
/// Method bodies are handed to an executor as boxed futures; the executor is
/// expected to drive them to completion.
pub trait Executor: Send + Sync {
    fn execute(&self, task: BoxFuture<'static, ()>);
}

impl Executor for futures::executor::ThreadPool {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        self.spawn_ok(task);
    }
}

/// Runs each task on a rayon worker, blocking that worker until the task
/// completes. Method bodies are only spawned once their inputs have settled,
/// so a task never waits on another task of the same pool.
impl Executor for rayon::ThreadPool {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        self.spawn(move || futures::executor::block_on(task));
    }
}

#[cfg(feature = "tokio")]
impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: BoxFuture<'static, ()>) {
        // Detached: the task keeps running after the join handle is dropped.
        drop(self.spawn(task));
    }
}

impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    fn execute(&self, task: BoxFuture<'static, ()>) {
        E::execute(self, task)
    }
}

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Waiting<T> {
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
}

struct State<T> {
    outcome: OnceLock<Outcome<T>>,
    waiting: Mutex<Waiting<T>>,
}

impl<T: Value> State<T> {
    fn pending() -> Self {
        Self {
            outcome: OnceLock::new(),
            waiting: Mutex::new(Waiting {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn settled(outcome: Outcome<T>) -> Self {
        let state = Self::pending();
        let _ = state.outcome.set(outcome);
        state
    }

    fn lock(&self) -> MutexGuard<'_, Waiting<T>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every registered callback, then publishes the outcome.
    ///
    /// Callbacks registered while earlier ones run are drained too, so nobody
    /// can observe the outcome before all of them have seen it.
    fn settle(&self, outcome: Outcome<T>) {
        let wakers = loop {
            let callbacks = {
                let mut waiting = self.lock();
                if waiting.callbacks.is_empty() {
                    if self.outcome.set(outcome).is_err() {
                        return;
                    }
                    break std::mem::take(&mut waiting.wakers);
                }
                std::mem::take(&mut waiting.callbacks)
            };

            for callback in callbacks {
                run_callback(callback, &outcome);
            }
        };

        for waker in wakers {
            waker.wake();
        }
    }

    fn on_settled(&self, callback: Callback<T>) {
        let outcome = {
            let mut waiting = self.lock();
            match self.outcome.get() {
                Some(outcome) => outcome,
                None => {
                    waiting.callbacks.push(callback);
                    return;
                }
            }
        };

        run_callback(callback, outcome);
    }
}

fn run_callback<T>(callback: Callback<T>, outcome: &Outcome<T>) {
    if let Err(panic) = isolate(|| callback(outcome)) {
        tracing::error!("panic in handle callback: {panic}");
    }
}

/// A handle to the asynchronous result of a node.
///
/// A `Handle<T>` is cheap to clone and every clone sees the same value or the
/// same [`Cause`]. It settles as soon as the work behind it finishes, whether
/// or not anyone awaits it; callbacks attached with
/// [`inspect_outcome`](Handle::inspect_outcome) run on the thread that settles
/// it.
#[must_use = "dropping a handle does not cancel its work"]
pub struct Handle<T: Value> {
    state: Arc<State<T>>,
}

impl<T: Value> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Value> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.peek() {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Handle").field("state", &state).finish()
    }
}

/// The write side of a pending [`Handle`].
///
/// Dropping it without completing fails the handle.
pub struct Completer<T: Value> {
    state: Option<Arc<State<T>>>,
}

impl<T: Value> Completer<T> {
    pub fn complete(mut self, outcome: Outcome<T>) {
        if let Some(state) = self.state.take() {
            state.settle(outcome);
        }
    }
}

impl<T: Value> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.settle(Err(Cause::msg("dropped before it settled")));
        }
    }
}

struct Join<T: Value> {
    remaining: usize,
    slots: Vec<Option<Outcome<T>>>,
    completer: Option<Completer<Vec<Outcome<T>>>>,
}

impl<T: Value> Handle<T> {
    /// A handle settled later through its [`Completer`].
    pub fn pending() -> (Completer<T>, Self) {
        let state = Arc::new(State::pending());
        let completer = Completer {
            state: Some(state.clone()),
        };
        (completer, Self { state })
    }

    /// An already-resolved successful handle.
    pub fn ready(value: T) -> Self {
        Self {
            state: Arc::new(State::settled(Ok(value))),
        }
    }

    /// An already-resolved failed handle.
    pub fn failed(cause: impl Into<Cause>) -> Self {
        Self {
            state: Arc::new(State::settled(Err(cause.into()))),
        }
    }

    /// Hands `future` to `executor` and returns a handle to its outcome.
    ///
    /// The future runs to completion even if every handle is dropped. A panic
    /// inside it settles the handle with a failure, and so does an executor
    /// that drops the task without running it.
    pub fn spawn<F>(executor: &dyn Executor, future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        let (completer, handle) = Self::pending();

        executor.execute(
            async move {
                let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(Cause::msg(panic_message(payload))),
                };
                completer.complete(outcome);
            }
            .boxed(),
        );

        handle
    }

    /// A handle that settles once every one of `handles` has, with their
    /// outcomes in the same order. It never fails itself.
    pub fn settle_all(handles: Vec<Handle<T>>) -> Handle<Vec<Outcome<T>>> {
        if handles.is_empty() {
            return Handle::ready(Vec::new());
        }

        let (completer, all) = Handle::pending();
        let join = Arc::new(Mutex::new(Join {
            remaining: handles.len(),
            slots: (0..handles.len()).map(|_| None).collect(),
            completer: Some(completer),
        }));

        for (index, handle) in handles.iter().enumerate() {
            let join = join.clone();
            handle.state.on_settled(Box::new(move |outcome: &Outcome<T>| {
                let mut join = join.lock().unwrap_or_else(PoisonError::into_inner);
                join.slots[index] = Some(outcome.clone());
                join.remaining -= 1;
                if join.remaining > 0 {
                    return;
                }

                let outcomes = std::mem::take(&mut join.slots).into_iter().flatten().collect();
                let completer = join.completer.take();
                drop(join);

                if let Some(completer) = completer {
                    completer.complete(Ok(outcomes));
                }
            }));
        }

        all
    }

    /// Returns the outcome if the handle has already settled.
    pub fn peek(&self) -> Option<&Outcome<T>> {
        self.state.outcome.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.peek().is_some()
    }

    /// Calls `callback` exactly once, when the handle settles.
    ///
    /// If the handle has already settled the callback runs right away.
    /// Otherwise it runs on the thread that settles the handle, before any
    /// awaiter is woken. A panicking callback is logged and ignored.
    pub fn inspect_outcome<F>(self, callback: F) -> Self
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.state.on_settled(Box::new(callback));
        self
    }

    /// Reports the outcome of this handle to `monitor`.
    pub fn observed_by(self, monitor: Arc<dyn ProducerMonitor>) -> Self {
        self.inspect_outcome(move |outcome| match outcome {
            Ok(value) => monitor.succeeded(value as &dyn Any),
            Err(cause) => monitor.failed(cause),
        })
    }

    /// A handle to `f` applied to this handle's outcome.
    ///
    /// `f` runs on the thread that settles this handle; a panic in it fails
    /// the derived handle.
    pub fn then<U, F>(&self, f: F) -> Handle<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let (completer, handle) = Handle::pending();

        self.state.on_settled(Box::new(move |outcome: &Outcome<T>| {
            let outcome = isolate(|| f(outcome.clone())).unwrap_or_else(|panic| Err(Cause::msg(panic)));
            completer.complete(outcome);
        }));

        handle
    }

    /// Like [`then`](Handle::then), for steps that continue asynchronously.
    pub fn chain<U, F>(&self, f: F) -> Handle<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>) -> Handle<U> + Send + 'static,
    {
        let (completer, handle) = Handle::pending();

        self.state.on_settled(Box::new(move |outcome: &Outcome<T>| {
            let next = isolate(|| f(outcome.clone()))
                .unwrap_or_else(|panic| Handle::failed(Cause::msg(panic)));
            next.state.on_settled(Box::new(move |outcome: &Outcome<U>| {
                completer.complete(outcome.clone());
            }));
        }));

        handle
    }

    pub fn map<U, F>(self, f: F) -> Handle<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Handle::then(&self, |outcome| outcome.map(f))
    }

    /// Captures the outcome as a value; the resulting handle never fails.
    pub fn produced(self) -> Handle<Produced<T>> {
        Handle::then(&self, |outcome| Ok(Produced::from(outcome)))
    }

    /// Wraps the value in a one-element set, for set contributions.
    pub fn singleton_set(self) -> Handle<IndexSet<T>>
    where
        T: Hash + Eq,
    {
        self.map(|value| IndexSet::from([value]))
    }

    /// Settles with `()` when this handle settles, whatever the outcome.
    pub(crate) fn signal(&self) -> Handle<()> {
        self.then(|_| Ok(()))
    }

    /// The outcome of a handle known to have settled.
    pub(crate) fn outcome(&self) -> Outcome<T> {
        self.peek()
            .cloned()
            .unwrap_or_else(|| Err(Cause::msg("handle has not settled")))
    }
}

impl<T: Value> Future for Handle<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.peek() {
            return Poll::Ready(outcome.clone());
        }

        let mut waiting = self.state.lock();
        if let Some(outcome) = self.peek() {
            return Poll::Ready(outcome.clone());
        }
        if !waiting.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            waiting.wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}
