use std::sync::{Mutex, OnceLock, PoisonError};

use crate::engine::{Compute, Producer};
use crate::error::ProducerError;
use crate::handle::{Handle, Value};
use crate::monitoring::{MonitorRef, MonitorSource, ProducerToken, no_op_monitor, no_op_source};
use crate::utils::isolate;

/// A memoizing node: computes its handle at most once and hands out clones of
/// it forever after.
///
/// Only a successful `compute` is memoized. If `compute` returns an error or
/// panics, the error goes to the caller and the next `get` tries again. A
/// handle that later settles with a failure is memoized like any other.
pub struct ProducerNode<T: Value, C> {
    monitor: MonitorSource,
    token: Option<ProducerToken>,
    compute: C,
    instance: OnceLock<Handle<T>>,
    lock: Mutex<()>,
}

impl<T, C> ProducerNode<T, C>
where
    T: Value,
    C: Compute<T>,
{
    /// An unobserved node.
    pub fn new(compute: C) -> Self {
        Self::with_monitor(no_op_source(), None, compute)
    }

    /// A node that reports to the monitor its component hands out for `token`.
    ///
    /// Without a token the node stays unobserved.
    pub fn with_monitor(
        monitor: MonitorSource,
        token: impl Into<Option<ProducerToken>>,
        compute: C,
    ) -> Self {
        Self {
            monitor,
            token: token.into(),
            compute,
            instance: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn token(&self) -> Option<&ProducerToken> {
        self.token.as_ref()
    }

    fn name(&self) -> &str {
        match &self.token {
            Some(token) => token.name(),
            None => std::any::type_name::<C>(),
        }
    }

    fn producer_monitor(&self) -> MonitorRef {
        let Some(token) = &self.token else {
            return no_op_monitor();
        };

        self.monitor
            .get()
            .producer_monitor_for(token)
            .unwrap_or_else(no_op_monitor)
    }

    fn initialize(&self) -> Result<Handle<T>, ProducerError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = self.instance.get() {
            return Ok(handle.clone());
        }

        let monitor = self.producer_monitor();
        monitor.requested();

        let handle = match isolate(|| self.compute.compute(&monitor)) {
            Ok(Ok(handle)) => handle,
            Ok(Err(source)) => return Err(self.compute_failed(source)),
            Err(panic) => return Err(self.compute_failed(anyhow::anyhow!(panic))),
        };

        tracing::debug!(producer = self.name(), "computed producer");

        let handle = handle.observed_by(monitor);
        Ok(self.instance.get_or_init(|| handle).clone())
    }

    fn compute_failed(&self, source: anyhow::Error) -> ProducerError {
        tracing::warn!(producer = self.name(), "compute failed: {source:#}");

        ProducerError::Compute {
            token: self.name().to_string(),
            source,
        }
    }
}

impl<T, C> Producer for ProducerNode<T, C>
where
    T: Value,
    C: Compute<T>,
{
    type Output = T;

    fn get(&self) -> Result<Handle<T>, ProducerError> {
        match self.instance.get() {
            Some(handle) => Ok(handle.clone()),
            None => self.initialize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;

    use super::*;
    use crate::error::Cause;
    use crate::monitoring::testing::{EventLog, Fixed};
    use crate::monitoring::{ComponentMonitor, MonitorSource};

    fn node<F>(compute: F) -> ProducerNode<u32, F>
    where
        F: Fn(&MonitorRef) -> anyhow::Result<Handle<u32>> + Send + Sync,
    {
        ProducerNode::new(compute)
    }

    fn source(monitor: MonitorRef) -> MonitorSource {
        Arc::new(move || -> Arc<dyn ComponentMonitor> { Arc::new(Fixed(monitor.clone())) })
    }

    #[test]
    fn test_concurrent_get_computes_once() {
        let runs = AtomicUsize::new(0);
        let node = node(|_| {
            let run = runs.fetch_add(1, Ordering::SeqCst) as u32;
            Ok(Handle::ready(run + 40))
        });

        let handles: Vec<_> = std::thread::scope(|s| {
            let spawned: Vec<_> = (0..16).map(|_| s.spawn(|| node.get().unwrap())).collect();
            spawned.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for handle in handles {
            assert_eq!(block_on(handle).unwrap(), 40);
        }
    }

    #[test]
    fn test_concurrent_get_shares_failure() {
        let runs = AtomicUsize::new(0);
        let (completer, pending) = Handle::pending();
        let node = node(|_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(pending.clone())
        });

        let causes: Vec<Cause> = std::thread::scope(|s| {
            let waiting: Vec<_> = (0..16)
                .map(|_| s.spawn(|| block_on(node.get().unwrap()).unwrap_err()))
                .collect();

            completer.complete(Err(Cause::msg("backend down")));
            waiting.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let cause = block_on(node.get().unwrap()).unwrap_err();
        assert_eq!(cause.to_string(), "backend down");
        assert!(causes.iter().all(|seen| seen.ptr_eq(&cause)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_failure_is_memoized() {
        let runs = AtomicUsize::new(0);
        let cause = Cause::msg("unavailable");
        let node = node(|_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(Handle::failed(cause.clone()))
        });

        let a = block_on(node.get().unwrap()).unwrap_err();
        let b = block_on(node.get().unwrap()).unwrap_err();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(a.ptr_eq(&cause));
        assert!(b.ptr_eq(&cause));
    }

    #[test]
    fn test_sync_failure_is_retried() {
        let runs = AtomicUsize::new(0);
        let node = node(|_| match runs.fetch_add(1, Ordering::SeqCst) {
            0 => Err(anyhow::anyhow!("not yet")),
            _ => Ok(Handle::ready(7)),
        });

        let err = node.get().unwrap_err();
        assert!(matches!(err, ProducerError::Compute { .. }));

        assert_eq!(block_on(node.get().unwrap()).unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_compute_panic_is_not_memoized() {
        let runs = AtomicUsize::new(0);
        let node = node(|_| {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run explodes");
            }
            Ok(Handle::ready(1))
        });

        match node.get() {
            Err(ProducerError::Compute { source, .. }) => {
                assert_eq!(source.to_string(), "panicked: first run explodes");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(block_on(node.get().unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_monitor_sees_lifecycle() {
        let log = EventLog::new();
        let (completer, pending) = Handle::pending();
        let node = ProducerNode::with_monitor(
            source(log.monitor("node")),
            ProducerToken::named("answer"),
            move |_: &MonitorRef| -> anyhow::Result<Handle<u32>> { Ok(pending.clone()) },
        );

        let handle = node.get().unwrap();
        assert_eq!(log.events(), vec!["node:requested"]);

        // nobody awaits: settling alone notifies the monitor
        completer.complete(Ok(42));
        assert_eq!(log.events(), vec!["node:requested", "node:succeeded"]);
        assert!(handle.is_resolved());

        assert_eq!(block_on(handle).unwrap(), 42);
        let _ = block_on(node.get().unwrap());
        assert_eq!(log.events(), vec!["node:requested", "node:succeeded"]);
    }

    #[test]
    fn test_monitor_sees_settled_failure_at_once() {
        let log = EventLog::new();
        let node = ProducerNode::with_monitor(
            source(log.monitor("node")),
            ProducerToken::named("broken"),
            |_: &MonitorRef| -> anyhow::Result<Handle<u32>> { Ok(Handle::failed(Cause::msg("x"))) },
        );

        let _ = node.get().unwrap();
        assert_eq!(log.events(), vec!["node:requested", "node:failed"]);
    }

    #[test]
    fn test_without_token_is_unobserved() {
        let log = EventLog::new();
        let node = ProducerNode::with_monitor(
            source(log.monitor("node")),
            None::<ProducerToken>,
            |_: &MonitorRef| -> anyhow::Result<Handle<u32>> { Ok(Handle::ready(1)) },
        );

        block_on(node.get().unwrap()).unwrap();
        assert!(log.events().is_empty());
    }
}
