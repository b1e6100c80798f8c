use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::engine::{Compute, Dependencies};
use crate::error::Cause;
use crate::handle::{Executor, Handle, Value};
use crate::monitoring::MonitorRef;
use crate::utils::panic_message;

type Body<I, T> = Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Computes a node by running a function over the values of its inputs.
///
/// Every input is requested as soon as the node is, so that independent
/// branches of the graph run concurrently. Once all inputs have succeeded the
/// body is handed to the executor, bracketed by `method_starting` and
/// `method_finished`. The hand-off happens on whichever thread settled the
/// last input. If an input fails, the body never runs and the node fails with
/// the first failure in input order.
///
/// ```rust,ignore
/// let sum = ProducerNode::new(Method::new(pool, (a, b), |(a, b): (u32, u32)| Ok(a + b)));
/// ```
pub struct Method<D: Dependencies, T> {
    executor: Arc<dyn Executor>,
    dependencies: D,
    body: Body<D::Output, T>,
}

impl<D, T> Method<D, T>
where
    D: Dependencies,
    T: Value,
{
    /// A method with a synchronous body.
    pub fn new<F>(executor: Arc<dyn Executor>, dependencies: D, body: F) -> Self
    where
        F: Fn(D::Output) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let body = Arc::new(body);

        Self {
            executor,
            dependencies,
            body: Arc::new(move |inputs: D::Output| {
                let body = body.clone();
                async move { body(inputs) }.boxed()
            }),
        }
    }

    /// A method whose body is itself asynchronous.
    pub fn future<F, Fut>(executor: Arc<dyn Executor>, dependencies: D, body: F) -> Self
    where
        F: Fn(D::Output) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            executor,
            dependencies,
            body: Arc::new(move |inputs: D::Output| body(inputs).boxed()),
        }
    }
}

impl<D, T> Compute<T> for Method<D, T>
where
    D: Dependencies,
    T: Value,
{
    fn compute(&self, monitor: &MonitorRef) -> anyhow::Result<Handle<T>> {
        let inputs = self.dependencies.request()?;
        let executor = self.executor.clone();
        let body = self.body.clone();
        let monitor = monitor.clone();

        Ok(inputs.chain(move |inputs| match inputs {
            Err(cause) => Handle::failed(cause),
            Ok(inputs) => Handle::spawn(executor.as_ref(), async move {
                monitor.method_starting();
                let result = AssertUnwindSafe(async move { body(inputs).await })
                    .catch_unwind()
                    .await;
                monitor.method_finished();

                match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(Cause::from(e)),
                    Err(payload) => Err(Cause::msg(panic_message(payload))),
                }
            }),
        }))
    }
}
