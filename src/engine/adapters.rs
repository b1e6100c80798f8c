use std::marker::PhantomData;

use crate::engine::{Compute, Producer, ProducerNode};
use crate::error::{Cause, ProducerError};
use crate::handle::{Handle, Value};
use crate::monitoring::MonitorRef;
use crate::provider::Provider;

/// Computes a node from a plain value supplier, asking it only once.
pub struct FromProvider<T, P> {
    provider: P,
    _marker: PhantomData<fn() -> T>,
}

impl<T, P> Compute<T> for FromProvider<T, P>
where
    T: Value,
    P: Provider<T>,
{
    fn compute(&self, _: &MonitorRef) -> anyhow::Result<Handle<T>> {
        Ok(Handle::ready(self.provider.get()))
    }
}

/// Lifts a value supplier into the graph as a memoized node.
pub fn from_provider<T, P>(provider: P) -> ProducerNode<T, FromProvider<T, P>>
where
    T: Value,
    P: Provider<T>,
{
    ProducerNode::new(FromProvider {
        provider,
        _marker: PhantomData,
    })
}

/// A producer whose handle has settled before anyone asks for it.
#[derive(Debug, Clone)]
pub struct Immediate<T: Value>(Handle<T>);

impl<T: Value> Immediate<T> {
    pub fn value(value: T) -> Self {
        Self(Handle::ready(value))
    }

    pub fn failed(cause: impl Into<Cause>) -> Self {
        Self(Handle::failed(cause))
    }
}

impl<T: Value> Producer for Immediate<T> {
    type Output = T;

    fn get(&self) -> Result<Handle<T>, ProducerError> {
        Ok(self.0.clone())
    }
}
