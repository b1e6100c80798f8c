//! Producer nodes and the glue that wires them together.

mod adapters;
mod method;
mod node;

use std::sync::Arc;

use crate::error::{Cause, ProducerError};
use crate::handle::{Handle, Outcome, Value};
use crate::monitoring::MonitorRef;
use crate::produced::Produced;

pub use crate::engine::adapters::{FromProvider, Immediate, from_provider};
pub use crate::engine::method::Method;
pub use crate::engine::node::ProducerNode;

/// A node of the asynchronous graph.
///
/// `get` never blocks on the result: it hands out a [`Handle`] that settles
/// later. An `Err` here is a synchronous defect of the graph, not a failure of
/// the computation itself, which is reported through the handle instead.
pub trait Producer: Send + Sync {
    type Output: Value;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError>;
}

impl<P> Producer for Arc<P>
where
    P: Producer + ?Sized,
{
    type Output = P::Output;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError> {
        P::get(self)
    }
}

pub type DynProducer<T> = Arc<dyn Producer<Output = T>>;

/// The step a [`ProducerNode`] runs the first time it is asked for a value.
///
/// `compute` receives the node's monitor so that it can bracket its own
/// method body. Returning `Err` is a synchronous failure and is not memoized.
pub trait Compute<T: Value>: Send + Sync {
    fn compute(&self, monitor: &MonitorRef) -> anyhow::Result<Handle<T>>;
}

impl<T, F> Compute<T> for F
where
    T: Value,
    F: Fn(&MonitorRef) -> anyhow::Result<Handle<T>> + Send + Sync,
{
    fn compute(&self, monitor: &MonitorRef) -> anyhow::Result<Handle<T>> {
        self(monitor)
    }
}

/// A single input of a [`Method`].
pub trait Dependency: Send + Sync + 'static {
    type Output: Value;

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError>;
}

impl<P> Dependency for Arc<P>
where
    P: Producer + ?Sized + 'static,
{
    type Output = P::Output;

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
        self.get()
    }
}

/// An input that is handed over as a [`Produced`], so that its failure does
/// not skip the method.
pub struct ProducedDependency<D>(D);

/// Marks `dependency` as tolerated: the method receives `Produced<T>`.
pub fn produced<D: Dependency>(dependency: D) -> ProducedDependency<D> {
    ProducedDependency(dependency)
}

impl<D: Dependency> Dependency for ProducedDependency<D> {
    type Output = Produced<D::Output>;

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
        Dependency::request(&self.0).map(Handle::produced)
    }
}

/// A collection of inputs that can be requested all at once.
///
/// Implemented for `()`, for any single [`Dependency`], for `Vec`s of them and
/// for tuples of up to twelve.
pub trait Dependencies: Send + Sync + 'static {
    /// The resolved inputs handed to the method body.
    type Output: Value;

    /// Issues every request, returning a handle that settles once all inputs
    /// have. It fails with the first failed input in order.
    fn request(&self) -> Result<Handle<Self::Output>, ProducerError>;
}

impl Dependencies for () {
    type Output = ();

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
        Ok(Handle::ready(()))
    }
}

impl<D> Dependencies for D
where
    D: Dependency,
{
    type Output = D::Output;

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
        Dependency::request(self)
    }
}

impl<D> Dependencies for Vec<D>
where
    D: Dependency,
{
    type Output = Vec<D::Output>;

    fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
        let handles = self
            .iter()
            .map(Dependency::request)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Handle::settle_all(handles).then(first_failure))
    }
}

/// Collects settled outcomes, reporting the first failure in order.
fn first_failure<T: Value>(outcomes: Outcome<Vec<Outcome<T>>>) -> Outcome<Vec<T>> {
    outcomes?.into_iter().collect()
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($($D,)*)
        where
            $($D: Dependency),* {
            type Output = ($($D::Output,)*);

            fn request(&self) -> Result<Handle<Self::Output>, ProducerError> {
                let ($($D,)*) = self;
                $(let $D = Dependency::request($D)?;)*

                let settled = Handle::settle_all(vec![$($D.signal()),*]);
                Ok(settled.then(move |_| Ok::<_, Cause>(($($D.outcome()?,)*))))
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
impl_deps!(A, B, C, D, E, F, G);
impl_deps!(A, B, C, D, E, F, G, H);
impl_deps!(A, B, C, D, E, F, G, H, I);
impl_deps!(A, B, C, D, E, F, G, H, I, J);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K, L);
