//! Observation of producer lifecycles.
//!
//! Every [`ProducerNode`](crate::ProducerNode) reports its lifecycle to a
//! [`ProducerMonitor`], which it obtains from the [`ComponentMonitor`] of its
//! graph instance using its [`ProducerToken`]:
//!
//! * `requested` when the node is first asked for its value,
//! * `method_starting` / `method_finished` around the node's method body,
//! * exactly one of `succeeded` / `failed` when its handle settles.
//!
//! Monitors are untrusted. Compose them with
//! [`delegating_monitor_factory`] so that a panicking monitor is logged and
//! skipped instead of breaking the graph.

mod cache;
mod delegate;
mod recorder;
mod report;
mod timing;

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

use crate::error::Cause;
use crate::provider::Provider;

pub use cache::MonitorCache;
pub use delegate::{
    compose_producer_monitors, create_monitor_for_component, delegating_monitor_factory,
};
pub use recorder::{
    ComponentTimingRecorder, ComponentTimingRecorderFactory, ProducerTimingRecorder,
    delegating_timing_recorder_factory,
};
pub use report::{ProducerTiming, TimingLog, TimingOutcome};
pub use timing::{SystemTicker, Ticker, TimingMonitorFactory};

pub(crate) use delegate::Delegation;

pub type MonitorRef = Arc<dyn ProducerMonitor>;

/// Where a node looks up the component monitor of its graph instance.
pub type MonitorSource = Arc<dyn Provider<Arc<dyn ComponentMonitor>>>;

/// Identifies a node for observation purposes.
///
/// A token is either a type identity or a name, never both. It carries no
/// behavior and is only used to route events and to label them.
#[derive(Debug, Clone)]
pub struct ProducerToken(TokenKind);

#[derive(Debug, Clone)]
enum TokenKind {
    Type { id: TypeId, name: &'static str },
    Name(Cow<'static, str>),
}

impl ProducerToken {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(TokenKind::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        })
    }

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(TokenKind::Name(name.into()))
    }

    pub fn name(&self) -> &str {
        match &self.0 {
            TokenKind::Type { name, .. } => name,
            TokenKind::Name(name) => name,
        }
    }
}

impl PartialEq for ProducerToken {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (TokenKind::Type { id: a, .. }, TokenKind::Type { id: b, .. }) => a == b,
            (TokenKind::Name(a), TokenKind::Name(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ProducerToken {}

impl Hash for ProducerToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            TokenKind::Type { id, .. } => {
                0u8.hash(state);
                id.hash(state);
            }
            TokenKind::Name(name) => {
                1u8.hash(state);
                name.hash(state);
            }
        }
    }
}

impl Display for ProducerToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle hooks for a single node. All methods default to doing nothing.
pub trait ProducerMonitor: Send + Sync {
    fn requested(&self) {}

    fn method_starting(&self) {}

    fn method_finished(&self) {}

    fn succeeded(&self, _value: &dyn Any) {}

    fn failed(&self, _cause: &Cause) {}
}

/// Hands out the monitor for each node of one graph instance.
pub trait ComponentMonitor: Send + Sync {
    /// Returns the monitor for `token`, or `None` to leave the node unobserved.
    fn producer_monitor_for(&self, token: &ProducerToken) -> Option<MonitorRef>;
}

/// Creates the component monitor for a graph instance.
pub trait MonitorFactory: Send + Sync {
    fn create(&self, component: &dyn Any) -> Option<Arc<dyn ComponentMonitor>>;
}

/// The do-nothing monitor, component monitor, factory and timing recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOp;

static NO_OP: LazyLock<Arc<NoOp>> = LazyLock::new(|| Arc::new(NoOp));

impl ProducerMonitor for NoOp {}

impl ComponentMonitor for NoOp {
    fn producer_monitor_for(&self, _: &ProducerToken) -> Option<MonitorRef> {
        Some(no_op_monitor())
    }
}

impl MonitorFactory for NoOp {
    fn create(&self, _: &dyn Any) -> Option<Arc<dyn ComponentMonitor>> {
        Some(no_op_component_monitor())
    }
}

/// The shared no-op producer monitor.
pub fn no_op_monitor() -> MonitorRef {
    NO_OP.clone()
}

/// The shared no-op component monitor.
pub fn no_op_component_monitor() -> Arc<dyn ComponentMonitor> {
    NO_OP.clone()
}

/// The shared no-op monitor factory.
pub fn no_op_monitor_factory() -> Arc<dyn MonitorFactory> {
    NO_OP.clone()
}

/// A monitor source that always yields the no-op component monitor.
pub fn no_op_source() -> MonitorSource {
    static SOURCE: LazyLock<MonitorSource> =
        LazyLock::new(|| -> MonitorSource { Arc::new(no_op_component_monitor) });
    SOURCE.clone()
}

pub(crate) fn no_op_singleton() -> Arc<NoOp> {
    NO_OP.clone()
}
