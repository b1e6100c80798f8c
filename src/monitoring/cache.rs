use std::any::Any;
use std::sync::{Arc, OnceLock};

use crate::monitoring::{
    ComponentMonitor, MonitorFactory, MonitorSource, create_monitor_for_component,
    no_op_component_monitor,
};
use crate::provider::Provider;
use crate::utils::isolate;

/// Holds the composed component monitor of one graph instance.
///
/// The monitor is built on first use and at most once, even when several
/// nodes ask for it at the same time. A construction failure is memoized as
/// the no-op monitor.
#[derive(Default)]
pub struct MonitorCache {
    monitor: OnceLock<Arc<dyn ComponentMonitor>>,
}

impl MonitorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn monitor<C, P, F>(&self, component: &P, factories: &F) -> Arc<dyn ComponentMonitor>
    where
        C: Any,
        P: Provider<C> + ?Sized,
        F: Provider<Vec<Arc<dyn MonitorFactory>>> + ?Sized,
    {
        self.monitor
            .get_or_init(|| {
                tracing::debug!("constructing component monitor");
                isolate(|| create_monitor_for_component(&component.get(), factories)).unwrap_or_else(
                    |panic| {
                        tracing::error!("panic while constructing component monitor: {panic}");
                        no_op_component_monitor()
                    },
                )
            })
            .clone()
    }

    /// Adapts this cache into the source that nodes of the graph read from.
    pub fn source<C, P, F>(self: Arc<Self>, component: P, factories: F) -> MonitorSource
    where
        C: Any,
        P: Provider<C> + 'static,
        F: Provider<Vec<Arc<dyn MonitorFactory>>> + 'static,
    {
        Arc::new(move || self.monitor(&component, &factories))
    }
}
