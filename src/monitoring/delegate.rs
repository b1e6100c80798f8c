use std::any::Any;
use std::sync::Arc;

use crate::error::Cause;
use crate::monitoring::{
    ComponentMonitor, MonitorFactory, MonitorRef, ProducerMonitor, ProducerToken,
    no_op_component_monitor, no_op_monitor, no_op_monitor_factory,
};
use crate::provider::Provider;
use crate::utils::isolate;

/// One or more delegates. The empty case is represented by the shared no-op
/// singleton of each family, so it never reaches this type.
pub(crate) enum Delegation<T> {
    Single(T),
    Many(Box<[T]>),
}

impl<T> Delegation<T> {
    pub(crate) fn of(mut delegates: Vec<T>) -> Option<Self> {
        match delegates.len() {
            0 => None,
            1 => delegates.pop().map(Delegation::Single),
            _ => Some(Delegation::Many(delegates.into_boxed_slice())),
        }
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        match self {
            Delegation::Single(delegate) => std::slice::from_ref(delegate),
            Delegation::Many(delegates) => delegates,
        }
    }
}

/// Composes factories into one factory that never panics.
///
/// With no factories this is the no-op factory. Otherwise every factory is
/// asked for its component monitor on its own; factories that panic or decline
/// are skipped and the rest are composed.
pub fn delegating_monitor_factory(factories: Vec<Arc<dyn MonitorFactory>>) -> Arc<dyn MonitorFactory> {
    match Delegation::of(factories) {
        None => no_op_monitor_factory(),
        Some(delegates) => Arc::new(IsolatedFactory(delegates)),
    }
}

/// Builds the component monitor for `component` without caching it.
///
/// Any panic while producing the factories or creating the monitors yields
/// the no-op component monitor.
pub fn create_monitor_for_component<C, F>(component: &C, factories: &F) -> Arc<dyn ComponentMonitor>
where
    C: Any,
    F: Provider<Vec<Arc<dyn MonitorFactory>>> + ?Sized,
{
    let created = isolate(|| delegating_monitor_factory(factories.get()).create(component));

    match created {
        Ok(Some(monitor)) => monitor,
        Ok(None) => no_op_component_monitor(),
        Err(panic) => {
            tracing::error!("panic while constructing monitor factories: {panic}");
            no_op_component_monitor()
        }
    }
}

/// Composes producer monitors into one monitor that never panics.
pub fn compose_producer_monitors(monitors: Vec<MonitorRef>) -> MonitorRef {
    match Delegation::of(monitors) {
        None => no_op_monitor(),
        Some(delegates) => Arc::new(IsolatedMonitor(delegates)),
    }
}

fn compose_component_monitors(monitors: Vec<Arc<dyn ComponentMonitor>>) -> Arc<dyn ComponentMonitor> {
    match Delegation::of(monitors) {
        None => no_op_component_monitor(),
        Some(delegates) => Arc::new(IsolatedComponentMonitor(delegates)),
    }
}

struct IsolatedFactory(Delegation<Arc<dyn MonitorFactory>>);

impl MonitorFactory for IsolatedFactory {
    fn create(&self, component: &dyn Any) -> Option<Arc<dyn ComponentMonitor>> {
        let monitors = self
            .0
            .as_slice()
            .iter()
            .enumerate()
            .filter_map(|(index, factory)| match isolate(|| factory.create(component)) {
                Ok(monitor) => monitor,
                Err(panic) => {
                    tracing::error!(factory = index, "panic while calling MonitorFactory::create: {panic}");
                    None
                }
            })
            .collect();

        Some(compose_component_monitors(monitors))
    }
}

struct IsolatedComponentMonitor(Delegation<Arc<dyn ComponentMonitor>>);

impl ComponentMonitor for IsolatedComponentMonitor {
    fn producer_monitor_for(&self, token: &ProducerToken) -> Option<MonitorRef> {
        let monitors = self
            .0
            .as_slice()
            .iter()
            .enumerate()
            .filter_map(|(index, monitor)| match isolate(|| monitor.producer_monitor_for(token)) {
                Ok(monitor) => monitor,
                Err(panic) => {
                    tracing::error!(
                        monitor = index,
                        %token,
                        "panic while calling ComponentMonitor::producer_monitor_for: {panic}"
                    );
                    None
                }
            })
            .collect();

        Some(compose_producer_monitors(monitors))
    }
}

struct IsolatedMonitor(Delegation<MonitorRef>);

impl IsolatedMonitor {
    fn forward(&self, method: &'static str, call: impl Fn(&dyn ProducerMonitor)) {
        for monitor in self.0.as_slice() {
            guard(method, || call(monitor.as_ref()));
        }
    }

    // Completion events unwind: the last attached monitor hears first.
    fn reverse(&self, method: &'static str, call: impl Fn(&dyn ProducerMonitor)) {
        for monitor in self.0.as_slice().iter().rev() {
            guard(method, || call(monitor.as_ref()));
        }
    }
}

fn guard(method: &'static str, call: impl FnOnce()) {
    if let Err(panic) = isolate(call) {
        tracing::error!(method, "panic while calling ProducerMonitor::{method}: {panic}");
    }
}

impl ProducerMonitor for IsolatedMonitor {
    fn requested(&self) {
        self.forward("requested", |monitor| monitor.requested());
    }

    fn method_starting(&self) {
        self.forward("method_starting", |monitor| monitor.method_starting());
    }

    fn method_finished(&self) {
        self.reverse("method_finished", |monitor| monitor.method_finished());
    }

    fn succeeded(&self, value: &dyn Any) {
        self.reverse("succeeded", |monitor| monitor.succeeded(value));
    }

    fn failed(&self, cause: &Cause) {
        self.reverse("failed", |monitor| monitor.failed(cause));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::testing::{EventLog, Exploding, Fixed, same};

    struct Declining;

    impl ComponentMonitor for Declining {
        fn producer_monitor_for(&self, _: &ProducerToken) -> Option<MonitorRef> {
            None
        }
    }

    struct FixedFactory(Arc<dyn ComponentMonitor>);

    impl MonitorFactory for FixedFactory {
        fn create(&self, _: &dyn Any) -> Option<Arc<dyn ComponentMonitor>> {
            Some(self.0.clone())
        }
    }

    struct PanickingFactory;

    impl MonitorFactory for PanickingFactory {
        fn create(&self, _: &dyn Any) -> Option<Arc<dyn ComponentMonitor>> {
            panic!("factory exploded")
        }
    }

    fn token() -> ProducerToken {
        ProducerToken::named("node")
    }

    #[test]
    fn test_zero_factories_is_no_op() {
        let factory = delegating_monitor_factory(vec![]);
        assert!(same(&factory, &no_op_monitor_factory()));
    }

    #[test]
    fn test_compose_zero_monitors_is_no_op() {
        assert!(same(&compose_producer_monitors(vec![]), &no_op_monitor()));
    }

    #[test]
    fn test_middle_monitor_panics() {
        let log = EventLog::new();
        let monitor = compose_producer_monitors(vec![
            log.monitor("first"),
            Arc::new(Exploding),
            log.monitor("third"),
        ]);

        monitor.requested();
        monitor.succeeded(&1u8);

        assert_eq!(
            log.events(),
            vec![
                "first:requested",
                "third:requested",
                "third:succeeded",
                "first:succeeded",
            ]
        );
    }

    #[test]
    fn test_ordering() {
        let log = EventLog::new();
        let monitor = compose_producer_monitors(vec![log.monitor("a"), log.monitor("b")]);

        monitor.requested();
        monitor.method_starting();
        monitor.method_finished();
        monitor.failed(&Cause::msg("x"));

        assert_eq!(
            log.events(),
            vec![
                "a:requested",
                "b:requested",
                "a:starting",
                "b:starting",
                "b:finished",
                "a:finished",
                "b:failed",
                "a:failed",
            ]
        );
    }

    #[test]
    fn test_single_monitor_is_isolated() {
        let monitor = compose_producer_monitors(vec![Arc::new(Exploding)]);
        monitor.requested();
        monitor.method_starting();
        monitor.method_finished();
        monitor.succeeded(&());
        monitor.failed(&Cause::msg("x"));
    }

    #[test]
    fn test_factories_skip_panics_and_declines() {
        let log = EventLog::new();
        let factory = delegating_monitor_factory(vec![
            Arc::new(FixedFactory(Arc::new(Fixed(log.monitor("kept"))))),
            Arc::new(PanickingFactory),
            Arc::new(FixedFactory(Arc::new(Declining))),
        ]);

        let component = factory.create(&()).unwrap();
        let monitor = component.producer_monitor_for(&token()).unwrap();
        monitor.requested();

        assert_eq!(log.events(), vec!["kept:requested"]);
    }

    #[test]
    fn test_all_declining_is_no_op() {
        let factory = delegating_monitor_factory(vec![
            Arc::new(FixedFactory(Arc::new(Declining))),
            Arc::new(FixedFactory(Arc::new(Declining))),
        ]);

        let monitor = factory
            .create(&())
            .unwrap()
            .producer_monitor_for(&token())
            .unwrap();
        assert!(same(&monitor, &no_op_monitor()));
    }

    #[test]
    fn test_create_monitor_for_component_survives_panicking_provider() {
        let factories = || -> Vec<Arc<dyn MonitorFactory>> { panic!("no factories for you") };
        let monitor = create_monitor_for_component(&(), &factories);
        assert!(same(&monitor, &no_op_component_monitor()));
    }
}
