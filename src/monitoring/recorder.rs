use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Cause;
use crate::monitoring::{Delegation, NoOp, ProducerToken, no_op_singleton};
use crate::utils::isolate;

/// Receives the timings of one node.
///
/// `started` offsets are measured on the clock of the whole graph instance;
/// durations and latencies on the node's own stopwatch.
pub trait ProducerTimingRecorder: Send + Sync {
    /// The node's method body ran from `started` for `duration`.
    fn record_method(&self, _started: Duration, _duration: Duration) {}

    /// The node succeeded `latency` after its method started.
    fn record_success(&self, _latency: Duration) {}

    /// The node failed `latency` after its method started.
    fn record_failure(&self, _cause: &Cause, _latency: Duration) {}

    /// The node failed without ever running its method, usually because one
    /// of its inputs failed.
    fn record_skip(&self, _cause: &Cause) {}
}

pub trait ComponentTimingRecorder: Send + Sync {
    fn producer_timing_recorder_for(
        &self,
        token: &ProducerToken,
    ) -> Option<Arc<dyn ProducerTimingRecorder>>;
}

pub trait ComponentTimingRecorderFactory: Send + Sync {
    fn create(&self, component: &dyn Any) -> Option<Arc<dyn ComponentTimingRecorder>>;
}

impl ProducerTimingRecorder for NoOp {}

impl ComponentTimingRecorder for NoOp {
    fn producer_timing_recorder_for(&self, _: &ProducerToken) -> Option<Arc<dyn ProducerTimingRecorder>> {
        Some(no_op_singleton())
    }
}

impl ComponentTimingRecorderFactory for NoOp {
    fn create(&self, _: &dyn Any) -> Option<Arc<dyn ComponentTimingRecorder>> {
        Some(no_op_singleton())
    }
}

/// Composes recorder factories the same way monitors are composed: zero
/// factories give the no-op factory, and a panicking or declining recorder
/// never affects the others. Unlike monitors, recorders are always called in
/// attachment order.
pub fn delegating_timing_recorder_factory(
    factories: Vec<Arc<dyn ComponentTimingRecorderFactory>>,
) -> Arc<dyn ComponentTimingRecorderFactory> {
    match Delegation::of(factories) {
        None => no_op_singleton(),
        Some(delegates) => Arc::new(IsolatedFactory(delegates)),
    }
}

struct IsolatedFactory(Delegation<Arc<dyn ComponentTimingRecorderFactory>>);

impl ComponentTimingRecorderFactory for IsolatedFactory {
    fn create(&self, component: &dyn Any) -> Option<Arc<dyn ComponentTimingRecorder>> {
        let recorders: Vec<_> = self
            .0
            .as_slice()
            .iter()
            .enumerate()
            .filter_map(|(index, factory)| match isolate(|| factory.create(component)) {
                Ok(recorder) => recorder,
                Err(panic) => {
                    tracing::error!(
                        factory = index,
                        "panic while calling ComponentTimingRecorderFactory::create: {panic}"
                    );
                    None
                }
            })
            .collect();

        let recorder: Arc<dyn ComponentTimingRecorder> = match Delegation::of(recorders) {
            None => no_op_singleton(),
            Some(delegates) => Arc::new(IsolatedComponent(delegates)),
        };
        Some(recorder)
    }
}

struct IsolatedComponent(Delegation<Arc<dyn ComponentTimingRecorder>>);

impl ComponentTimingRecorder for IsolatedComponent {
    fn producer_timing_recorder_for(
        &self,
        token: &ProducerToken,
    ) -> Option<Arc<dyn ProducerTimingRecorder>> {
        let recorders: Vec<_> = self
            .0
            .as_slice()
            .iter()
            .enumerate()
            .filter_map(|(index, recorder)| {
                match isolate(|| recorder.producer_timing_recorder_for(token)) {
                    Ok(recorder) => recorder,
                    Err(panic) => {
                        tracing::error!(
                            recorder = index,
                            %token,
                            "panic while calling ComponentTimingRecorder::producer_timing_recorder_for: {panic}"
                        );
                        None
                    }
                }
            })
            .collect();

        let recorder: Arc<dyn ProducerTimingRecorder> = match Delegation::of(recorders) {
            None => no_op_singleton(),
            Some(delegates) => Arc::new(IsolatedRecorder(delegates)),
        };
        Some(recorder)
    }
}

struct IsolatedRecorder(Delegation<Arc<dyn ProducerTimingRecorder>>);

impl IsolatedRecorder {
    fn each(&self, method: &'static str, call: impl Fn(&dyn ProducerTimingRecorder)) {
        for recorder in self.0.as_slice() {
            if let Err(panic) = isolate(|| call(recorder.as_ref())) {
                tracing::error!(method, "panic while calling ProducerTimingRecorder::{method}: {panic}");
            }
        }
    }
}

impl ProducerTimingRecorder for IsolatedRecorder {
    fn record_method(&self, started: Duration, duration: Duration) {
        self.each("record_method", |recorder| recorder.record_method(started, duration));
    }

    fn record_success(&self, latency: Duration) {
        self.each("record_success", |recorder| recorder.record_success(latency));
    }

    fn record_failure(&self, cause: &Cause, latency: Duration) {
        self.each("record_failure", |recorder| recorder.record_failure(cause, latency));
    }

    fn record_skip(&self, cause: &Cause) {
        self.each("record_skip", |recorder| recorder.record_skip(cause));
    }
}
