use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::Cause;
use crate::monitoring::{
    ComponentTimingRecorder, ComponentTimingRecorderFactory, ProducerTimingRecorder, ProducerToken,
};

/// How a timed node ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum TimingOutcome {
    /// Requested but not settled yet.
    Pending,
    Succeeded,
    Failed(String),
    /// Failed without running its method.
    Skipped(String),
}

/// Everything recorded about one node.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerTiming {
    pub token: String,
    /// Offset of the method start on the graph instance clock.
    #[serde(rename = "started_us", serialize_with = "micros")]
    pub started: Option<Duration>,
    #[serde(rename = "duration_us", serialize_with = "micros")]
    pub duration: Option<Duration>,
    /// From method start to settlement.
    #[serde(rename = "latency_us", serialize_with = "micros")]
    pub latency: Option<Duration>,
    pub outcome: TimingOutcome,
}

fn micros<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_some(&u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)),
        None => serializer.serialize_none(),
    }
}

type Entries = Arc<Mutex<IndexMap<ProducerToken, ProducerTiming>>>;

/// An in-memory timing recorder.
///
/// A single log is shared by every graph instance it is attached to, and keeps
/// nodes in the order they were first observed. Attach it through
/// [`TimingMonitorFactory`](crate::monitoring::TimingMonitorFactory), then read
/// the entries back or dump them as JSON once the graph has settled.
#[derive(Debug, Clone, Default)]
pub struct TimingLog {
    entries: Entries,
}

impl TimingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything recorded so far.
    pub fn timings(&self) -> Vec<ProducerTiming> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.timings())
    }

    fn recorder_for(&self, token: &ProducerToken) -> Arc<dyn ProducerTimingRecorder> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(token.clone())
            .or_insert_with(|| ProducerTiming {
                token: token.to_string(),
                started: None,
                duration: None,
                latency: None,
                outcome: TimingOutcome::Pending,
            });

        Arc::new(Entry {
            entries: self.entries.clone(),
            token: token.clone(),
        })
    }
}

impl ComponentTimingRecorder for TimingLog {
    fn producer_timing_recorder_for(
        &self,
        token: &ProducerToken,
    ) -> Option<Arc<dyn ProducerTimingRecorder>> {
        Some(self.recorder_for(token))
    }
}

impl ComponentTimingRecorderFactory for TimingLog {
    fn create(&self, _: &dyn Any) -> Option<Arc<dyn ComponentTimingRecorder>> {
        Some(Arc::new(self.clone()))
    }
}

struct Entry {
    entries: Entries,
    token: ProducerToken,
}

impl Entry {
    fn update(&self, f: impl FnOnce(&mut ProducerTiming)) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timing) = entries.get_mut(&self.token) {
            f(timing);
        }
    }
}

impl ProducerTimingRecorder for Entry {
    fn record_method(&self, started: Duration, duration: Duration) {
        self.update(|timing| {
            timing.started = Some(started);
            timing.duration = Some(duration);
        });
    }

    fn record_success(&self, latency: Duration) {
        self.update(|timing| {
            timing.latency = Some(latency);
            timing.outcome = TimingOutcome::Succeeded;
        });
    }

    fn record_failure(&self, cause: &Cause, latency: Duration) {
        self.update(|timing| {
            timing.latency = Some(latency);
            timing.outcome = TimingOutcome::Failed(cause.to_string());
        });
    }

    fn record_skip(&self, cause: &Cause) {
        self.update(|timing| timing.outcome = TimingOutcome::Skipped(cause.to_string()));
    }
}
