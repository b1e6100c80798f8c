use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Cause;
use crate::monitoring::{
    ComponentMonitor, ComponentTimingRecorder, ComponentTimingRecorderFactory, MonitorFactory,
    MonitorRef, ProducerMonitor, ProducerTimingRecorder, ProducerToken, no_op_singleton,
};

/// A monotonic time source.
pub trait Ticker: Send + Sync {
    /// Time elapsed since an arbitrary, fixed origin.
    fn read(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemTicker {
    origin: Instant,
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> Duration {
        self.origin.elapsed()
    }
}

struct Stopwatch {
    ticker: Arc<dyn Ticker>,
    started: Mutex<Option<Duration>>,
}

impl Stopwatch {
    fn unstarted(ticker: Arc<dyn Ticker>) -> Self {
        Self {
            ticker,
            started: Mutex::new(None),
        }
    }

    fn started(ticker: Arc<dyn Ticker>) -> Self {
        let stopwatch = Self::unstarted(ticker);
        stopwatch.start();
        stopwatch
    }

    /// Starting a running stopwatch keeps the original start.
    fn start(&self) {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        if started.is_none() {
            *started = Some(self.ticker.read());
        }
    }

    fn is_running(&self) -> bool {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn elapsed(&self) -> Duration {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        started.map_or(Duration::ZERO, |at| self.ticker.read().saturating_sub(at))
    }
}

/// Times one node and reports to its recorder.
struct TimingProducerMonitor {
    recorder: Arc<dyn ProducerTimingRecorder>,
    stopwatch: Stopwatch,
    component: Arc<Stopwatch>,
    offset: Mutex<Option<Duration>>,
}

impl ProducerMonitor for TimingProducerMonitor {
    fn method_starting(&self) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = Some(self.component.elapsed());
        self.stopwatch.start();
    }

    fn method_finished(&self) {
        let duration = self.stopwatch.elapsed();
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(started) = offset {
            self.recorder.record_method(started, duration);
        }
    }

    fn succeeded(&self, _: &dyn Any) {
        self.recorder.record_success(self.stopwatch.elapsed());
    }

    fn failed(&self, cause: &Cause) {
        if self.stopwatch.is_running() {
            self.recorder.record_failure(cause, self.stopwatch.elapsed());
        } else {
            self.recorder.record_skip(cause);
        }
    }
}

/// One per graph instance: owns the instance-wide clock.
struct TimingComponentMonitor {
    recorder: Arc<dyn ComponentTimingRecorder>,
    ticker: Arc<dyn Ticker>,
    stopwatch: Arc<Stopwatch>,
}

impl ComponentMonitor for TimingComponentMonitor {
    fn producer_monitor_for(&self, token: &ProducerToken) -> Option<MonitorRef> {
        let recorder = self
            .recorder
            .producer_timing_recorder_for(token)
            .unwrap_or_else(no_op_singleton_recorder);

        Some(Arc::new(TimingProducerMonitor {
            recorder,
            stopwatch: Stopwatch::unstarted(self.ticker.clone()),
            component: self.stopwatch.clone(),
            offset: Mutex::new(None),
        }))
    }
}

fn no_op_singleton_recorder() -> Arc<dyn ProducerTimingRecorder> {
    no_op_singleton()
}

/// A [`MonitorFactory`] that measures every node of a graph instance.
///
/// Each created component monitor starts its own clock, so method offsets are
/// relative to the moment the graph instance first asked for its monitor.
///
/// ```rust,ignore
/// let log = TimingLog::new();
/// let factory = TimingMonitorFactory::new(Arc::new(log.clone()));
/// let monitors = delegating_monitor_factory(vec![Arc::new(factory)]);
/// ```
pub struct TimingMonitorFactory {
    recorders: Arc<dyn ComponentTimingRecorderFactory>,
    ticker: Arc<dyn Ticker>,
}

impl TimingMonitorFactory {
    pub fn new(recorders: Arc<dyn ComponentTimingRecorderFactory>) -> Self {
        Self {
            recorders,
            ticker: Arc::new(SystemTicker::default()),
        }
    }

    /// Replaces the system clock, mostly useful in tests.
    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }
}

impl MonitorFactory for TimingMonitorFactory {
    fn create(&self, component: &dyn Any) -> Option<Arc<dyn ComponentMonitor>> {
        let recorder = self.recorders.create(component)?;

        Some(Arc::new(TimingComponentMonitor {
            recorder,
            ticker: self.ticker.clone(),
            stopwatch: Arc::new(Stopwatch::started(self.ticker.clone())),
        }))
    }
}
