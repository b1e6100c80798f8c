#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod collection;
pub mod engine;
mod error;
mod handle;
pub mod monitoring;
mod produced;
mod provider;
mod utils;

pub use crate::collection::{
    MapBuilder, MapOfProducedProducer, MapOfProducerProducer, MapProducer, ProducerMap,
    SetOfProducedProducer, SetProducer,
};
pub use crate::engine::{
    Compute, Dependencies, Dependency, DynProducer, Immediate, Method, Producer, ProducerNode,
    from_provider, produced,
};
pub use crate::error::{Cause, ProducerError};
pub use crate::handle::{Completer, Executor, Handle, Outcome, Value};
pub use crate::monitoring::{ComponentMonitor, MonitorFactory, ProducerMonitor, ProducerToken};
pub use crate::produced::Produced;
pub use crate::provider::{Instance, Provider};

/// Installs a `tracing` subscriber that prints to stderr, filtered by
/// `RUST_LOG` (defaults to `warn`).
///
/// Does nothing if a global subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
