use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;

/// The failure of an asynchronous computation.
///
/// A `Cause` is shared rather than copied: every caller awaiting the same
/// failed node observes the very same instance, which is why equality and
/// hashing go by identity and not by message.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct Cause(#[from] pub(crate) Arc<anyhow::Error>);

impl Cause {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Creates a cause from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns `true` if both causes are the same failure instance.
    pub fn ptr_eq(&self, other: &Cause) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for Cause {
    fn from(e: anyhow::Error) -> Self {
        Cause(Arc::new(e))
    }
}

impl PartialEq for Cause {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Cause {}

impl Hash for Cause {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

/// Defects raised synchronously, before any asynchronous work has started.
///
/// These are never memoized: calling [`Producer::get`](crate::Producer::get)
/// again after a `Compute` error retries the compute step.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Producer '{token}' failed to start:\n{source}")]
    Compute {
        token: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Map binding already contains key {0}")]
    DuplicateKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_cause_identity() {
        let a = Cause::msg("boom");
        let b = a.clone();
        let c = Cause::msg("boom");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Cause> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cause_display() {
        let cause = Cause::new(anyhow::anyhow!("disk on fire"));
        assert_eq!(cause.to_string(), "disk on fire");
    }

    #[test]
    fn test_compute_error_message() {
        let err = ProducerError::Compute {
            token: "fetch".into(),
            source: anyhow::anyhow!("no executor"),
        };
        assert_eq!(err.to_string(), "Producer 'fetch' failed to start:\nno executor");
    }
}
