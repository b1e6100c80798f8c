//! Fan-in combinators over many producers.
//!
//! Each combinator asks every contributing producer for its handle as soon as
//! it is itself asked, so that all contributions run concurrently, and settles
//! once the last of them has. The plain variants fail as a whole with the first
//! failure in contribution order; the `Produced` variants capture each
//! outcome instead.

mod map;
mod set;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use crate::engine::{DynProducer, Immediate};
use crate::handle::Value;

pub use map::{MapBuilder, MapOfProducedProducer, MapOfProducerProducer, MapProducer, ProducerMap};
pub use set::{SetOfProducedProducer, SetProducer};

/// Anything usable as a map key.
pub trait Key: Value + Hash + Eq + std::fmt::Debug {}

impl<K> Key for K where K: Value + Hash + Eq + std::fmt::Debug {}

static EMPTY: LazyLock<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    LazyLock::new(Default::default);

/// The one settled producer of `T::default()`, shared per output type.
pub(crate) fn shared_empty<T: Value + Default>() -> DynProducer<T> {
    let mut cache = EMPTY.lock().unwrap_or_else(PoisonError::into_inner);

    let entry = cache.entry(TypeId::of::<T>()).or_insert_with(|| {
        let producer: DynProducer<T> = Arc::new(Immediate::value(T::default()));
        Box::new(producer)
    });

    match entry.downcast_ref::<DynProducer<T>>() {
        Some(producer) => producer.clone(),
        None => Arc::new(Immediate::value(T::default())),
    }
}

/// Drops repeated producers, keeping the first occurrence of each.
pub(crate) fn distinct<T: Value>(producers: Vec<DynProducer<T>>) -> Vec<DynProducer<T>> {
    let mut seen = std::collections::HashSet::new();
    producers
        .into_iter()
        .filter(|producer| seen.insert(Arc::as_ptr(producer).cast::<()>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;

    use super::*;
    use crate::engine::Producer;
    use crate::monitoring::testing::same;

    #[test]
    fn test_shared_empty_per_type() {
        let a = shared_empty::<IndexSet<u8>>();
        let b = shared_empty::<IndexSet<u8>>();
        let c = shared_empty::<IndexSet<u16>>();

        assert!(same(&a, &b));
        assert!(!same(&a, &c));
        assert!(a.get().unwrap().is_resolved());
    }

    #[test]
    fn test_distinct_by_identity() {
        let one: DynProducer<u8> = Arc::new(Immediate::value(1u8));
        let other_one: DynProducer<u8> = Arc::new(Immediate::value(1u8));

        let kept = distinct(vec![one.clone(), other_one.clone(), one.clone()]);
        assert_eq!(kept.len(), 2);
        assert!(same(&kept[0], &one));
        assert!(same(&kept[1], &other_one));
    }
}
