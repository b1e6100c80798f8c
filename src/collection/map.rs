use std::sync::Arc;

use indexmap::IndexMap;

use crate::collection::{Key, shared_empty};
use crate::engine::{Compute, DynProducer, Immediate, Producer, ProducerNode, from_provider};
use crate::error::{Cause, ProducerError};
use crate::handle::{Handle, Outcome, Value};
use crate::monitoring::MonitorRef;
use crate::produced::Produced;
use crate::provider::Provider;

/// A frozen map from keys to the producers of their values.
pub type ProducerMap<K, V> = Arc<IndexMap<K, DynProducer<V>>>;

/// Produces a [`ProducerMap`] assembled ahead of time.
///
/// The map is fixed once built, so its producer is already settled.
pub struct MapOfProducerProducer<K, V>(std::marker::PhantomData<fn() -> (K, V)>);

impl<K: Key, V: Value> MapOfProducerProducer<K, V> {
    pub fn builder(capacity: usize) -> MapBuilder<K, V> {
        MapBuilder {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// The shared producer of the empty map.
    pub fn empty() -> DynProducer<ProducerMap<K, V>> {
        shared_empty()
    }
}

/// Collects the entries of a [`MapOfProducerProducer`].
///
/// ```rust,ignore
/// let mut builder = MapOfProducerProducer::builder(2);
/// builder.put("a", a)?.put_provider("b", || 2)?;
/// let map = builder.build();
/// ```
pub struct MapBuilder<K, V> {
    entries: IndexMap<K, DynProducer<V>>,
}

impl<K: Key, V: Value> MapBuilder<K, V> {
    /// Adds an entry. A key can be bound only once.
    pub fn put(&mut self, key: K, producer: DynProducer<V>) -> Result<&mut Self, ProducerError> {
        if self.entries.contains_key(&key) {
            return Err(ProducerError::DuplicateKey(format!("{key:?}")));
        }

        self.entries.insert(key, producer);
        Ok(self)
    }

    /// Adds an entry whose value comes from a plain supplier.
    pub fn put_provider<P>(&mut self, key: K, provider: P) -> Result<&mut Self, ProducerError>
    where
        P: Provider<V> + 'static,
    {
        self.put(key, Arc::new(from_provider(provider)))
    }

    pub fn build(self) -> DynProducer<ProducerMap<K, V>> {
        if self.entries.is_empty() {
            return MapOfProducerProducer::empty();
        }

        Arc::new(Immediate::value(Arc::new(self.entries)))
    }
}

/// An empty map that has already settled needs no fan-out at all.
fn is_settled_empty<K: Key, V: Value>(map: &Handle<ProducerMap<K, V>>) -> bool {
    matches!(map.peek(), Some(Ok(entries)) if entries.is_empty())
}

/// Requests the producer of every entry, in key order.
fn request_entries<K: Key, V: Value>(
    map: &IndexMap<K, DynProducer<V>>,
) -> (Vec<K>, Vec<Result<Handle<V>, ProducerError>>) {
    map.iter()
        .map(|(key, producer)| (key.clone(), producer.get()))
        .unzip()
}

/// Resolves a [`ProducerMap`] into the map of its values.
///
/// The whole map fails with the first failed entry in key order, once every
/// entry has settled.
pub struct MapProducer<K: Key, V: Value>(ProducerNode<IndexMap<K, V>, Merge<K, V>>);

impl<K: Key, V: Value> MapProducer<K, V> {
    pub fn create(map: DynProducer<ProducerMap<K, V>>) -> DynProducer<IndexMap<K, V>> {
        Arc::new(Self(ProducerNode::new(Merge(map))))
    }

    /// The shared, already settled producer of the empty map.
    pub fn empty() -> DynProducer<IndexMap<K, V>> {
        shared_empty()
    }
}

impl<K: Key, V: Value> Producer for MapProducer<K, V> {
    type Output = IndexMap<K, V>;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError> {
        self.0.get()
    }
}

struct Merge<K, V>(DynProducer<ProducerMap<K, V>>);

impl<K: Key, V: Value> Compute<IndexMap<K, V>> for Merge<K, V> {
    fn compute(&self, _: &MonitorRef) -> anyhow::Result<Handle<IndexMap<K, V>>> {
        let map = self.0.get()?;

        if is_settled_empty(&map) {
            return Ok(Handle::ready(IndexMap::new()));
        }

        Ok(map.chain(merge))
    }
}

fn merge<K: Key, V: Value>(map: Outcome<ProducerMap<K, V>>) -> Handle<IndexMap<K, V>> {
    let map = match map {
        Ok(map) => map,
        Err(cause) => return Handle::failed(cause),
    };

    let (keys, requests) = request_entries(&map);
    let handles = match requests.into_iter().collect::<Result<Vec<_>, _>>() {
        Ok(handles) => handles,
        Err(err) => return Handle::failed(Cause::new(err)),
    };

    Handle::settle_all(handles).then(move |outcomes| {
        keys.into_iter()
            .zip(outcomes?)
            .map(|(key, outcome)| Ok((key, outcome?)))
            .collect()
    })
}

/// Resolves a [`ProducerMap`] into a map of captured outcomes.
///
/// A failed entry becomes `Produced::Failed` under its key; only a failure of
/// the map itself fails the whole producer.
pub struct MapOfProducedProducer<K: Key, V: Value>(
    ProducerNode<IndexMap<K, Produced<V>>, Capture<K, V>>,
);

impl<K: Key, V: Value> MapOfProducedProducer<K, V> {
    pub fn create(map: DynProducer<ProducerMap<K, V>>) -> DynProducer<IndexMap<K, Produced<V>>> {
        Arc::new(Self(ProducerNode::new(Capture(map))))
    }

    pub fn empty() -> DynProducer<IndexMap<K, Produced<V>>> {
        shared_empty()
    }
}

impl<K: Key, V: Value> Producer for MapOfProducedProducer<K, V> {
    type Output = IndexMap<K, Produced<V>>;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError> {
        self.0.get()
    }
}

struct Capture<K, V>(DynProducer<ProducerMap<K, V>>);

impl<K: Key, V: Value> Compute<IndexMap<K, Produced<V>>> for Capture<K, V> {
    fn compute(&self, _: &MonitorRef) -> anyhow::Result<Handle<IndexMap<K, Produced<V>>>> {
        let map = self.0.get()?;

        if is_settled_empty(&map) {
            return Ok(Handle::ready(IndexMap::new()));
        }

        Ok(map.chain(capture))
    }
}

fn capture<K: Key, V: Value>(map: Outcome<ProducerMap<K, V>>) -> Handle<IndexMap<K, Produced<V>>> {
    let map = match map {
        Ok(map) => map,
        Err(cause) => return Handle::failed(cause),
    };

    let (keys, requests) = request_entries(&map);

    // An entry that cannot even be requested is captured like any other failure.
    let handles = requests
        .into_iter()
        .map(|request| match request {
            Ok(handle) => handle,
            Err(err) => Handle::failed(Cause::new(err)),
        })
        .collect();

    Handle::settle_all(handles).then(move |outcomes| {
        Ok(keys
            .into_iter()
            .zip(outcomes?)
            .map(|(key, outcome)| (key, Produced::from(outcome)))
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;

    use super::*;
    use crate::monitoring::testing::same;

    fn value(v: u32) -> DynProducer<u32> {
        Arc::new(Immediate::value(v))
    }

    fn failing(cause: &Cause) -> DynProducer<u32> {
        Arc::new(Immediate::<u32>::failed(cause.clone()))
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut builder = MapOfProducerProducer::<&str, u32>::builder(2);
        builder.put("a", value(1)).unwrap();

        let err = builder.put("a", value(2)).err().unwrap();
        assert_eq!(err.to_string(), "Map binding already contains key \"a\"");
    }

    #[test]
    fn test_merge_in_key_order() {
        let mut builder = MapOfProducerProducer::builder(3);
        builder
            .put("b", value(2))
            .unwrap()
            .put("a", value(1))
            .unwrap()
            .put_provider("c", || 3u32)
            .unwrap();
        let map = builder.build();

        let merged = block_on(MapProducer::create(map).get().unwrap()).unwrap();
        let entries: Vec<_> = merged.into_iter().collect();
        assert_eq!(entries, vec![("b", 2), ("a", 1), ("c", 3)]);
    }

    #[test]
    fn test_merge_fails_but_capsules_do_not() {
        let first = Cause::msg("first");
        let second = Cause::msg("second");

        let mut builder = MapOfProducerProducer::builder(3);
        builder
            .put("ok", value(1))
            .unwrap()
            .put("bad", failing(&first))
            .unwrap()
            .put("worse", failing(&second))
            .unwrap();
        let map = builder.build();

        let cause = block_on(MapProducer::create(map.clone()).get().unwrap()).unwrap_err();
        assert!(cause.ptr_eq(&first));

        let captured = block_on(MapOfProducedProducer::create(map).get().unwrap()).unwrap();
        assert_eq!(captured["ok"], Produced::Succeeded(1));
        assert_eq!(captured["bad"], Produced::Failed(first));
        assert_eq!(captured["worse"], Produced::Failed(second));
    }

    #[test]
    fn test_empty_map_is_already_resolved() {
        let requested = Arc::new(AtomicUsize::new(0));
        let counter = requested.clone();
        let map: DynProducer<ProducerMap<&'static str, u32>> = Arc::new(ProducerNode::new(
            move |_: &MonitorRef| -> anyhow::Result<Handle<ProducerMap<&'static str, u32>>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Handle::ready(Arc::new(IndexMap::new())))
            },
        ));

        let handle = MapProducer::create(map).get().unwrap();
        assert!(handle.is_resolved());
        assert!(block_on(handle).unwrap().is_empty());
        assert_eq!(requested.load(Ordering::SeqCst), 1);

        let empty = MapOfProducerProducer::<&str, u32>::builder(0).build();
        assert!(same(&empty, &MapOfProducerProducer::<&str, u32>::empty()));
        let captured = MapOfProducedProducer::create(empty).get().unwrap();
        assert!(captured.is_resolved());

        assert!(MapProducer::<&str, u32>::empty().get().unwrap().is_resolved());
    }

    #[test]
    fn test_map_failure_fails_capsule_map() {
        let cause = Cause::msg("no map");
        let map: DynProducer<ProducerMap<&'static str, u32>> =
            Arc::new(Immediate::<ProducerMap<&'static str, u32>>::failed(cause.clone()));

        let seen = block_on(MapOfProducedProducer::create(map).get().unwrap()).unwrap_err();
        assert!(seen.ptr_eq(&cause));
    }
}
