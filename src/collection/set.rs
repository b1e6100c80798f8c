use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::collection::{distinct, shared_empty};
use crate::engine::{Compute, DynProducer, Producer, ProducerNode};
use crate::error::ProducerError;
use crate::handle::{Handle, Outcome, Value};
use crate::monitoring::MonitorRef;
use crate::produced::Produced;

type Contribution<T> = DynProducer<IndexSet<T>>;

/// The union of several set-valued producers.
///
/// Elements keep the order of their first appearance, contributions taken in
/// the order they were attached. The union fails if any contribution fails,
/// with the first failure in attachment order, but only after every
/// contribution has settled.
pub struct SetProducer<T: Value + Hash + Eq>(ProducerNode<IndexSet<T>, Union<T>>);

impl<T: Value + Hash + Eq> SetProducer<T> {
    /// Combines `contributions` into a single producer.
    ///
    /// Repeated producers are counted once. No contributions give the shared
    /// empty producer, and a single one is handed back as it is.
    pub fn create(contributions: Vec<Contribution<T>>) -> Contribution<T> {
        let mut contributions = distinct(contributions);

        match contributions.len() {
            0 => Self::empty(),
            1 => contributions.swap_remove(0),
            _ => Arc::new(Self(ProducerNode::new(Union(contributions.into())))),
        }
    }

    /// The shared, already settled producer of the empty set.
    pub fn empty() -> Contribution<T> {
        shared_empty()
    }
}

impl<T: Value + Hash + Eq> Producer for SetProducer<T> {
    type Output = IndexSet<T>;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError> {
        self.0.get()
    }
}

/// Requests every contribution up front, failing on the first synchronous error.
fn request_all<T: Value>(producers: &[DynProducer<T>]) -> Result<Vec<Handle<T>>, ProducerError> {
    producers.iter().map(|producer| producer.get()).collect()
}

struct Union<T>(Box<[Contribution<T>]>);

impl<T: Value + Hash + Eq> Compute<IndexSet<T>> for Union<T> {
    fn compute(&self, _: &MonitorRef) -> anyhow::Result<Handle<IndexSet<T>>> {
        let handles = request_all(&self.0)?;
        Ok(Handle::settle_all(handles).then(union))
    }
}

fn union<T: Value + Hash + Eq>(outcomes: Outcome<Vec<Outcome<IndexSet<T>>>>) -> Outcome<IndexSet<T>> {
    let mut union = IndexSet::new();
    for outcome in outcomes? {
        union.extend(outcome?);
    }
    Ok(union)
}

/// Like [`SetProducer`], but every contribution's outcome is kept.
///
/// A successful contribution adds one `Produced::Succeeded` per element; a
/// failed one adds a single `Produced::Failed`. The aggregate itself never
/// fails because of a contribution.
pub struct SetOfProducedProducer<T: Value + Hash + Eq>(
    ProducerNode<IndexSet<Produced<T>>, Capsules<T>>,
);

impl<T: Value + Hash + Eq> SetOfProducedProducer<T> {
    pub fn create(contributions: Vec<Contribution<T>>) -> DynProducer<IndexSet<Produced<T>>> {
        let contributions = distinct(contributions);

        if contributions.is_empty() {
            return Self::empty();
        }

        Arc::new(Self(ProducerNode::new(Capsules(contributions.into()))))
    }

    pub fn empty() -> DynProducer<IndexSet<Produced<T>>> {
        shared_empty()
    }
}

impl<T: Value + Hash + Eq> Producer for SetOfProducedProducer<T> {
    type Output = IndexSet<Produced<T>>;

    fn get(&self) -> Result<Handle<Self::Output>, ProducerError> {
        self.0.get()
    }
}

struct Capsules<T>(Box<[Contribution<T>]>);

impl<T: Value + Hash + Eq> Compute<IndexSet<Produced<T>>> for Capsules<T> {
    fn compute(&self, _: &MonitorRef) -> anyhow::Result<Handle<IndexSet<Produced<T>>>> {
        let handles = request_all(&self.0)?;
        Ok(Handle::settle_all(handles).then(capsules))
    }
}

fn capsules<T: Value + Hash + Eq>(
    outcomes: Outcome<Vec<Outcome<IndexSet<T>>>>,
) -> Outcome<IndexSet<Produced<T>>> {
    let mut capsules = IndexSet::new();
    for outcome in outcomes? {
        match outcome {
            Ok(set) => capsules.extend(set.into_iter().map(Produced::Succeeded)),
            Err(cause) => {
                capsules.insert(Produced::Failed(cause));
            }
        }
    }
    Ok(capsules)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;

    use super::*;
    use crate::engine::Immediate;
    use crate::error::Cause;
    use crate::monitoring::testing::same;

    fn set(values: &[u32]) -> Contribution<u32> {
        Arc::new(Immediate::value(values.iter().copied().collect::<IndexSet<u32>>()))
    }

    fn failing(cause: &Cause) -> Contribution<u32> {
        Arc::new(Immediate::<IndexSet<u32>>::failed(cause.clone()))
    }

    fn elements(set: IndexSet<u32>) -> Vec<u32> {
        set.into_iter().collect()
    }

    #[test]
    fn test_union_keeps_first_seen_order() {
        let union = SetProducer::create(vec![set(&[1, 2]), set(&[2, 3]), set(&[])]);
        let result = block_on(union.get().unwrap()).unwrap();
        assert_eq!(elements(result), vec![1, 2, 3]);
    }

    #[test]
    fn test_create_shortcuts() {
        assert!(same(&SetProducer::<u32>::create(vec![]), &SetProducer::<u32>::empty()));

        let only = set(&[4]);
        assert!(same(&SetProducer::create(vec![only.clone()]), &only));
        assert!(same(&SetProducer::create(vec![only.clone(), only.clone()]), &only));
    }

    #[test]
    fn test_union_first_failure_in_order() {
        let first = Cause::msg("first");
        let second = Cause::msg("second");
        let union = SetProducer::create(vec![set(&[1]), failing(&first), failing(&second)]);

        let cause = block_on(union.get().unwrap()).unwrap_err();
        assert!(cause.ptr_eq(&first));
    }

    #[test]
    fn test_union_fans_out_before_waiting() {
        let requested = Arc::new(AtomicUsize::new(0));

        let counted = |handle: Handle<IndexSet<u32>>| -> Contribution<u32> {
            let requested = requested.clone();
            let node = ProducerNode::new(move |_: &MonitorRef| -> anyhow::Result<Handle<IndexSet<u32>>> {
                requested.fetch_add(1, Ordering::SeqCst);
                Ok(handle.clone())
            });
            Arc::new(node)
        };

        let (first, first_handle) = Handle::pending();
        let (second, second_handle) = Handle::pending();
        let union = SetProducer::create(vec![counted(first_handle), counted(second_handle)]);
        let handle = union.get().unwrap();

        assert_eq!(requested.load(Ordering::SeqCst), 2);
        assert!(!handle.is_resolved());

        second.complete(Ok(IndexSet::from([2])));
        assert!(!handle.is_resolved());
        first.complete(Ok(IndexSet::from([1])));
        assert!(handle.is_resolved());

        assert_eq!(elements(block_on(handle).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_capsule_set_keeps_failures() {
        let cause = Cause::msg("offline");
        let capsules = SetOfProducedProducer::create(vec![set(&[1, 2]), failing(&cause), set(&[2])]);

        let result: Vec<_> = block_on(capsules.get().unwrap()).unwrap().into_iter().collect();
        assert_eq!(
            result,
            vec![
                Produced::Succeeded(1),
                Produced::Succeeded(2),
                Produced::Failed(cause),
            ]
        );
    }

    #[test]
    fn test_capsule_set_empty() {
        let empty = SetOfProducedProducer::<u32>::create(vec![]);
        assert!(same(&empty, &SetOfProducedProducer::<u32>::empty()));
        assert!(block_on(empty.get().unwrap()).unwrap().is_empty());
    }
}
