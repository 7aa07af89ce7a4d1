//! Random stream edits checked against a model recomputed from scratch.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use sheaf_assoc::{EventReplica, GroupingManager, GroupingOptions, RepresentativePolicy};
use sheaf_collect::{EntryStream, Position};
use sheaf_primitives::{Equality, NaturalOrder, Subscription};

type Stream = EntryStream<u32, u32>;
type Replica = Arc<Mutex<EventReplica<u32, u32>>>;

#[derive(Debug, Clone)]
enum Op {
	Add(u32, u32),
	Prepend(u32, u32),
	InsertBefore(usize, u32, u32),
	InsertAfter(usize, u32, u32),
	Remove(usize),
	SetValue(usize, u32),
	SetEntry(usize, u32, u32),
}

fn arb_op() -> impl Strategy<Value = Op> {
	let key = 0u32..6;
	let value = 0u32..1000;
	prop_oneof![
		3 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Add(k, v)),
		1 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Prepend(k, v)),
		1 => (any::<usize>(), key.clone(), value.clone()).prop_map(|(i, k, v)| Op::InsertBefore(i, k, v)),
		1 => (any::<usize>(), key.clone(), value.clone()).prop_map(|(i, k, v)| Op::InsertAfter(i, k, v)),
		2 => any::<usize>().prop_map(Op::Remove),
		1 => (any::<usize>(), value.clone()).prop_map(|(i, v)| Op::SetValue(i, v)),
		2 => (any::<usize>(), key, value).prop_map(|(i, k, v)| Op::SetEntry(i, k, v)),
	]
}

fn arb_policy() -> impl Strategy<Value = RepresentativePolicy> {
	prop_oneof![
		Just(RepresentativePolicy::First),
		Just(RepresentativePolicy::Last),
		Just(RepresentativePolicy::Sticky),
	]
}

fn apply(stream: &Stream, op: &Op) {
	let pick = |index: usize| {
		let len = stream.len();
		(len > 0).then(|| stream.id_at(index % len)).flatten()
	};
	let result = match op {
		Op::Add(k, v) => stream.add(*k, *v).map(drop),
		Op::Prepend(k, v) => stream.insert(*k, *v, Position::First).map(drop),
		Op::InsertBefore(i, k, v) => match pick(*i) {
			Some(anchor) => stream.insert(*k, *v, Position::Before(anchor)).map(drop),
			None => stream.add(*k, *v).map(drop),
		},
		Op::InsertAfter(i, k, v) => match pick(*i) {
			Some(anchor) => stream.insert(*k, *v, Position::After(anchor)).map(drop),
			None => stream.add(*k, *v).map(drop),
		},
		Op::Remove(i) => match pick(*i) {
			Some(id) => stream.remove(&id).map(drop),
			None => Ok(()),
		},
		Op::SetValue(i, v) => match pick(*i) {
			Some(id) => stream.set_value(&id, *v).map(drop),
			None => Ok(()),
		},
		Op::SetEntry(i, k, v) => match pick(*i) {
			Some(id) => stream.set_entry(&id, *k, *v).map(drop),
			None => Ok(()),
		},
	};
	assert_eq!(result, Ok(()), "{op:?} was rejected");
}

fn follow(grouping: &GroupingManager<u32, u32>) -> (Replica, Subscription) {
	let replica: Replica = Arc::default();
	let sink = Arc::clone(&replica);
	let sub = grouping.subscribe_with_replay(move |event, _| {
		if let Err(violation) = sink.lock().apply(event) {
			panic!("replica rejected {event:?}: {violation}");
		}
	});
	(replica, sub)
}

/// Distinct keys of the source in order of first occurrence.
fn distinct_keys(stream: &Stream) -> Vec<u32> {
	let mut keys = Vec::new();
	for (_, entry) in stream.entries() {
		if !keys.contains(&entry.key) {
			keys.push(entry.key);
		}
	}
	keys
}

fn check_against_source(grouping: &GroupingManager<u32, u32>, stream: &Stream, replica: &Replica) -> Result<(), TestCaseError> {
	prop_assert_eq!(grouping.check_integrity(), Ok(()));

	let groups = grouping.groups();
	let replayed = replica.lock();
	prop_assert_eq!(replayed.groups(), groups.as_slice());
	drop(replayed);
	prop_assert_eq!(groups.len(), distinct_keys(stream).len());
	prop_assert_eq!(grouping.value_count(), stream.len());

	let entries = stream.entries();
	for group in &groups {
		let expected: Vec<_> = entries
			.iter()
			.filter(|(_, e)| e.key == group.key)
			.map(|(id, e)| (id.clone(), e.value))
			.collect();
		prop_assert_eq!(&group.members, &expected);
	}
	Ok(())
}

proptest! {
	/// The incremental grouping always equals a from-scratch grouping of the
	/// source, and its event history alone rebuilds it.
	#[test]
	fn prop_grouping_matches_source(
		ops in prop::collection::vec(arb_op(), 1..80),
		policy in arb_policy(),
		source_order in any::<bool>(),
	) {
		let stream = Stream::new("differential");
		let options = GroupingOptions::default()
			.with_representative(policy)
			.with_source_order(source_order);
		let grouping = GroupingManager::new(stream.clone(), Equality, Equality, options);
		let (replica, _sub) = follow(&grouping);

		for op in &ops {
			apply(&stream, op);
			check_against_source(&grouping, &stream, &replica)?;
		}
	}

	/// With source order kept under the first-member policy, buckets line up
	/// with each key's first occurrence in the source.
	#[test]
	fn prop_source_order_follows_first_occurrence(ops in prop::collection::vec(arb_op(), 1..80)) {
		let stream = Stream::new("source-order");
		let options = GroupingOptions::default()
			.with_representative(RepresentativePolicy::First)
			.with_source_order(true);
		let grouping = GroupingManager::new(stream.clone(), Equality, Equality, options);
		let (replica, _sub) = follow(&grouping);

		for op in &ops {
			apply(&stream, op);
			check_against_source(&grouping, &stream, &replica)?;
			let keys: Vec<u32> = grouping.groups().iter().map(|g| g.key).collect();
			prop_assert_eq!(keys, distinct_keys(&stream));
		}
	}

	/// Sorted buckets stay in ascending key order under any edit sequence.
	#[test]
	fn prop_sorted_keys_stay_sorted(
		ops in prop::collection::vec(arb_op(), 1..80),
		policy in arb_policy(),
	) {
		let stream = Stream::new("sorted");
		let options = GroupingOptions::default().with_representative(policy);
		let grouping = GroupingManager::new(stream.clone(), NaturalOrder, Equality, options);
		let (replica, _sub) = follow(&grouping);

		for op in &ops {
			apply(&stream, op);
			check_against_source(&grouping, &stream, &replica)?;
			let keys: Vec<u32> = grouping.groups().iter().map(|g| g.key).collect();
			let mut expected = distinct_keys(&stream);
			expected.sort_unstable();
			prop_assert_eq!(keys, expected);
		}
	}
}
