//! Machine-checkable invariants of the grouping engine.
//!
//! Each invariant is a `pub(crate) fn test_*()` that runs as a test and serves
//! as the link target of the "Tested by" entries in module docs.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use sheaf_collect::{EntryStream, Position};
use sheaf_primitives::{Cause, ChangeKind};

use crate::event::{EventLevel, EventReplica, MultiMapEvent};
use crate::grouping::GroupingManager;
use crate::multimap::MultiMap;
use crate::options::{GroupingOptions, RepresentativePolicy};
use crate::sorted::SortedMultiMap;

type Recorded = Arc<Mutex<Vec<MultiMapEvent<u32, &'static str>>>>;

fn record(map: &MultiMap<u32, &'static str>) -> Recorded {
	let log: Recorded = Arc::default();
	let sink = Arc::clone(&log);
	map.subscribe(move |event| sink.lock().push(event.clone()))
		.detach();
	log
}

fn representative(grouping: &GroupingManager<u32, &'static str>, key: u32) -> Option<&'static str> {
	grouping.with_view(|view| view.representative(view.find(&key)?).map(|(_, v)| *v))
}

/// Every source element belongs to exactly one bucket with an equivalent key,
/// and a bucket exists iff it has members.
///
/// - Enforced in: `UniqueState::add`, `UniqueState::remove`, `UniqueState::update`
/// - Failure symptom: a value listed under the wrong key, or an empty key left
///   in the key set.
#[cfg_attr(test, test)]
pub(crate) fn test_bucket_integrity() {
	let stream = EntryStream::new("integrity");
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default());
	let ids: Vec<_> = [(1, "a"), (2, "b"), (1, "c"), (3, "d"), (2, "e")]
		.into_iter()
		.map(|(k, v)| stream.add(k, v).unwrap())
		.collect();
	map.grouping().check_integrity().unwrap();

	stream.set_entry(&ids[0], 2, "a").unwrap();
	stream.remove(&ids[1]).unwrap();
	stream.insert(3, "f", Position::First).unwrap();
	stream.remove(&ids[3]).unwrap();
	map.grouping().check_integrity().unwrap();

	assert_eq!(map.keys(), vec![1, 2, 3]);
	assert_eq!(map.get(1).to_vec(), vec!["c"]);
	assert_eq!(map.get(2).to_vec(), vec!["a", "e"]);
	assert_eq!(map.get(3).to_vec(), vec!["f"]);
	assert_eq!(map.value_size(), 4);

	stream.remove(&ids[2]).unwrap();
	assert_eq!(map.keys(), vec![2, 3]);
	map.grouping().check_integrity().unwrap();
}

/// Under use-first the elected member stays representative while present,
/// whatever is appended to its bucket; the sticky policy additionally ignores
/// inserts ahead of it.
///
/// - Enforced in: `UniqueState::add`
/// - Failure symptom: collapsed map values flicker on unrelated adds.
#[cfg_attr(test, test)]
pub(crate) fn test_representative_stability() {
	let stream = EntryStream::new("stability");
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default().use_first(true));
	let log = record(&map);
	stream.add(1, "a").unwrap();
	for value in ["b", "c", "d"] {
		stream.add(1, value).unwrap();
		stream.add(2, value).unwrap();
		assert_eq!(representative(map.grouping(), 1), Some("a"));
	}
	let hand_offs = log
		.lock()
		.iter()
		.filter(|e| e.key == 1 && e.is_key_event() && e.kind == ChangeKind::Set)
		.count();
	assert_eq!(hand_offs, 0);

	let sticky_stream = EntryStream::new("sticky");
	let sticky = MultiMap::with_equality(
		sticky_stream.clone(),
		GroupingOptions::default().with_representative(RepresentativePolicy::Sticky),
	);
	sticky_stream.add(1, "a").unwrap();
	sticky_stream.insert(1, "z", Position::First).unwrap();
	assert_eq!(representative(sticky.grouping(), 1), Some("a"));

	// insert (1,"a"), insert (1,"b"), remove (1,"a") under use-first
	let stream = EntryStream::new("example");
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default().use_first(true));
	let a = stream.add(1, "a").unwrap();
	assert_eq!(representative(map.grouping(), 1), Some("a"));
	stream.add(1, "b").unwrap();
	assert_eq!(representative(map.grouping(), 1), Some("a"));
	assert_eq!(map.get(1).to_vec(), vec!["a", "b"]);

	let log = record(&map);
	stream.remove(&a).unwrap();
	assert_eq!(representative(map.grouping(), 1), Some("b"));
	let sets: Vec<_> = log
		.lock()
		.iter()
		.filter(|e| e.is_key_event() && e.kind == ChangeKind::Set)
		.map(|e| (e.old_value().copied(), e.new_value().copied()))
		.collect();
	assert_eq!(sets, vec![(Some("a"), Some("b"))]);
}

/// Replaying the event history from empty reproduces the grouping, and each
/// source operation emits only the events it must.
///
/// - Enforced in: `UniqueState::announce`, `UniqueState::destroy`,
///   `UniqueState::hand_off`
/// - Failure symptom: observers drift out of sync or see duplicate keys.
#[cfg_attr(test, test)]
pub(crate) fn test_event_completeness() {
	let stream = EntryStream::builder("completeness")
		.entries([(1, "a"), (2, "x")])
		.build();
	let map = MultiMap::with_equality(
		stream.clone(),
		GroupingOptions::default()
			.use_first(true)
			.with_source_order(true),
	);
	let replica = Arc::new(Mutex::new(EventReplica::new()));
	let sink = Arc::clone(&replica);
	map.subscribe_with_replay(move |event| sink.lock().apply(event).unwrap())
		.detach();
	let log = record(&map);

	// Sole member of key 2 goes: one key remove, nothing else.
	let x = stream.id_at(1).unwrap();
	stream.remove(&x).unwrap();
	{
		let log = log.lock();
		assert_eq!(log.len(), 1);
		assert_eq!((log[0].level, log[0].kind, log[0].key), (EventLevel::Key, ChangeKind::Remove, 2));
	}
	assert_eq!(map.key_set().to_vec(), vec![1]);

	// Key 3 created after key 1, then overtaken in source order.
	stream.add(3, "c").unwrap();
	stream.insert(3, "b", Position::First).unwrap();
	assert_eq!(map.keys(), vec![3, 1]);
	stream.add(1, "d").unwrap();
	let first = stream.first_id().unwrap();
	stream.set_entry(&first, 1, "b").unwrap();
	assert_eq!(map.keys(), vec![1, 3]);

	assert_eq!(replica.lock().groups(), map.grouping().groups().as_slice());
	map.grouping().check_integrity().unwrap();
}

/// Events of one transaction coalesce into a single commit, and the batch
/// alone rebuilds the structure.
///
/// - Enforced in: `StreamTransaction` drop, `GroupingInner::on_commit`
/// - Failure symptom: batched reactions fire once per record.
#[cfg_attr(test, test)]
pub(crate) fn test_coalescing() {
	let stream = EntryStream::new("coalescing");
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default());
	let replica = Arc::new(Mutex::new(EventReplica::new()));
	let commits = Arc::new(Mutex::new(0usize));
	let (sink, count) = (Arc::clone(&replica), Arc::clone(&commits));
	map.on_batch(move |events| {
		let mut replica = sink.lock();
		for event in events {
			replica.apply(event).unwrap();
		}
	})
	.detach();
	map.on_commit(move |_| *count.lock() += 1).detach();

	{
		let mut tx = map.lock_write(Cause::new("bulk"));
		for (key, value) in [(1, "a"), (2, "b"), (1, "c"), (3, "d")] {
			tx.add(key, value).unwrap();
		}
		let doomed = tx.stream().id_at(1).unwrap();
		tx.remove(&doomed).unwrap();
		map.add_all(4, ["e", "f"]).unwrap();
	}

	assert_eq!(*commits.lock(), 1);
	assert_eq!(replica.lock().groups(), map.grouping().groups().as_slice());
}

/// Keys of a sorted multi-map iterate in comparator order whatever the
/// insertion history.
///
/// - Enforced in: `PositionOrder` (sorted key positions)
/// - Failure symptom: range views skip or duplicate keys.
#[cfg_attr(test, test)]
pub(crate) fn test_sorted_order() {
	let stream = EntryStream::new("sorted");
	let map = SortedMultiMap::natural(stream.clone(), GroupingOptions::default());
	let mut ids = Vec::new();
	for key in [50u32, 10, 40, 20, 30, 10, 60] {
		ids.push(stream.insert(key, "v", Position::First).unwrap());
	}
	stream.remove(&ids[2]).unwrap();
	stream.set_entry(&ids[0], 5, "v").unwrap();

	let keys = map.keys();
	let mut sorted = keys.clone();
	sorted.sort();
	assert_eq!(keys, sorted);
	assert_eq!(keys, vec![5, 10, 20, 30, 60]);
	let entries: Vec<u32> = map.entry_set().iter().map(|e| *e.key()).collect();
	assert_eq!(entries, keys);
	map.grouping().check_integrity().unwrap();
}
