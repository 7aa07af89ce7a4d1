//! End-to-end behaviour of the multi-map, collapsed map and sorted views
//! through the public API only.

use std::ops::Bound;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use sheaf_assoc::{
	CollapsedMap, EntryState, EventLevel, EventReplica, GroupingOptions, MultiMap, OptionsError,
	RepresentativePolicy, SortedCollapsedMap, SortedMultiMap,
};
use sheaf_collect::{EntryStream, Position};
use sheaf_primitives::{Cause, ChangeKind, CollectError, Equality, Equivalence, Rejection};

type Stream = EntryStream<u32, &'static str>;
type Shape = Vec<(EventLevel, ChangeKind, u32)>;

fn init() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn multimap(options: GroupingOptions) -> (Stream, MultiMap<u32, &'static str>) {
	init();
	let stream = Stream::new("integration");
	let map = MultiMap::with_equality(stream.clone(), options);
	(stream, map)
}

fn record(map: &MultiMap<u32, &'static str>) -> Arc<Mutex<Shape>> {
	let log = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&log);
	map.subscribe(move |e| sink.lock().push((e.level, e.kind, e.key)))
		.detach();
	log
}

fn representative(map: &MultiMap<u32, &'static str>, key: u32) -> Option<&'static str> {
	map.grouping()
		.with_view(|view| view.representative(view.find(&key)?).map(|(_, v)| *v))
}

/// Groups keys by their remainder modulo nine.
struct ModNine;

impl Equivalence<u32> for ModNine {
	fn equivalent(&self, a: &u32, b: &u32) -> bool {
		a % 9 == b % 9
	}

	fn hash_key(&self, value: &u32) -> u64 {
		u64::from(value % 9)
	}
}

#[test]
fn use_first_sequence_keeps_then_hands_off() {
	let (stream, map) = multimap(GroupingOptions::default().use_first(true));
	let collapsed = map.collapse_to_map(true);
	let log = record(&map);

	let a = stream.add(1, "a").unwrap();
	assert_eq!(representative(&map, 1), Some("a"));
	assert_eq!(collapsed.entries(), vec![(1, "a")]);

	stream.add(1, "b").unwrap();
	assert_eq!(representative(&map, 1), Some("a"));
	assert_eq!(map.get(1).to_vec(), vec!["a", "b"]);
	assert_eq!(collapsed.entries(), vec![(1, "a")]);

	log.lock().clear();
	stream.remove(&a).unwrap();
	assert_eq!(representative(&map, 1), Some("b"));
	assert_eq!(collapsed.entries(), vec![(1, "b")]);
	assert_eq!(
		*log.lock(),
		vec![
			(EventLevel::Value, ChangeKind::Remove, 1),
			(EventLevel::Key, ChangeKind::Set, 1)
		]
	);
}

#[test]
fn removing_sole_member_emits_one_key_remove() {
	let (stream, map) = multimap(GroupingOptions::default());
	map.add_all(1, ["a", "b"]).unwrap();
	let x = map.add(2, "x").unwrap();
	let log = record(&map);

	stream.remove(&x).unwrap();
	assert_eq!(*log.lock(), vec![(EventLevel::Key, ChangeKind::Remove, 2)]);
	assert_eq!(map.key_set().to_vec(), vec![1]);
}

#[rstest]
#[case::first(RepresentativePolicy::First, "z")]
#[case::last(RepresentativePolicy::Last, "b")]
#[case::sticky(RepresentativePolicy::Sticky, "a")]
fn policy_elects_representative(#[case] policy: RepresentativePolicy, #[case] expected: &'static str) {
	let (stream, map) = multimap(GroupingOptions::default().with_representative(policy));
	stream.add(1, "a").unwrap();
	stream.add(1, "b").unwrap();
	stream.insert(1, "z", Position::First).unwrap();
	assert_eq!(representative(&map, 1), Some(expected));
	assert_eq!(map.get(1).to_vec(), vec!["z", "a", "b"]);
	map.grouping().check_integrity().unwrap();
}

#[test]
fn custom_equivalence_groups_by_remainder() {
	init();
	let stream = Stream::new("mod-nine");
	let map = MultiMap::new(stream.clone(), ModNine, Equality, GroupingOptions::default());
	let log = record(&map);
	let a = stream.add(1, "a").unwrap();
	stream.add(10, "b").unwrap();
	stream.add(2, "c").unwrap();
	stream.add(19, "d").unwrap();

	assert_eq!(map.keys(), vec![1, 2]);
	assert_eq!(map.get(28).to_vec(), vec!["a", "b", "d"]);
	assert!(map.contains_key(&37));
	assert!(!map.contains_key(&3));

	log.lock().clear();
	stream.remove(&a).unwrap();
	assert_eq!(map.keys(), vec![10, 2]);
	assert_eq!(
		*log.lock(),
		vec![
			(EventLevel::Value, ChangeKind::Remove, 1),
			(EventLevel::Key, ChangeKind::Set, 10)
		]
	);
	map.grouping().check_integrity().unwrap();
}

#[test]
fn collapsed_map_writes_through_to_the_source() {
	let (stream, map) = multimap(GroupingOptions::default());
	let collapsed: CollapsedMap<u32, &'static str> = map.collapse_to_map(false);
	collapsed.put(1, "a").unwrap();
	map.add(1, "b").unwrap();
	assert_eq!(collapsed.get(&1), Some("b"));

	assert_eq!(collapsed.put(1, "c"), Ok(Some("b")));
	assert_eq!(map.get(1).to_vec(), vec!["a", "c"]);
	assert_eq!(collapsed.remove(&1), Ok(Some("c")));
	assert!(stream.is_empty());
	assert_eq!(collapsed.remove(&1), Ok(None));
}

#[test]
fn sorted_ranges_are_live_and_nest() {
	init();
	let stream = Stream::new("sorted");
	let map = SortedMultiMap::natural(stream.clone(), GroupingOptions::default());
	for key in [50, 10, 40, 30, 20] {
		map.add(key, "v").unwrap();
	}

	assert_eq!(map.first_key(), Some(10));
	assert_eq!(map.last_key(), Some(50));
	assert_eq!(map.floor_key(&25), Some(20));
	assert_eq!(map.ceiling_key(&25), Some(30));
	assert_eq!(map.lower_key(&20), Some(10));
	assert_eq!(map.higher_key(&50), None);
	assert_eq!(map.floor_entry(&30).map(|e| *e.key()), Some(30));

	assert_eq!(map.head_map(30, false).keys(), vec![10, 20]);
	assert_eq!(map.head_map(30, true).keys(), vec![10, 20, 30]);
	assert_eq!(map.tail_map(30, false).keys(), vec![40, 50]);

	let sub = map.sub_map(20, true, 40, false);
	assert_eq!(sub.keys(), vec![20, 30]);
	assert_eq!(sub.tail_map(25, true).keys(), vec![30]);
	assert_eq!(sub.head_map(50, true).keys(), vec![20, 30]);
	assert_eq!(sub.head_map(50, true).upper_bound(), Bound::Excluded(&40));

	map.add(35, "w").unwrap();
	assert_eq!(sub.keys(), vec![20, 30, 35]);
	assert_eq!(sub.last_key(), Some(35));
	assert_eq!(sub.values(), vec!["v", "v", "w"]);

	assert_eq!(sub.add(60, "x"), Err(CollectError::Rejected(Rejection::IllegalElement)));
	assert!(sub.get(60).is_none());
	assert!(!sub.contains_key(&50));
	sub.add(25, "y").unwrap();
	assert_eq!(map.keys(), vec![10, 20, 25, 30, 35, 40, 50]);
}

#[test]
fn sorted_collapsed_map_navigates_live_ranges() {
	init();
	let stream = Stream::new("sorted");
	let map = SortedMultiMap::natural(stream.clone(), GroupingOptions::default());
	for (key, value) in [(30, "c"), (10, "a"), (20, "b"), (30, "c2"), (40, "d")] {
		map.add(key, value).unwrap();
	}
	let first = map.collapse_to_sorted_map(true);
	let last = map.collapse_to_sorted_map(false);

	assert_eq!(first.first_entry(), Some((10, "a")));
	assert_eq!(first.last_key(), Some(40));
	assert_eq!(first.floor_entry(&35), Some((30, "c")));
	assert_eq!(last.floor_entry(&35), Some((30, "c2")));
	assert_eq!(first.ceiling_key(&11), Some(20));
	assert_eq!(first.lower_key(&10), None);
	assert_eq!(first.higher_entry(&30), Some((40, "d")));

	let middle = first.sub_map(10, false, 40, false);
	assert_eq!(middle.entries(), vec![(20, "b"), (30, "c")]);
	assert_eq!(middle.head_map(30, false).keys(), vec![20]);
	assert_eq!(middle.tail_map(0, true).lower_bound(), Bound::Excluded(&10));
	assert_eq!(middle.get(&40), None);
	assert_eq!(middle.put(50, "e"), Err(CollectError::Rejected(Rejection::IllegalElement)));
	assert_eq!(middle.remove(&10), Ok(None));
	assert_eq!(first.get(&10), Some("a"));

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let _sub = middle.subscribe(move |e| sink.lock().push(e.key));
	map.add(25, "b2").unwrap();
	map.add(45, "e").unwrap();
	assert_eq!(middle.put(20, "b3"), Ok(Some("b")));
	assert_eq!(*seen.lock(), vec![25, 20]);
	assert_eq!(middle.first_entry(), Some((20, "b3")));
	assert_eq!(middle.len(), 3);
	assert_eq!(first.tail_map(40, true).keys(), vec![40, 45]);
}

#[test]
fn sorted_map_needs_a_total_order() {
	let stream = Stream::new("unordered");
	let result = SortedMultiMap::new(stream.clone(), Equality, Equality, GroupingOptions::default());
	assert!(matches!(result, Err(OptionsError::UnorderedKeys)));

	let hashed = MultiMap::with_equality(stream, GroupingOptions::default()).collapse_to_map(true);
	assert!(matches!(SortedCollapsedMap::from_map(hashed), Err(OptionsError::UnorderedKeys)));
}

#[test]
fn readers_on_other_threads_see_whole_transactions() {
	init();
	let stream = Stream::builder("atomic").entries([(1, "a"), (1, "b")]).build();
	let map = MultiMap::with_equality(stream, GroupingOptions::default());
	let (held_tx, held_rx) = mpsc::channel();
	let (release_tx, release_rx) = mpsc::channel::<()>();

	let writer = {
		let map = map.clone();
		thread::spawn(move || {
			let mut tx = map.lock_write(Cause::new("batch"));
			let first = tx.stream().first_id().unwrap();
			tx.remove(&first).unwrap();
			held_tx.send(()).unwrap();
			release_rx.recv().unwrap();
			tx.add(1, "c").unwrap();
		})
	};

	held_rx.recv().unwrap();
	let reader = {
		let map = map.clone();
		thread::spawn(move || (map.get(1).to_vec(), map.value_size()))
	};
	thread::sleep(Duration::from_millis(20));
	assert!(!reader.is_finished());

	release_tx.send(()).unwrap();
	writer.join().unwrap();
	assert_eq!(reader.join().unwrap(), (vec!["b", "c"], 2));
}

#[test]
fn transaction_coalesces_into_one_commit() {
	let (_stream, map) = multimap(GroupingOptions::default());
	let commits = Arc::new(Mutex::new(Vec::new()));
	let batches = Arc::new(Mutex::new(Vec::new()));
	let (c, b) = (Arc::clone(&commits), Arc::clone(&batches));
	let _commit = map.on_commit(move |cause| c.lock().push(cause.label()));
	let _batch = map.on_batch(move |events| b.lock().push(events.len()));

	{
		let mut tx = map.lock_write(Cause::new("import"));
		tx.add(1, "a").unwrap();
		tx.add(2, "b").unwrap();
		assert_eq!(map.keys(), vec![1, 2]);
		map.add(1, "c").unwrap();
		assert!(commits.lock().is_empty());
	}

	assert_eq!(*commits.lock(), vec!["import"]);
	// Two key adds with their value adds, plus one value add.
	assert_eq!(*batches.lock(), vec![5]);
}

#[test]
#[should_panic(expected = "reentrant write")]
fn writing_from_a_listener_panics() {
	let (_stream, map) = multimap(GroupingOptions::default());
	let writer = map.clone();
	let _sub = map.subscribe(move |event| {
		if event.is_key_event() {
			let _ = writer.add(99, "loop");
		}
	});
	let _ = map.add(1, "a");
}

#[test]
fn read_only_source_rejects_every_write_path() {
	init();
	let stream = Stream::builder("frozen").entries([(1, "a")]).read_only().build();
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default());
	let collapsed = map.collapse_to_map(true);
	let read_only = CollectError::Rejected(Rejection::ReadOnly);

	assert_eq!(map.can_add(&2, &"b"), Some(Rejection::ReadOnly));
	assert_eq!(map.add(2, "b").unwrap_err(), read_only);
	assert_eq!(map.clear().unwrap_err(), read_only);
	assert_eq!(collapsed.put(1, "z").unwrap_err(), read_only);
	assert_eq!(map.single_entries(), vec![(1, "a")]);
	assert_eq!(stream.len(), 1);
}

#[test]
fn removed_key_resolves_to_placeholder_during_dispatch() {
	let (stream, map) = multimap(GroupingOptions::default());
	let x = map.add(2, "x").unwrap();
	let seen = Arc::new(Mutex::new(None));
	let (sink, reader) = (Arc::clone(&seen), map.clone());
	let _sub = map.subscribe(move |event| {
		if event.is_key_event() && event.kind == ChangeKind::Remove {
			let state = reader.entry_by_id(event.key_id).map(|e| e.into_state());
			*sink.lock() = Some((reader.contains_key(&2), state));
		}
	});

	stream.remove(&x).unwrap();
	let (visible, state) = seen.lock().take().unwrap();
	assert!(!visible);
	assert!(matches!(
		state,
		Some(EntryState::PendingRemoved { key: 2, last_value: "x" })
	));
	assert!(map.entry_set().is_empty());
}

#[test]
fn replay_then_live_events_rebuild_the_grouping() {
	init();
	let stream = Stream::builder("replayed")
		.entries([(1, "a"), (2, "x"), (1, "b")])
		.build();
	let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default().with_source_order(true));
	let replica = Arc::new(Mutex::new(EventReplica::new()));
	let shape = Arc::new(Mutex::new(Vec::new()));
	let (r, s) = (Arc::clone(&replica), Arc::clone(&shape));
	let _sub = map.subscribe_with_replay(move |event| {
		r.lock().apply(event).unwrap();
		s.lock().push((event.level, event.kind, event.key));
	});
	assert_eq!(
		*shape.lock(),
		vec![
			(EventLevel::Key, ChangeKind::Add, 1),
			(EventLevel::Value, ChangeKind::Add, 1),
			(EventLevel::Value, ChangeKind::Add, 1),
			(EventLevel::Key, ChangeKind::Add, 2),
			(EventLevel::Value, ChangeKind::Add, 2)
		]
	);

	// Source becomes w, a, x, b. Re-keying "a" hands bucket 1 to "b", which
	// sits behind "x", and opens bucket 3 at the old position of "a".
	stream.insert(2, "w", Position::First).unwrap();
	let a = stream.id_at(1).unwrap();
	stream.set_entry(&a, 3, "a").unwrap();
	stream.add(3, "c").unwrap();
	assert_eq!(replica.lock().groups(), map.grouping().groups().as_slice());
	assert_eq!(map.keys(), vec![3, 2, 1]);
	map.grouping().check_integrity().unwrap();
}
