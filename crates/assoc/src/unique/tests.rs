use pretty_assertions::assert_eq;
use rstest::rstest;
use sheaf_primitives::{Equality, NaturalOrder, OrderKey};

use super::*;
use crate::event::EventReplica;

/// Element ids in ascending source order.
fn ids(n: usize) -> Vec<ElementId> {
	let mut out: Vec<ElementId> = Vec::with_capacity(n);
	for serial in 0..n {
		let order = OrderKey::between(out.last().map(ElementId::order), None);
		out.push(ElementId::new(order, serial as u64));
	}
	out
}

fn hashed(policy: RepresentativePolicy, order: KeyOrder) -> UniqueState<&'static str, u32> {
	UniqueState::new(Arc::new(Equality), policy, order)
}

fn shape(events: &Events<&'static str, u32>) -> Vec<(EventLevel, ChangeKind, usize)> {
	events.iter().map(|e| (e.level, e.kind, e.key_index)).collect()
}

fn replay_matches(state: &UniqueState<&'static str, u32>, history: &Events<&'static str, u32>) {
	let mut replica = EventReplica::new();
	for event in history {
		replica.apply(event).unwrap();
	}
	assert_eq!(replica.into_groups(), state.groups());
}

#[test]
fn first_member_creates_bucket() {
	let e = ids(1);
	let mut state = hashed(RepresentativePolicy::Sticky, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[0].clone(), "a", 1, &cause, &mut out);
	assert_eq!(
		shape(&out),
		vec![
			(EventLevel::Key, ChangeKind::Add, 0),
			(EventLevel::Value, ChangeKind::Add, 0)
		]
	);
	assert_eq!(state.len(), 1);
	assert_eq!(state.value_count(), 1);
}

#[test]
fn last_member_removal_emits_single_key_remove() {
	let e = ids(2);
	let mut state = hashed(RepresentativePolicy::Sticky, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[0].clone(), "a", 1, &cause, &mut out);
	state.add(e[1].clone(), "b", 2, &cause, &mut out);
	out.clear();

	state.remove(&e[1], &cause, &mut out);
	assert_eq!(out.len(), 1);
	let event = &out[0];
	assert_eq!((event.level, event.kind, event.key), (EventLevel::Key, ChangeKind::Remove, "b"));
	assert_eq!(event.old_value(), Some(&2));
	assert_eq!(state.len(), 1);
	assert!(state.pending(event.key_id).is_some());
	state.clear_pending();
	assert!(state.pending(event.key_id).is_none());
}

#[rstest]
#[case::sticky(RepresentativePolicy::Sticky, 1, false)]
#[case::first(RepresentativePolicy::First, 0, true)]
#[case::last(RepresentativePolicy::Last, 1, false)]
fn earlier_insert_hands_off_only_under_first(
	#[case] policy: RepresentativePolicy,
	#[case] expected_rep: usize,
	#[case] key_set: bool,
) {
	let e = ids(2);
	let mut state = hashed(policy, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut history = Vec::new();
	state.add(e[1].clone(), "k", 10, &cause, &mut history);
	let mut out = Vec::new();
	state.add(e[0].clone(), "k", 20, &cause, &mut out);

	let slot = state.find(&"k").unwrap();
	assert_eq!(state.bucket(slot).unwrap().representative, e[expected_rep]);
	let has_key_set = out.iter().any(|ev| ev.is_key_event() && ev.kind == ChangeKind::Set);
	assert_eq!(has_key_set, key_set);
	history.extend(out);
	replay_matches(&state, &history);
}

#[rstest]
#[case::sticky(RepresentativePolicy::Sticky, 0)]
#[case::first(RepresentativePolicy::First, 0)]
#[case::last(RepresentativePolicy::Last, 2)]
fn appends_respect_policy(#[case] policy: RepresentativePolicy, #[case] expected_rep: usize) {
	let e = ids(3);
	let mut state = hashed(policy, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	for (i, id) in e.iter().enumerate() {
		state.add(id.clone(), "k", i as u32, &cause, &mut out);
	}
	let slot = state.find(&"k").unwrap();
	assert_eq!(state.bucket(slot).unwrap().representative, e[expected_rep]);
	replay_matches(&state, &out);
}

#[test]
fn representative_removal_fires_one_key_set() {
	let e = ids(2);
	let mut state = hashed(RepresentativePolicy::First, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[0].clone(), "k", 1, &cause, &mut out);
	state.add(e[1].clone(), "k", 2, &cause, &mut out);
	let mut removal = Vec::new();
	state.remove(&e[0], &cause, &mut removal);

	assert_eq!(
		shape(&removal),
		vec![
			(EventLevel::Value, ChangeKind::Remove, 0),
			(EventLevel::Key, ChangeKind::Set, 0)
		]
	);
	let set = &removal[1];
	assert_eq!(set.old_value(), Some(&1));
	assert_eq!(set.new_value(), Some(&2));
	out.extend(removal);
	replay_matches(&state, &out);
}

#[test]
fn source_order_hand_off_moves_bucket() {
	let e = ids(3);
	let mut state = hashed(RepresentativePolicy::First, KeyOrder::SourceOrder);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[1].clone(), "a", 1, &cause, &mut out);
	state.add(e[2].clone(), "b", 2, &cause, &mut out);
	let old_b = state.bucket(state.find(&"b").unwrap()).unwrap().id;

	let mut moved = Vec::new();
	state.add(e[0].clone(), "b", 0, &cause, &mut moved);
	assert_eq!(
		shape(&moved),
		vec![
			(EventLevel::Value, ChangeKind::Add, 1),
			(EventLevel::Key, ChangeKind::Remove, 1),
			(EventLevel::Key, ChangeKind::Add, 0),
			(EventLevel::Value, ChangeKind::Add, 0),
			(EventLevel::Value, ChangeKind::Add, 0),
		]
	);
	assert_eq!(moved[1].key_id, old_b);
	assert_ne!(moved[2].key_id, old_b);
	assert!(state.pending(old_b).is_some());
	out.extend(moved);
	replay_matches(&state, &out);
}

#[test]
fn value_event_precedes_the_key_set_it_causes() {
	let e = ids(2);
	let mut state = hashed(RepresentativePolicy::First, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut history = Vec::new();
	state.add(e[1].clone(), "k", 10, &cause, &mut history);

	let mut out = Vec::new();
	state.add(e[0].clone(), "k", 20, &cause, &mut out);
	assert_eq!(
		shape(&out),
		vec![
			(EventLevel::Value, ChangeKind::Add, 0),
			(EventLevel::Key, ChangeKind::Set, 0)
		]
	);
	assert_eq!(out[1].value.as_ref().map(|v| v.new), Some(Some(20)));
	history.extend(out);
	replay_matches(&state, &history);
}

#[test]
fn update_in_place_and_across_keys() {
	let e = ids(2);
	let mut state = hashed(RepresentativePolicy::Sticky, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[0].clone(), "a", 1, &cause, &mut out);
	state.add(e[1].clone(), "a", 2, &cause, &mut out);

	let mut set = Vec::new();
	state.update(&e[1], "a", 3, false, &cause, &mut set);
	assert_eq!(shape(&set), vec![(EventLevel::Value, ChangeKind::Set, 0)]);

	let mut rekey = Vec::new();
	state.update(&e[0], "a", 4, true, &cause, &mut rekey);
	assert_eq!(
		shape(&rekey),
		vec![
			(EventLevel::Value, ChangeKind::Set, 0),
			(EventLevel::Key, ChangeKind::Set, 0)
		]
	);

	let mut moved = Vec::new();
	state.update(&e[1], "b", 5, true, &cause, &mut moved);
	assert_eq!(
		shape(&moved),
		vec![
			(EventLevel::Value, ChangeKind::Remove, 0),
			(EventLevel::Key, ChangeKind::Add, 1),
			(EventLevel::Value, ChangeKind::Add, 1)
		]
	);

	for batch in [set, rekey, moved] {
		out.extend(batch);
	}
	replay_matches(&state, &out);
}

#[test]
fn sorted_mode_orders_and_navigates() {
	let e = ids(4);
	let mut state: UniqueState<u32, &'static str> =
		UniqueState::new(Arc::new(NaturalOrder), RepresentativePolicy::Sticky, KeyOrder::Sorted);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	for (id, key) in e.iter().zip([30, 10, 20, 10]) {
		state.add(id.clone(), key, "v", &cause, &mut out);
	}
	let keys: Vec<u32> = state.groups().into_iter().map(|g| g.key).collect();
	assert_eq!(keys, vec![10, 20, 30]);

	let key_of = |slot: Option<usize>| slot.and_then(|s| state.bucket(s)).map(|b| b.key);
	assert_eq!(key_of(state.floor(&25)), Some(20));
	assert_eq!(key_of(state.ceiling(&25)), Some(30));
	assert_eq!(key_of(state.lower(&10)), None);
	assert_eq!(key_of(state.higher(&10)), Some(20));
	assert_eq!(state.lower_count(&20), Some(1));

	let source: Vec<_> = e
		.iter()
		.cloned()
		.zip([30, 10, 20, 10])
		.map(|(id, key)| (id, Entry::new(key, "v")))
		.collect();
	state.check(&source, &Equality).unwrap();
}

#[test]
fn check_detects_missing_elements() {
	let e = ids(2);
	let mut state = hashed(RepresentativePolicy::Sticky, KeyOrder::Creation);
	let cause = Cause::new("test");
	let mut out = Vec::new();
	state.add(e[0].clone(), "a", 1, &cause, &mut out);
	let source = vec![
		(e[0].clone(), Entry::new("a", 1)),
		(e[1].clone(), Entry::new("a", 2)),
	];
	assert_eq!(
		state.check(&source, &Equality),
		Err(IntegrityViolation::Ungrouped(e[1].clone()))
	);
}
