use proptest::prelude::*;

use super::*;

fn insert_at(keys: &mut Vec<OrderKey>, index: usize) {
	let lo = index.checked_sub(1).map(|i| &keys[i]);
	let hi = keys.get(index);
	let key = OrderKey::between(lo, hi);
	if let Some(lo) = lo {
		assert!(lo < &key, "{lo:?} !< {key:?}");
	}
	if let Some(hi) = hi {
		assert!(&key < hi, "{key:?} !< {hi:?}");
	}
	keys.insert(index, key);
}

#[test]
fn appends_stay_shallow() {
	let mut keys = Vec::new();
	for i in 0..10_000 {
		insert_at(&mut keys, i);
	}
	assert!(keys.windows(2).all(|w| w[0] < w[1]));
	assert!(keys.iter().all(|k| k.depth() <= 2), "append-only keys grew too deep");
}

#[test]
fn prepends_stay_ordered() {
	let mut keys = Vec::new();
	for _ in 0..5_000 {
		insert_at(&mut keys, 0);
	}
	assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn repeated_bisection_never_collides() {
	let lo = OrderKey::initial();
	let mut hi = OrderKey::between(Some(&lo), None);
	for _ in 0..200 {
		let mid = OrderKey::between(Some(&lo), Some(&hi));
		assert!(lo < mid && mid < hi);
		hi = mid;
	}
}

#[test]
fn keys_never_end_in_zero() {
	let mut keys = Vec::new();
	for i in 0..64 {
		insert_at(&mut keys, i / 2);
	}
	assert!(keys.iter().all(|k| k.digits().last().is_some_and(|d| *d != 0)));
}

#[test]
fn element_ids_order_by_position_then_serial() {
	let a = OrderKey::initial();
	let b = OrderKey::between(Some(&a), None);
	assert!(ElementId::new(a.clone(), 9) < ElementId::new(b, 1));
	assert_ne!(ElementId::new(a.clone(), 1), ElementId::new(a, 2));
}

proptest! {
	#[test]
	fn prop_random_inserts_keep_total_order(positions in prop::collection::vec(any::<prop::sample::Index>(), 1..300)) {
		let mut keys: Vec<OrderKey> = Vec::new();
		for pos in positions {
			let index = pos.index(keys.len() + 1);
			insert_at(&mut keys, index);
		}
		prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
	}
}
