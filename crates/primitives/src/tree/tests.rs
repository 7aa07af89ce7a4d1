use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

fn tree_of(keys: &[i32]) -> RankedTree<i32, i32> {
	let mut tree = RankedTree::new();
	for &k in keys {
		tree.insert(k, k * 10);
	}
	tree
}

#[test]
fn iterates_in_key_order() {
	let tree = tree_of(&[5, 1, 9, 3, 7]);
	let keys: Vec<_> = tree.keys().copied().collect();
	assert_eq!(keys, vec![1, 3, 5, 7, 9]);
	assert_eq!(tree.len(), 5);
}

#[test]
fn insert_replaces_value_of_equal_key() {
	let mut tree = tree_of(&[1, 2]);
	assert_eq!(tree.insert(2, 99), Some(20));
	assert_eq!(tree.get(&2), Some(&99));
	assert_eq!(tree.len(), 2);
}

#[test]
fn rank_and_index_agree() {
	let tree = tree_of(&[10, 20, 30, 40]);
	for (i, k) in [10, 20, 30, 40].iter().enumerate() {
		assert_eq!(tree.rank(k), Some(i));
		assert_eq!(tree.get_index(i).map(|(k, _)| *k), Some(*k));
	}
	assert_eq!(tree.rank(&25), None);
	assert_eq!(tree.lower_count(&25), 2);
	assert_eq!(tree.lower_count(&10), 0);
	assert_eq!(tree.lower_count(&99), 4);
}

#[test]
fn neighbour_queries() {
	let tree = tree_of(&[10, 20, 30]);
	assert_eq!(tree.floor(&20).map(|(k, _)| *k), Some(20));
	assert_eq!(tree.floor(&25).map(|(k, _)| *k), Some(20));
	assert_eq!(tree.lower(&20).map(|(k, _)| *k), Some(10));
	assert_eq!(tree.ceiling(&21).map(|(k, _)| *k), Some(30));
	assert_eq!(tree.higher(&30), None);
	assert_eq!(tree.lower(&10), None);
	assert_eq!(tree.first().map(|(k, _)| *k), Some(10));
	assert_eq!(tree.last().map(|(k, _)| *k), Some(30));
}

#[test]
fn iter_from_skips_prefix() {
	let tree = tree_of(&[1, 2, 3, 4, 5, 6]);
	let tail: Vec<_> = tree.iter_from(4).map(|(k, _)| *k).collect();
	assert_eq!(tail, vec![5, 6]);
	assert_eq!(tree.iter_from(6).count(), 0);
	assert_eq!(tree.iter_from(2).len(), 4);
}

#[test]
fn custom_comparator_reverses_order() {
	let mut tree = RankedTree::with_comparator(FnCompare(|a: &i32, b: &i32| b.cmp(a)));
	for k in [1, 3, 2] {
		tree.insert(k, ());
	}
	let keys: Vec<_> = tree.keys().copied().collect();
	assert_eq!(keys, vec![3, 2, 1]);
}

#[derive(Debug, Clone)]
enum Op {
	Insert(i16, u8),
	Remove(i16),
}

fn op() -> impl Strategy<Value = Op> {
	prop_oneof![
		(any::<i16>().prop_map(|k| k % 64), any::<u8>()).prop_map(|(k, v)| Op::Insert(k, v)),
		any::<i16>().prop_map(|k| Op::Remove(k % 64)),
	]
}

proptest! {
	#[test]
	fn prop_matches_btreemap(ops in prop::collection::vec(op(), 1..200)) {
		let mut tree = RankedTree::new();
		let mut model = BTreeMap::new();
		for op in ops {
			match op {
				Op::Insert(k, v) => prop_assert_eq!(tree.insert(k, v), model.insert(k, v)),
				Op::Remove(k) => prop_assert_eq!(tree.remove(&k).map(|(_, v)| v), model.remove(&k)),
			}
			prop_assert_eq!(tree.len(), model.len());
		}
		let ours: Vec<_> = tree.iter().map(|(k, v)| (*k, *v)).collect();
		let theirs: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
		prop_assert_eq!(ours, theirs);
		for (i, k) in model.keys().enumerate() {
			prop_assert_eq!(tree.rank(k), Some(i));
			prop_assert_eq!(tree.lower_count(k), i);
		}
	}
}
