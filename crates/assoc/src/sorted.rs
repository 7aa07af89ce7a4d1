//! Multi-maps over totally ordered keys.
//!
//! With a sorted key equivalence the grouping keeps its buckets in key order
//! and indexes them through the same order tree, so navigation (`floor`,
//! `ceiling`, ...) and range views cost O(log n). A [`SortedRange`] stores
//! only its bounds and re-resolves them against the live grouping on every
//! call. A [`SortedCollapsedMap`] offers the same navigation over a
//! key-to-single-value view.

use std::cmp::Ordering;
use std::hash::Hash;
use std::ops::{Bound, Deref};

use sheaf_collect::{Data, EntryStream};
use sheaf_primitives::{
	CollectError, ElementId, Equality, Equivalence, KeyId, NaturalOrder, Rejection, Subscription,
};

use crate::collapsed::CollapsedMap;
use crate::error::OptionsError;
use crate::event::MapEvent;
use crate::grouping::GroupingView;
use crate::multimap::{MemberCollection, MultiEntry, MultiMap};
use crate::options::GroupingOptions;

/// A [`MultiMap`] whose keys iterate in their total order.
pub struct SortedMultiMap<K, V> {
	map: MultiMap<K, V>,
}

impl<K, V> Clone for SortedMultiMap<K, V> {
	fn clone(&self) -> Self {
		Self { map: self.map.clone() }
	}
}

impl<K, V> Deref for SortedMultiMap<K, V> {
	type Target = MultiMap<K, V>;

	fn deref(&self) -> &MultiMap<K, V> {
		&self.map
	}
}

impl<K: Data + Ord, V: Data + Eq + Hash> SortedMultiMap<K, V> {
	/// Keys in their natural order, values matched by equality.
	pub fn natural(source: EntryStream<K, V>, options: GroupingOptions) -> Self {
		Self {
			map: MultiMap::new(source, NaturalOrder, Equality, options),
		}
	}
}

impl<K: Data, V: Data> SortedMultiMap<K, V> {
	/// Fails with [`OptionsError::UnorderedKeys`] unless `order` reports a
	/// total order.
	pub fn new(
		source: EntryStream<K, V>,
		order: impl Equivalence<K> + 'static,
		values: impl Equivalence<V> + 'static,
		options: GroupingOptions,
	) -> Result<Self, OptionsError> {
		if !order.is_sorted() {
			return Err(OptionsError::UnorderedKeys);
		}
		Ok(Self {
			map: MultiMap::new(source, order, values, options),
		})
	}

	pub fn as_multimap(&self) -> &MultiMap<K, V> {
		&self.map
	}

	pub fn first_key(&self) -> Option<K> {
		self.grouping()
			.with_view(|view| view.key_at(0).map(|(_, k)| k.clone()))
	}

	pub fn last_key(&self) -> Option<K> {
		self.grouping().with_view(|view| {
			let last = view.len().checked_sub(1)?;
			view.key_at(last).map(|(_, k)| k.clone())
		})
	}

	/// Greatest key less than or equal to `key`.
	pub fn floor_key(&self, key: &K) -> Option<K> {
		self.navigate(|view| view.floor(key))
	}

	/// Least key greater than or equal to `key`.
	pub fn ceiling_key(&self, key: &K) -> Option<K> {
		self.navigate(|view| view.ceiling(key))
	}

	/// Greatest key strictly less than `key`.
	pub fn lower_key(&self, key: &K) -> Option<K> {
		self.navigate(|view| view.lower(key))
	}

	/// Least key strictly greater than `key`.
	pub fn higher_key(&self, key: &K) -> Option<K> {
		self.navigate(|view| view.higher(key))
	}

	pub fn floor_entry(&self, key: &K) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.floor_key(key)?)
	}

	pub fn ceiling_entry(&self, key: &K) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.ceiling_key(key)?)
	}

	pub fn lower_entry(&self, key: &K) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.lower_key(key)?)
	}

	pub fn higher_entry(&self, key: &K) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.higher_key(key)?)
	}

	pub fn first_entry(&self) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.first_key()?)
	}

	pub fn last_entry(&self) -> Option<MultiEntry<K, V>> {
		self.entry_for(&self.last_key()?)
	}

	/// Keys below `to` (inclusive when `inclusive`).
	pub fn head_map(&self, to: K, inclusive: bool) -> SortedRange<K, V> {
		self.range(Bound::Unbounded, bound(to, inclusive))
	}

	/// Keys from `from` upwards (inclusive when `inclusive`).
	pub fn tail_map(&self, from: K, inclusive: bool) -> SortedRange<K, V> {
		self.range(bound(from, inclusive), Bound::Unbounded)
	}

	pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> SortedRange<K, V> {
		self.range(bound(from, from_inclusive), bound(to, to_inclusive))
	}

	/// Live view of the keys between `lower` and `upper`.
	pub fn range(&self, lower: Bound<K>, upper: Bound<K>) -> SortedRange<K, V> {
		SortedRange {
			map: self.map.clone(),
			bounds: KeyBounds { lower, upper },
		}
	}

	/// Sorted view mapping each key to its first or last member.
	pub fn collapse_to_sorted_map(&self, use_first: bool) -> SortedCollapsedMap<K, V> {
		SortedCollapsedMap {
			map: self.map.collapse_to_map(use_first),
		}
	}

	fn navigate(&self, f: impl for<'a> FnOnce(&GroupingView<'a, K, V>) -> Option<(KeyId, &'a K)>) -> Option<K> {
		self.grouping().with_view(|view| f(view).map(|(_, k)| k.clone()))
	}
}

fn bound<K>(key: K, inclusive: bool) -> Bound<K> {
	if inclusive {
		Bound::Included(key)
	} else {
		Bound::Excluded(key)
	}
}

fn compare<K>(keys: &dyn Equivalence<K>, a: &K, b: &K) -> Ordering {
	keys.compare(a, b).unwrap_or(Ordering::Equal)
}

/// Bounds of a live range, resolved against the grouping on every use.
#[derive(Clone)]
struct KeyBounds<K> {
	lower: Bound<K>,
	upper: Bound<K>,
}

impl<K: Data> KeyBounds<K> {
	fn contains(&self, keys: &dyn Equivalence<K>, key: &K) -> bool {
		let above = match &self.lower {
			Bound::Included(lo) => compare(keys, key, lo) != Ordering::Less,
			Bound::Excluded(lo) => compare(keys, key, lo) == Ordering::Greater,
			Bound::Unbounded => true,
		};
		let below = match &self.upper {
			Bound::Included(hi) => compare(keys, key, hi) != Ordering::Greater,
			Bound::Excluded(hi) => compare(keys, key, hi) == Ordering::Less,
			Bound::Unbounded => true,
		};
		above && below
	}

	/// Key positions `start..end` covered by the range.
	fn span<V: Data>(&self, view: &GroupingView<'_, K, V>) -> (usize, usize) {
		let position = |key: &K, past: bool| {
			let below = view.lower_count(key).unwrap_or_default();
			if past && view.find(key).is_some() { below + 1 } else { below }
		};
		let start = match &self.lower {
			Bound::Included(lo) => position(lo, false),
			Bound::Excluded(lo) => position(lo, true),
			Bound::Unbounded => 0,
		};
		let end = match &self.upper {
			Bound::Included(hi) => position(hi, true),
			Bound::Excluded(hi) => position(hi, false),
			Bound::Unbounded => view.len(),
		};
		(start, end.max(start))
	}

	/// Key ids of the range, in key order.
	fn ids<V: Data>(&self, view: &GroupingView<'_, K, V>) -> Vec<KeyId> {
		let (start, end) = self.span(view);
		(start..end)
			.filter_map(|index| view.key_at(index).map(|(id, _)| id))
			.collect()
	}

	fn first<V: Data>(&self, view: &GroupingView<'_, K, V>) -> Option<KeyId> {
		let (start, end) = self.span(view);
		if start == end {
			return None;
		}
		view.key_at(start).map(|(id, _)| id)
	}

	fn last<V: Data>(&self, view: &GroupingView<'_, K, V>) -> Option<KeyId> {
		let (start, end) = self.span(view);
		if start == end {
			return None;
		}
		view.key_at(end - 1).map(|(id, _)| id)
	}

	/// Intersection with `lower..upper`.
	fn narrow(&self, keys: &dyn Equivalence<K>, lower: Bound<K>, upper: Bound<K>) -> Self {
		Self {
			lower: tighter(keys, self.lower.clone(), lower, Ordering::Greater),
			upper: tighter(keys, self.upper.clone(), upper, Ordering::Less),
		}
	}
}

/// Picks the more restrictive bound; `toward` is the direction in which a
/// key restricts more.
fn tighter<K>(keys: &dyn Equivalence<K>, current: Bound<K>, candidate: Bound<K>, toward: Ordering) -> Bound<K> {
	let (a, b) = match (&current, &candidate) {
		(Bound::Unbounded, _) => return candidate,
		(_, Bound::Unbounded) => return current,
		(Bound::Included(a) | Bound::Excluded(a), Bound::Included(b) | Bound::Excluded(b)) => (a, b),
	};
	match compare(keys, b, a) {
		Ordering::Equal if matches!(candidate, Bound::Excluded(_)) => candidate,
		Ordering::Equal => current,
		order if order == toward => candidate,
		_ => current,
	}
}

/// Live view of the keys of a [`SortedMultiMap`] within a range.
///
/// Keys outside the range are invisible, and adding under such a key is
/// rejected with [`Rejection::IllegalElement`].
pub struct SortedRange<K, V> {
	map: MultiMap<K, V>,
	bounds: KeyBounds<K>,
}

impl<K: Clone, V> Clone for SortedRange<K, V> {
	fn clone(&self) -> Self {
		Self {
			map: self.map.clone(),
			bounds: self.bounds.clone(),
		}
	}
}

impl<K: Data, V: Data> SortedRange<K, V> {
	pub fn lower_bound(&self) -> Bound<&K> {
		self.bounds.lower.as_ref()
	}

	pub fn upper_bound(&self) -> Bound<&K> {
		self.bounds.upper.as_ref()
	}

	pub fn in_range(&self, key: &K) -> bool {
		self.bounds.contains(self.map.grouping().key_equivalence(), key)
	}

	pub fn len(&self) -> usize {
		self.map.grouping().with_view(|view| {
			let (start, end) = self.bounds.span(view);
			end - start
		})
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<K> {
		self.map.grouping().with_view(|view| {
			self.bounds
				.ids(view)
				.into_iter()
				.filter_map(|id| view.key(id).cloned())
				.collect()
		})
	}

	pub fn first_key(&self) -> Option<K> {
		self.map
			.grouping()
			.with_view(|view| view.key(self.bounds.first(view)?).cloned())
	}

	pub fn last_key(&self) -> Option<K> {
		self.map
			.grouping()
			.with_view(|view| view.key(self.bounds.last(view)?).cloned())
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.in_range(key) && self.map.contains_key(key)
	}

	/// Members of `key`; `None` when `key` lies outside the range.
	pub fn get(&self, key: K) -> Option<MemberCollection<K, V>> {
		self.in_range(&key).then(|| self.map.get(key))
	}

	pub fn entries(&self) -> Vec<MultiEntry<K, V>> {
		self.keys()
			.iter()
			.filter_map(|key| self.map.entry_for(key))
			.collect()
	}

	pub fn values(&self) -> Vec<V> {
		self.entries().iter().flat_map(MultiEntry::values).collect()
	}

	pub fn add(&self, key: K, value: V) -> Result<ElementId, CollectError> {
		if !self.in_range(&key) {
			return Err(Rejection::IllegalElement.into());
		}
		self.map.add(key, value)
	}

	/// Part of this range below `to`.
	pub fn head_map(&self, to: K, inclusive: bool) -> SortedRange<K, V> {
		self.narrow(Bound::Unbounded, bound(to, inclusive))
	}

	/// Part of this range from `from` upwards.
	pub fn tail_map(&self, from: K, inclusive: bool) -> SortedRange<K, V> {
		self.narrow(bound(from, inclusive), Bound::Unbounded)
	}

	pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> SortedRange<K, V> {
		self.narrow(bound(from, from_inclusive), bound(to, to_inclusive))
	}

	fn narrow(&self, lower: Bound<K>, upper: Bound<K>) -> SortedRange<K, V> {
		SortedRange {
			map: self.map.clone(),
			bounds: self
				.bounds
				.narrow(self.map.grouping().key_equivalence(), lower, upper),
		}
	}
}

/// A [`CollapsedMap`] whose keys iterate in their total order, with
/// navigation and live range views.
pub struct SortedCollapsedMap<K, V> {
	map: CollapsedMap<K, V>,
}

impl<K, V> Clone for SortedCollapsedMap<K, V> {
	fn clone(&self) -> Self {
		Self { map: self.map.clone() }
	}
}

impl<K, V> Deref for SortedCollapsedMap<K, V> {
	type Target = CollapsedMap<K, V>;

	fn deref(&self) -> &CollapsedMap<K, V> {
		&self.map
	}
}

impl<K: Data, V: Data> SortedCollapsedMap<K, V> {
	/// Fails with [`OptionsError::UnorderedKeys`] unless `map` groups its keys
	/// under a total order.
	pub fn from_map(map: CollapsedMap<K, V>) -> Result<Self, OptionsError> {
		if !map.grouping().key_equivalence().is_sorted() {
			return Err(OptionsError::UnorderedKeys);
		}
		Ok(Self { map })
	}

	pub fn as_map(&self) -> &CollapsedMap<K, V> {
		&self.map
	}

	pub fn first_key(&self) -> Option<K> {
		self.first_entry().map(|(k, _)| k)
	}

	pub fn last_key(&self) -> Option<K> {
		self.last_entry().map(|(k, _)| k)
	}

	pub fn floor_key(&self, key: &K) -> Option<K> {
		self.floor_entry(key).map(|(k, _)| k)
	}

	pub fn ceiling_key(&self, key: &K) -> Option<K> {
		self.ceiling_entry(key).map(|(k, _)| k)
	}

	pub fn lower_key(&self, key: &K) -> Option<K> {
		self.lower_entry(key).map(|(k, _)| k)
	}

	pub fn higher_key(&self, key: &K) -> Option<K> {
		self.higher_entry(key).map(|(k, _)| k)
	}

	pub fn first_entry(&self) -> Option<(K, V)> {
		self.navigate(|view| view.key_at(0))
	}

	pub fn last_entry(&self) -> Option<(K, V)> {
		self.navigate(|view| view.key_at(view.len().checked_sub(1)?))
	}

	/// Greatest key less than or equal to `key`, with its value.
	pub fn floor_entry(&self, key: &K) -> Option<(K, V)> {
		self.navigate(|view| view.floor(key))
	}

	/// Least key greater than or equal to `key`, with its value.
	pub fn ceiling_entry(&self, key: &K) -> Option<(K, V)> {
		self.navigate(|view| view.ceiling(key))
	}

	pub fn lower_entry(&self, key: &K) -> Option<(K, V)> {
		self.navigate(|view| view.lower(key))
	}

	pub fn higher_entry(&self, key: &K) -> Option<(K, V)> {
		self.navigate(|view| view.higher(key))
	}

	pub fn head_map(&self, to: K, inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.range(Bound::Unbounded, bound(to, inclusive))
	}

	pub fn tail_map(&self, from: K, inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.range(bound(from, inclusive), Bound::Unbounded)
	}

	pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.range(bound(from, from_inclusive), bound(to, to_inclusive))
	}

	/// Live view of the keys between `lower` and `upper`.
	pub fn range(&self, lower: Bound<K>, upper: Bound<K>) -> SortedCollapsedRange<K, V> {
		SortedCollapsedRange {
			map: self.map.clone(),
			bounds: KeyBounds { lower, upper },
		}
	}

	fn navigate(&self, f: impl for<'a> FnOnce(&GroupingView<'a, K, V>) -> Option<(KeyId, &'a K)>) -> Option<(K, V)> {
		self.map.grouping().with_view(|view| {
			let (id, key) = f(view)?;
			let (_, value) = self.map.chosen_in(view, id)?;
			Some((key.clone(), value.clone()))
		})
	}
}

/// Live view of a [`SortedCollapsedMap`] within a key range.
///
/// Keys outside the range are invisible; putting under such a key is
/// rejected with [`Rejection::IllegalElement`].
pub struct SortedCollapsedRange<K, V> {
	map: CollapsedMap<K, V>,
	bounds: KeyBounds<K>,
}

impl<K: Clone, V> Clone for SortedCollapsedRange<K, V> {
	fn clone(&self) -> Self {
		Self {
			map: self.map.clone(),
			bounds: self.bounds.clone(),
		}
	}
}

impl<K: Data, V: Data> SortedCollapsedRange<K, V> {
	pub fn lower_bound(&self) -> Bound<&K> {
		self.bounds.lower.as_ref()
	}

	pub fn upper_bound(&self) -> Bound<&K> {
		self.bounds.upper.as_ref()
	}

	pub fn in_range(&self, key: &K) -> bool {
		self.bounds.contains(self.map.grouping().key_equivalence(), key)
	}

	pub fn len(&self) -> usize {
		self.map.grouping().with_view(|view| {
			let (start, end) = self.bounds.span(view);
			end - start
		})
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<K> {
		self.entries().into_iter().map(|(k, _)| k).collect()
	}

	pub fn entries(&self) -> Vec<(K, V)> {
		self.map.grouping().with_view(|view| {
			self.bounds
				.ids(view)
				.into_iter()
				.filter_map(|id| self.entry_in(view, id))
				.collect()
		})
	}

	pub fn first_entry(&self) -> Option<(K, V)> {
		self.map
			.grouping()
			.with_view(|view| self.entry_in(view, self.bounds.first(view)?))
	}

	pub fn last_entry(&self) -> Option<(K, V)> {
		self.map
			.grouping()
			.with_view(|view| self.entry_in(view, self.bounds.last(view)?))
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.in_range(key) && self.map.contains_key(key)
	}

	/// `None` for keys outside the range.
	pub fn get(&self, key: &K) -> Option<V> {
		if !self.in_range(key) {
			return None;
		}
		self.map.get(key)
	}

	pub fn can_put(&self, key: &K, value: &V) -> Option<Rejection> {
		if !self.in_range(key) {
			return Some(Rejection::IllegalElement);
		}
		self.map.can_put(key, value)
	}

	pub fn put(&self, key: K, value: V) -> Result<Option<V>, CollectError> {
		if !self.in_range(&key) {
			return Err(Rejection::IllegalElement.into());
		}
		self.map.put(key, value)
	}

	/// Keys outside the range are left alone.
	pub fn remove(&self, key: &K) -> Result<Option<V>, CollectError> {
		if !self.in_range(key) {
			return Ok(None);
		}
		self.map.remove(key)
	}

	/// Events for keys inside the range.
	pub fn subscribe(&self, listener: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		let bounds = self.bounds.clone();
		let keys = self.map.grouping().shared_keys();
		self.map.subscribe(move |event| {
			if bounds.contains(&*keys, &event.key) {
				listener(event);
			}
		})
	}

	pub fn head_map(&self, to: K, inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.narrow(Bound::Unbounded, bound(to, inclusive))
	}

	pub fn tail_map(&self, from: K, inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.narrow(bound(from, inclusive), Bound::Unbounded)
	}

	pub fn sub_map(&self, from: K, from_inclusive: bool, to: K, to_inclusive: bool) -> SortedCollapsedRange<K, V> {
		self.narrow(bound(from, from_inclusive), bound(to, to_inclusive))
	}

	fn narrow(&self, lower: Bound<K>, upper: Bound<K>) -> SortedCollapsedRange<K, V> {
		SortedCollapsedRange {
			map: self.map.clone(),
			bounds: self
				.bounds
				.narrow(self.map.grouping().key_equivalence(), lower, upper),
		}
	}

	fn entry_in(&self, view: &GroupingView<'_, K, V>, id: KeyId) -> Option<(K, V)> {
		let key = view.key(id)?;
		let (_, value) = self.map.chosen_in(view, id)?;
		Some((key.clone(), value.clone()))
	}
}
