//! Key to single value view of a grouping.
//!
//! A [`CollapsedMap`] maps each key to one of its members: the first in
//! source order, or the last. Its events are the grouping's events narrowed
//! to those that change what a key maps to: a key appearing, a key
//! disappearing, or the chosen member being replaced or changing value.
//! Adds and removes of other members are silent.
//!
//! # Invariants
//!
//! - The cached choice per key always matches the grouping's first (or
//!   last) member once an event has been dispatched.
//!   - Enforced in: `CollapsedInner::on_event`.
//!   - Tested by: `collapsed::tests::tracks_first_member`
//!   - Failure symptom: `Set` events report stale previous values.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sheaf_collect::Data;
use sheaf_primitives::{Cause, ChangeKind, CollectError, ElementId, KeyId, ListenerList, Rejection, Subscription};

use crate::event::{EventLevel, MapEvent, MultiMapEvent};
use crate::grouping::{GroupingManager, GroupingView};

pub type MapListener<K, V> = dyn Fn(&MapEvent<K, V>) + Send + Sync;

struct CollapsedInner<K, V> {
	grouping: GroupingManager<K, V>,
	use_first: bool,
	chosen: Mutex<FxHashMap<KeyId, (ElementId, V)>>,
	listeners: ListenerList<MapListener<K, V>>,
	_grouping: Subscription,
}

/// Live map from each key to its first or last member.
pub struct CollapsedMap<K, V> {
	inner: Arc<CollapsedInner<K, V>>,
}

impl<K, V> Clone for CollapsedMap<K, V> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

fn choose<'a, K: Data, V: Data>(
	view: &GroupingView<'a, K, V>,
	id: KeyId,
	use_first: bool,
) -> Option<(&'a ElementId, &'a V)> {
	if use_first {
		view.first_member(id)
	} else {
		view.last_member(id)
	}
}

impl<K: Data, V: Data> CollapsedMap<K, V> {
	pub fn new(grouping: GroupingManager<K, V>, use_first: bool) -> Self {
		let source = grouping.source().clone();
		let _read = source.lock_read();
		let chosen: FxHashMap<KeyId, (ElementId, V)> = grouping.with_view(|view| {
			view.key_ids()
				.filter_map(|id| choose(view, id, use_first).map(|(e, v)| (id, (e.clone(), v.clone()))))
				.collect()
		});

		let inner = Arc::new_cyclic(|weak: &Weak<CollapsedInner<K, V>>| {
			let weak = weak.clone();
			let subscription = grouping.subscribe_with_view(move |event, view| {
				if let Some(inner) = weak.upgrade() {
					inner.on_event(event, view);
				}
			});
			CollapsedInner {
				grouping,
				use_first,
				chosen: Mutex::new(chosen),
				listeners: ListenerList::new(),
				_grouping: subscription,
			}
		});
		Self { inner }
	}

	pub fn grouping(&self) -> &GroupingManager<K, V> {
		&self.inner.grouping
	}

	pub fn uses_first(&self) -> bool {
		self.inner.use_first
	}

	pub fn len(&self) -> usize {
		self.inner.grouping.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn get(&self, key: &K) -> Option<V> {
		self.chosen_for(key).map(|(_, v)| v)
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.inner.grouping.with_view(|view| view.find(key).is_some())
	}

	/// Keys in key order.
	pub fn keys(&self) -> Vec<K> {
		self.inner
			.grouping
			.with_view(|view| view.keys().map(|(_, k)| k.clone()).collect())
	}

	pub fn entries(&self) -> Vec<(K, V)> {
		let use_first = self.inner.use_first;
		self.inner.grouping.with_view(|view| {
			view.keys()
				.filter_map(|(id, key)| choose(view, id, use_first).map(|(_, v)| (key.clone(), v.clone())))
				.collect()
		})
	}

	/// Why [`Self::put`] would be rejected, if it would.
	pub fn can_put(&self, key: &K, value: &V) -> Option<Rejection> {
		let source = self.inner.grouping.source();
		match self.chosen_for(key) {
			Some((element, _)) => source.is_acceptable(&element, key, value),
			None => source.can_add(key, value),
		}
	}

	/// Replaces the value `key` maps to in place, or adds a new member when
	/// the key is absent. Returns the previous value.
	pub fn put(&self, key: K, value: V) -> Result<Option<V>, CollectError> {
		let mut tx = self.inner.grouping.source().lock_write(Cause::new("put"));
		match self.chosen_for(&key) {
			Some((element, _)) => tx.set_value(&element, value).map(Some),
			None => tx.add(key, value).map(|_| None),
		}
	}

	/// Removes every member of `key`, returning the value it mapped to.
	pub fn remove(&self, key: &K) -> Result<Option<V>, CollectError> {
		if self.inner.grouping.source().is_read_only() {
			return Err(Rejection::ReadOnly.into());
		}
		let mut tx = self.inner.grouping.source().lock_write(Cause::new("remove"));
		let Some((chosen, previous)) = self.chosen_for(key) else {
			return Ok(None);
		};
		// The chosen member goes last so the key is removed without first
		// mapping to another member.
		let mut doomed = self
			.inner
			.grouping
			.with_view(|view| crate::multimap::member_ids(view, key));
		doomed.retain(|element| *element != chosen);
		doomed.push(chosen);
		for element in &doomed {
			tx.remove(element)?;
		}
		Ok(Some(previous))
	}

	pub fn subscribe(&self, listener: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		self.inner.listeners.add(Arc::new(listener))
	}

	/// Events for keys equivalent to `key`, whether or not the key currently
	/// exists.
	pub fn observe(&self, key: K, listener: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		let keys = self.inner.grouping.shared_keys();
		self.subscribe(move |event| {
			if keys.equivalent(&event.key, &key) {
				listener(event);
			}
		})
	}

	pub fn on_commit(&self, listener: impl Fn(&Cause) + Send + Sync + 'static) -> Subscription {
		self.inner.grouping.on_commit(listener)
	}

	/// The member `id` maps to within `view`.
	pub(crate) fn chosen_in<'a>(&self, view: &GroupingView<'a, K, V>, id: KeyId) -> Option<(&'a ElementId, &'a V)> {
		choose(view, id, self.inner.use_first)
	}

	fn chosen_for(&self, key: &K) -> Option<(ElementId, V)> {
		let use_first = self.inner.use_first;
		self.inner.grouping.with_view(|view| {
			let (element, value) = choose(view, view.find(key)?, use_first)?;
			Some((element.clone(), value.clone()))
		})
	}
}

impl<K: Data, V: Data> CollapsedInner<K, V> {
	fn on_event(&self, event: &MultiMapEvent<K, V>, view: &GroupingView<'_, K, V>) {
		let id = event.key_id;
		let change = match (event.level, event.kind) {
			(EventLevel::Key, ChangeKind::Remove) => {
				let previous = self.chosen.lock().remove(&id);
				Some((ChangeKind::Remove, previous.map(|(_, v)| v), None))
			}
			(EventLevel::Key, ChangeKind::Add) => {
				let Some((element, value)) = choose(view, id, self.use_first) else {
					return;
				};
				self.chosen
					.lock()
					.insert(id, (element.clone(), value.clone()));
				Some((ChangeKind::Add, None, Some(value.clone())))
			}
			_ => {
				let Some((element, value)) = choose(view, id, self.use_first) else {
					return;
				};
				let previous = self
					.chosen
					.lock()
					.insert(id, (element.clone(), value.clone()));
				let rewritten = event.is_value_event() && event.kind == ChangeKind::Set && event.element() == Some(element);
				match previous {
					Some((was, old)) if was != *element || rewritten => {
						Some((ChangeKind::Set, Some(old), Some(value.clone())))
					}
					Some(_) => None,
					None => Some((ChangeKind::Add, None, Some(value.clone()))),
				}
			}
		};
		let Some((kind, old, new)) = change else {
			return;
		};

		let map_event = MapEvent {
			kind,
			key_id: id,
			key_index: event.key_index,
			key: event.key.clone(),
			old,
			new,
			cause: event.cause.clone(),
		};
		for listener in self.listeners.snapshot().iter() {
			listener(&map_event);
		}
	}
}

impl<K: Data + std::fmt::Debug, V: Data + std::fmt::Debug> std::fmt::Debug for CollapsedMap<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_map().entries(self.entries()).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use sheaf_collect::EntryStream;

	use super::*;
	use crate::multimap::MultiMap;
	use crate::options::GroupingOptions;

	type Log = Arc<Mutex<Vec<(ChangeKind, u32, Option<&'static str>, Option<&'static str>)>>>;

	fn setup(use_first: bool) -> (EntryStream<u32, &'static str>, CollapsedMap<u32, &'static str>, Log) {
		let stream = EntryStream::new("collapsed");
		let map = MultiMap::with_equality(stream.clone(), GroupingOptions::default()).collapse_to_map(use_first);
		let log: Log = Arc::default();
		let sink = Arc::clone(&log);
		map.subscribe(move |e| sink.lock().push((e.kind, e.key, e.old, e.new)))
			.detach();
		(stream, map, log)
	}

	#[test]
	fn tracks_first_member() {
		let (stream, map, log) = setup(true);
		let a = stream.add(1, "a").unwrap();
		assert_eq!(map.get(&1), Some("a"));
		stream.add(1, "b").unwrap();
		assert_eq!(map.get(&1), Some("a"));
		stream.remove(&a).unwrap();
		assert_eq!(map.get(&1), Some("b"));
		assert_eq!(
			*log.lock(),
			vec![
				(ChangeKind::Add, 1, None, Some("a")),
				(ChangeKind::Set, 1, Some("a"), Some("b"))
			]
		);
	}

	#[test]
	fn tracks_last_member() {
		let (stream, map, log) = setup(false);
		stream.add(1, "a").unwrap();
		stream.add(1, "b").unwrap();
		stream.add(2, "x").unwrap();
		assert_eq!(map.entries(), vec![(1, "b"), (2, "x")]);
		assert_eq!(
			*log.lock(),
			vec![
				(ChangeKind::Add, 1, None, Some("a")),
				(ChangeKind::Set, 1, Some("a"), Some("b")),
				(ChangeKind::Add, 2, None, Some("x"))
			]
		);
	}

	#[test]
	fn value_updates_only_surface_for_the_chosen_member() {
		let (stream, map, log) = setup(true);
		let a = stream.add(1, "a").unwrap();
		let b = stream.add(1, "b").unwrap();
		stream.set_value(&b, "b2").unwrap();
		stream.set_value(&a, "a2").unwrap();
		assert_eq!(map.get(&1), Some("a2"));
		assert_eq!(log.lock().len(), 2);
		assert_eq!(log.lock()[1], (ChangeKind::Set, 1, Some("a"), Some("a2")));
	}

	#[test]
	fn put_and_remove_write_through() {
		let (stream, map, log) = setup(true);
		assert_eq!(map.put(1, "a"), Ok(None));
		assert_eq!(map.put(1, "b"), Ok(Some("a")));
		assert_eq!(stream.len(), 1);
		stream.add(1, "c").unwrap();
		assert_eq!(map.remove(&1), Ok(Some("b")));
		assert!(stream.is_empty());
		assert!(map.is_empty());
		let kinds: Vec<_> = log.lock().iter().map(|e| e.0).collect();
		assert_eq!(kinds, vec![ChangeKind::Add, ChangeKind::Set, ChangeKind::Remove]);
	}

	#[test]
	fn observe_follows_one_key_through_removal_and_return() {
		let (stream, map, _log) = setup(true);
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let _sub = map.observe(2, move |e| sink.lock().push((e.kind, e.old, e.new)));

		stream.add(1, "a").unwrap();
		let x = stream.add(2, "x").unwrap();
		stream.add(2, "y").unwrap();
		stream.remove(&x).unwrap();
		assert_eq!(map.remove(&2), Ok(Some("y")));
		map.put(2, "z").unwrap();
		assert_eq!(
			*seen.lock(),
			vec![
				(ChangeKind::Add, None, Some("x")),
				(ChangeKind::Set, Some("x"), Some("y")),
				(ChangeKind::Remove, Some("y"), None),
				(ChangeKind::Add, None, Some("z"))
			]
		);
	}

	#[test]
	fn read_only_source_rejects_puts() {
		let stream = EntryStream::builder("ro").entries([(1, "a")]).read_only().build();
		let map = MultiMap::with_equality(stream, GroupingOptions::default()).collapse_to_map(true);
		assert_eq!(map.can_put(&1, &"b"), Some(Rejection::ReadOnly));
		assert_eq!(map.can_put(&2, &"b"), Some(Rejection::ReadOnly));
		assert!(map.put(1, "b").is_err());
		assert!(map.remove(&1).is_err());
		assert_eq!(map.get(&1), Some("a"));
	}
}
