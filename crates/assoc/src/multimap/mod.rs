//! Multi-map façade over a [`GroupingManager`].
//!
//! A [`MultiMap`] reads through its grouping and writes through the
//! grouping's source stream: every mutation opens a stream transaction
//! first, resolves the affected elements under it, and then applies plain
//! stream writes. The grouping turns those writes into key and value events
//! like any other source change.
//!
//! Collections handed out by the map ([`KeySet`], [`MemberCollection`],
//! [`MultiEntry`]) are live: they hold no copy of the data and always answer
//! from the grouping's current state.

use std::hash::Hash;

use sheaf_collect::{Data, EntryStream, StreamTransaction};
use sheaf_primitives::{
	Cause, CollectError, ElementId, Equality, Equivalence, KeyId, LockError, ReadTransaction, Rejection, Subscription,
};

use crate::collapsed::CollapsedMap;
use crate::event::MultiMapEvent;
use crate::grouping::{GroupingManager, GroupingView};
use crate::options::GroupingOptions;

mod members;

pub use members::{EntryState, KeySet, MemberCollection, MultiEntry};

/// Keys grouped from an [`EntryStream`], each with its members in source order.
pub struct MultiMap<K, V> {
	grouping: GroupingManager<K, V>,
}

impl<K, V> Clone for MultiMap<K, V> {
	fn clone(&self) -> Self {
		Self {
			grouping: self.grouping.clone(),
		}
	}
}

impl<K: Data + Eq + Hash, V: Data + Eq + Hash> MultiMap<K, V> {
	/// Groups by `Eq`/`Hash` key equality and matches values the same way.
	pub fn with_equality(source: EntryStream<K, V>, options: GroupingOptions) -> Self {
		Self::new(source, Equality, Equality, options)
	}
}

impl<K: Data, V: Data> MultiMap<K, V> {
	pub fn new(
		source: EntryStream<K, V>,
		keys: impl Equivalence<K> + 'static,
		values: impl Equivalence<V> + 'static,
		options: GroupingOptions,
	) -> Self {
		Self::from_grouping(GroupingManager::new(source, keys, values, options))
	}

	pub fn from_grouping(grouping: GroupingManager<K, V>) -> Self {
		Self { grouping }
	}

	pub fn grouping(&self) -> &GroupingManager<K, V> {
		&self.grouping
	}

	pub fn source(&self) -> &EntryStream<K, V> {
		self.grouping.source()
	}

	/// Number of distinct keys.
	pub fn len(&self) -> usize {
		self.grouping.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of values across all keys.
	pub fn value_size(&self) -> usize {
		self.grouping.value_count()
	}

	pub fn key_set(&self) -> KeySet<K, V> {
		KeySet::new(self.grouping.clone())
	}

	/// Snapshot of the keys in key order.
	pub fn keys(&self) -> Vec<K> {
		self.grouping
			.with_view(|view| view.keys().map(|(_, k)| k.clone()).collect())
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.grouping.with_view(|view| view.find(key).is_some())
	}

	/// Whether `key` has a member equivalent to `value`.
	pub fn contains(&self, key: &K, value: &V) -> bool {
		self.find_member(key, value).is_some()
	}

	/// Live members of `key`. Empty until the key gains a member.
	pub fn get(&self, key: K) -> MemberCollection<K, V> {
		MemberCollection::new(self.grouping.clone(), key)
	}

	/// Every key with its live members, in key order.
	pub fn entry_set(&self) -> Vec<MultiEntry<K, V>> {
		self.grouping.with_view(|view| {
			view.keys()
				.map(|(id, key)| MultiEntry::live(id, MemberCollection::new(self.grouping.clone(), key.clone())))
				.collect()
		})
	}

	pub fn entry_for(&self, key: &K) -> Option<MultiEntry<K, V>> {
		self.grouping.with_view(|view| {
			let id = view.find(key)?;
			let key = view.key(id)?.clone();
			Some(MultiEntry::live(id, MemberCollection::new(self.grouping.clone(), key)))
		})
	}

	/// Entry for a key identity. While the removal of that key is being
	/// dispatched this yields an [`EntryState::PendingRemoved`] placeholder
	/// carrying the key and its last value.
	pub fn entry_by_id(&self, id: KeyId) -> Option<MultiEntry<K, V>> {
		self.grouping
			.with_view(|view| Self::entry_in(&self.grouping, view, id))
	}

	pub(crate) fn entry_in(
		grouping: &GroupingManager<K, V>,
		view: &GroupingView<'_, K, V>,
		id: KeyId,
	) -> Option<MultiEntry<K, V>> {
		if let Some(key) = view.key(id) {
			return Some(MultiEntry::live(id, MemberCollection::new(grouping.clone(), key.clone())));
		}
		let (key, last_value) = view.pending(id)?;
		Some(MultiEntry::pending(id, key.clone(), last_value.clone()))
	}

	/// All values, key by key.
	pub fn values(&self) -> Vec<V> {
		self.grouping.with_view(|view| {
			view.key_ids()
				.flat_map(|id| view.members(id).map(|(_, v)| v.clone()))
				.collect()
		})
	}

	/// One `(key, value)` pair per member, key by key.
	pub fn single_entries(&self) -> Vec<(K, V)> {
		self.grouping.with_view(|view| {
			view.keys()
				.flat_map(|(id, key)| view.members(id).map(move |(_, v)| (key.clone(), v.clone())))
				.collect()
		})
	}

	pub fn can_add(&self, key: &K, value: &V) -> Option<Rejection> {
		self.source().can_add(key, value)
	}

	pub fn add(&self, key: K, value: V) -> Result<ElementId, CollectError> {
		self.source().add(key, value)
	}

	/// Adds every value under `key` in one transaction. Nothing is added if
	/// any value would be rejected.
	pub fn add_all(&self, key: K, values: impl IntoIterator<Item = V>) -> Result<Vec<ElementId>, CollectError> {
		let values: Vec<V> = values.into_iter().collect();
		if let Some(rejection) = values.iter().find_map(|v| self.can_add(&key, v)) {
			return Err(rejection.into());
		}
		let mut tx = self.source().lock_write(Cause::new("add_all"));
		values.into_iter().map(|v| tx.add(key.clone(), v)).collect()
	}

	/// Removes the first member of `key` equivalent to `value`.
	pub fn remove(&self, key: &K, value: &V) -> Result<bool, CollectError> {
		self.writable()?;
		let mut tx = self.source().lock_write(Cause::new("remove"));
		match self.find_member(key, value) {
			Some(element) => {
				tx.remove(&element)?;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Removes every member of `key`, returning how many were removed.
	pub fn remove_all(&self, key: &K) -> Result<usize, CollectError> {
		self.writable()?;
		let mut tx = self.source().lock_write(Cause::new("remove_all"));
		let doomed = self.grouping.with_view(|view| member_ids(view, key));
		for element in &doomed {
			tx.remove(element)?;
		}
		Ok(doomed.len())
	}

	pub fn clear(&self) -> Result<usize, CollectError> {
		self.source().clear()
	}

	pub fn subscribe(&self, listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		self.grouping.subscribe(listener)
	}

	/// Replays the current contents, then follows live events.
	pub fn subscribe_with_replay(
		&self,
		listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static,
	) -> Subscription {
		self.grouping
			.subscribe_with_replay(move |event, _| listener(event))
	}

	/// Events concerning keys equivalent to `key`, whether or not the key
	/// currently exists.
	pub fn observe(&self, key: K, listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		let keys = self.grouping.shared_keys();
		self.grouping.subscribe(move |event| {
			if concerns(&*keys, event, &key) {
				listener(event);
			}
		})
	}

	pub fn on_commit(&self, listener: impl Fn(&Cause) + Send + Sync + 'static) -> Subscription {
		self.grouping.on_commit(listener)
	}

	pub fn on_batch(&self, listener: impl Fn(&[MultiMapEvent<K, V>]) + Send + Sync + 'static) -> Subscription {
		self.grouping.on_batch(listener)
	}

	/// Opens (or joins) a write transaction on the source.
	///
	/// # Panics
	///
	/// Panics when called from a listener of this map or its source.
	pub fn lock_write(&self, cause: Cause) -> StreamTransaction<'_, K, V> {
		self.source().lock_write(cause)
	}

	pub fn try_lock_write(&self, cause: Cause) -> Result<StreamTransaction<'_, K, V>, LockError> {
		self.source().try_lock_write(cause)
	}

	pub fn lock_read(&self) -> ReadTransaction<'_> {
		self.source().lock_read()
	}

	/// Key to representative map, taking each key's first member when
	/// `use_first` is set and its last member otherwise.
	pub fn collapse_to_map(&self, use_first: bool) -> CollapsedMap<K, V> {
		CollapsedMap::new(self.grouping.clone(), use_first)
	}

	fn writable(&self) -> Result<(), CollectError> {
		if self.source().is_read_only() {
			return Err(Rejection::ReadOnly.into());
		}
		Ok(())
	}

	fn find_member(&self, key: &K, value: &V) -> Option<ElementId> {
		let values = self.grouping.value_equivalence();
		self.grouping.with_view(|view| {
			let id = view.find(key)?;
			view.members(id)
				.find(|(_, v)| values.equivalent(v, value))
				.map(|(element, _)| element.clone())
		})
	}
}

impl<K: Data + std::fmt::Debug, V: Data + std::fmt::Debug> std::fmt::Debug for MultiMap<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.grouping.with_view(|view| {
			f.debug_map()
				.entries(view.keys().map(|(id, key)| (key, view.members(id).map(|(_, v)| v).collect::<Vec<_>>())))
				.finish()
		})
	}
}

/// Elements grouped under `key`, in member order.
pub(crate) fn member_ids<K: Data, V: Data>(view: &GroupingView<'_, K, V>, key: &K) -> Vec<ElementId> {
	view.find(key)
		.map(|id| view.members(id).map(|(e, _)| e.clone()).collect())
		.unwrap_or_default()
}

/// Whether `event` affects a key equivalent to `key`.
pub(crate) fn concerns<K, V>(keys: &dyn Equivalence<K>, event: &MultiMapEvent<K, V>, key: &K) -> bool {
	keys.equivalent(&event.key, key) || event.old_key.as_ref().is_some_and(|old| keys.equivalent(old, key))
}
