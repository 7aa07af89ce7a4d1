use sheaf_collect::{Data, Position};
use sheaf_primitives::{Cause, CollectError, ElementId, KeyId, Rejection, Subscription};

use super::{concerns, member_ids};
use crate::event::MultiMapEvent;
use crate::grouping::GroupingManager;

/// Live members of one key, in source order.
///
/// Writes go to the source stream with the key filled in, so a value added
/// here lands in this collection once the grouping has processed it.
pub struct MemberCollection<K, V> {
	grouping: GroupingManager<K, V>,
	key: K,
}

impl<K: Clone, V> Clone for MemberCollection<K, V> {
	fn clone(&self) -> Self {
		Self {
			grouping: self.grouping.clone(),
			key: self.key.clone(),
		}
	}
}

impl<K: Data, V: Data> MemberCollection<K, V> {
	pub(crate) fn new(grouping: GroupingManager<K, V>, key: K) -> Self {
		Self { grouping, key }
	}

	pub fn key(&self) -> &K {
		&self.key
	}

	/// Identity of the key's bucket, if it currently has members.
	pub fn key_id(&self) -> Option<KeyId> {
		self.grouping.with_view(|view| view.find(&self.key))
	}

	pub fn len(&self) -> usize {
		self.grouping
			.with_view(|view| view.find(&self.key).map_or(0, |id| view.member_count(id)))
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn to_vec(&self) -> Vec<V> {
		self.grouping.with_view(|view| match view.find(&self.key) {
			Some(id) => view.members(id).map(|(_, v)| v.clone()).collect(),
			None => Vec::new(),
		})
	}

	pub fn elements(&self) -> Vec<ElementId> {
		self.grouping.with_view(|view| member_ids(view, &self.key))
	}

	pub fn get(&self, index: usize) -> Option<V> {
		self.member(index).map(|(_, v)| v)
	}

	pub fn first(&self) -> Option<V> {
		self.grouping.with_view(|view| {
			let (_, value) = view.first_member(view.find(&self.key)?)?;
			Some(value.clone())
		})
	}

	pub fn last(&self) -> Option<V> {
		self.grouping.with_view(|view| {
			let (_, value) = view.last_member(view.find(&self.key)?)?;
			Some(value.clone())
		})
	}

	pub fn contains(&self, value: &V) -> bool {
		self.index_of(value).is_some()
	}

	/// Position of the first member equivalent to `value`.
	pub fn index_of(&self, value: &V) -> Option<usize> {
		self.find(value).map(|(index, _)| index)
	}

	pub fn can_add(&self, value: &V) -> Option<Rejection> {
		self.grouping.source().can_add(&self.key, value)
	}

	/// Appends `value` under this key.
	pub fn add(&self, value: V) -> Result<ElementId, CollectError> {
		self.grouping.source().add(self.key.clone(), value)
	}

	/// Inserts `value` directly before `anchor`, which must be a member.
	pub fn insert_before(&self, anchor: &ElementId, value: V) -> Result<ElementId, CollectError> {
		self.insert_at(Position::Before(anchor.clone()), anchor, value)
	}

	/// Inserts `value` directly after `anchor`, which must be a member.
	pub fn insert_after(&self, anchor: &ElementId, value: V) -> Result<ElementId, CollectError> {
		self.insert_at(Position::After(anchor.clone()), anchor, value)
	}

	/// Removes the first member equivalent to `value`.
	pub fn remove(&self, value: &V) -> Result<bool, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("remove"));
		match self.find(value) {
			Some((_, element)) => {
				tx.remove(&element)?;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	pub fn remove_at(&self, index: usize) -> Result<V, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("remove_at"));
		let (element, _) = self.member_or_bounds(index)?;
		Ok(tx.remove(&element)?.value)
	}

	/// Replaces the value at `index`, returning the previous one.
	pub fn set(&self, index: usize, value: V) -> Result<V, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("set"));
		let (element, _) = self.member_or_bounds(index)?;
		tx.set_value(&element, value)
	}

	pub fn clear(&self) -> Result<usize, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("clear"));
		let doomed = self.elements();
		for element in &doomed {
			tx.remove(element)?;
		}
		Ok(doomed.len())
	}

	/// Events for this key, including its creation and removal.
	pub fn subscribe(&self, listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		let keys = self.grouping.shared_keys();
		let key = self.key.clone();
		self.grouping.subscribe(move |event| {
			if concerns(&*keys, event, &key) {
				listener(event);
			}
		})
	}

	fn member(&self, index: usize) -> Option<(ElementId, V)> {
		self.grouping.with_view(|view| {
			let (element, value) = view.member_at(view.find(&self.key)?, index)?;
			Some((element.clone(), value.clone()))
		})
	}

	fn member_or_bounds(&self, index: usize) -> Result<(ElementId, V), CollectError> {
		self.member(index).ok_or_else(|| CollectError::IndexOutOfBounds {
			index,
			len: self.len(),
		})
	}

	fn find(&self, value: &V) -> Option<(usize, ElementId)> {
		let values = self.grouping.value_equivalence();
		self.grouping.with_view(|view| {
			view.members(view.find(&self.key)?)
				.enumerate()
				.find(|(_, (_, v))| values.equivalent(v, value))
				.map(|(index, (element, _))| (index, element.clone()))
		})
	}

	fn insert_at(&self, at: Position, anchor: &ElementId, value: V) -> Result<ElementId, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("insert"));
		let in_group = self.grouping.with_view(|view| {
			let group = view.group_of(anchor);
			group.is_some() && group == view.find(&self.key)
		});
		if !in_group {
			let rejection = if self.grouping.source().contains(anchor) {
				Rejection::WrongGroup
			} else {
				Rejection::NotFound
			};
			return Err(rejection.into());
		}
		tx.insert(self.key.clone(), value, at)
	}
}

impl<K: Data + std::fmt::Debug, V: Data + std::fmt::Debug> std::fmt::Debug for MemberCollection<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemberCollection")
			.field("key", &self.key)
			.field("members", &self.to_vec())
			.finish()
	}
}

/// Live set of the keys of a multi-map, in key order.
pub struct KeySet<K, V> {
	grouping: GroupingManager<K, V>,
}

impl<K, V> Clone for KeySet<K, V> {
	fn clone(&self) -> Self {
		Self {
			grouping: self.grouping.clone(),
		}
	}
}

impl<K: Data, V: Data> KeySet<K, V> {
	pub(crate) fn new(grouping: GroupingManager<K, V>) -> Self {
		Self { grouping }
	}

	pub fn len(&self) -> usize {
		self.grouping.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn to_vec(&self) -> Vec<K> {
		self.grouping
			.with_view(|view| view.keys().map(|(_, k)| k.clone()).collect())
	}

	pub fn contains(&self, key: &K) -> bool {
		self.grouping.with_view(|view| view.find(key).is_some())
	}

	pub fn key_id(&self, key: &K) -> Option<KeyId> {
		self.grouping.with_view(|view| view.find(key))
	}

	pub fn index_of(&self, key: &K) -> Option<usize> {
		self.grouping
			.with_view(|view| view.key_index(view.find(key)?))
	}

	pub fn get(&self, index: usize) -> Option<K> {
		self.grouping
			.with_view(|view| view.key_at(index).map(|(_, k)| k.clone()))
	}

	/// Removes every member of `key`.
	pub fn remove(&self, key: &K) -> Result<usize, CollectError> {
		let mut tx = self.grouping.source().lock_write(Cause::new("remove_key"));
		let doomed = self.grouping.with_view(|view| member_ids(view, key));
		for element in &doomed {
			tx.remove(element)?;
		}
		Ok(doomed.len())
	}

	/// Key-level events only.
	pub fn subscribe(&self, listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		self.grouping.subscribe(move |event| {
			if event.is_key_event() {
				listener(event);
			}
		})
	}
}

/// State of a [`MultiEntry`].
pub enum EntryState<K, V> {
	Live(MemberCollection<K, V>),
	/// The key's bucket was removed by the operation currently being
	/// dispatched.
	PendingRemoved { key: K, last_value: V },
}

/// One key of a multi-map with its members.
pub struct MultiEntry<K, V> {
	key_id: KeyId,
	state: EntryState<K, V>,
}

impl<K: Data, V: Data> MultiEntry<K, V> {
	pub(crate) fn live(key_id: KeyId, members: MemberCollection<K, V>) -> Self {
		Self {
			key_id,
			state: EntryState::Live(members),
		}
	}

	pub(crate) fn pending(key_id: KeyId, key: K, last_value: V) -> Self {
		Self {
			key_id,
			state: EntryState::PendingRemoved { key, last_value },
		}
	}

	pub fn key_id(&self) -> KeyId {
		self.key_id
	}

	pub fn key(&self) -> &K {
		match &self.state {
			EntryState::Live(members) => members.key(),
			EntryState::PendingRemoved { key, .. } => key,
		}
	}

	/// Live members; `None` for a pending placeholder.
	pub fn members(&self) -> Option<&MemberCollection<K, V>> {
		match &self.state {
			EntryState::Live(members) => Some(members),
			EntryState::PendingRemoved { .. } => None,
		}
	}

	/// Current values; empty for a pending placeholder.
	pub fn values(&self) -> Vec<V> {
		self.members().map(MemberCollection::to_vec).unwrap_or_default()
	}

	pub fn is_pending(&self) -> bool {
		matches!(self.state, EntryState::PendingRemoved { .. })
	}

	pub fn state(&self) -> &EntryState<K, V> {
		&self.state
	}

	pub fn into_state(self) -> EntryState<K, V> {
		self.state
	}
}
