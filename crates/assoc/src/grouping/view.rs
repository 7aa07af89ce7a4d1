use sheaf_collect::Data;
use sheaf_primitives::{ElementId, KeyId};

use crate::event::Group;
use crate::options::{KeyOrder, RepresentativePolicy};
use crate::unique::{Bucket, UniqueState};

/// Read-only view of a grouping at one point in time.
///
/// Obtained through [`GroupingManager::with_view`](super::GroupingManager::with_view)
/// or handed to listeners alongside each event. Keys are addressed by
/// [`KeyId`] and enumerated in the grouping's key order; members of a key are
/// enumerated in source order.
pub struct GroupingView<'a, K, V> {
	state: &'a UniqueState<K, V>,
}

impl<'a, K: Data, V: Data> GroupingView<'a, K, V> {
	pub(crate) fn new(state: &'a UniqueState<K, V>) -> Self {
		Self { state }
	}

	fn bucket(&self, id: KeyId) -> Option<&'a Bucket<K, V>> {
		let state = self.state;
		state.slot(id).and_then(|slot| state.bucket(slot))
	}

	fn id_of(&self, slot: usize) -> Option<KeyId> {
		self.state.bucket(slot).map(|b| b.id)
	}

	pub fn len(&self) -> usize {
		self.state.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn value_count(&self) -> usize {
		self.state.value_count()
	}

	pub fn policy(&self) -> RepresentativePolicy {
		self.state.policy()
	}

	pub fn key_order(&self) -> KeyOrder {
		self.state.order_mode()
	}

	pub fn is_sorted(&self) -> bool {
		self.state.order_mode() == KeyOrder::Sorted
	}

	/// Keys in key order.
	pub fn keys(&self) -> impl Iterator<Item = (KeyId, &'a K)> + 'a {
		let state = self.state;
		state
			.slots_from(0)
			.filter_map(move |slot| state.bucket(slot))
			.map(|b| (b.id, &b.key))
	}

	pub fn key_ids(&self) -> impl Iterator<Item = KeyId> + 'a {
		self.keys().map(|(id, _)| id)
	}

	pub fn contains(&self, id: KeyId) -> bool {
		self.state.slot(id).is_some()
	}

	pub fn key(&self, id: KeyId) -> Option<&'a K> {
		self.bucket(id).map(|b| &b.key)
	}

	pub fn key_index(&self, id: KeyId) -> Option<usize> {
		self.state.key_index(self.state.slot(id)?)
	}

	pub fn key_at(&self, index: usize) -> Option<(KeyId, &'a K)> {
		let slot = self.state.slot_at(index)?;
		self.state.bucket(slot).map(|b| (b.id, &b.key))
	}

	/// Bucket holding keys equivalent to `key`.
	pub fn find(&self, key: &K) -> Option<KeyId> {
		self.id_of(self.state.find(key)?)
	}

	/// Members of `id` in source order; empty for unknown keys.
	pub fn members(&self, id: KeyId) -> impl Iterator<Item = (&'a ElementId, &'a V)> + 'a {
		self.bucket(id)
			.into_iter()
			.flat_map(|b| b.members.iter())
			.map(|(element, member)| (element, &member.value))
	}

	pub fn member_count(&self, id: KeyId) -> usize {
		self.bucket(id).map_or(0, |b| b.members.len())
	}

	pub fn member_at(&self, id: KeyId, index: usize) -> Option<(&'a ElementId, &'a V)> {
		let (element, member) = self.bucket(id)?.members.get_index(index)?;
		Some((element, &member.value))
	}

	pub fn member_index(&self, id: KeyId, element: &ElementId) -> Option<usize> {
		self.bucket(id)?.members.rank(element)
	}

	pub fn first_member(&self, id: KeyId) -> Option<(&'a ElementId, &'a V)> {
		let (element, member) = self.bucket(id)?.members.first()?;
		Some((element, &member.value))
	}

	pub fn last_member(&self, id: KeyId) -> Option<(&'a ElementId, &'a V)> {
		let (element, member) = self.bucket(id)?.members.last()?;
		Some((element, &member.value))
	}

	/// The member elected to stand for `id` under the grouping's policy.
	pub fn representative(&self, id: KeyId) -> Option<(&'a ElementId, &'a V)> {
		let bucket = self.bucket(id)?;
		let value = bucket.representative_value()?;
		Some((&bucket.representative, value))
	}

	pub fn group_of(&self, element: &ElementId) -> Option<KeyId> {
		self.id_of(self.state.group_of(element)?)
	}

	/// Key and last value of a bucket removed by the operation currently
	/// being dispatched.
	pub fn pending(&self, id: KeyId) -> Option<(&'a K, &'a V)> {
		let pending = self.state.pending(id)?;
		Some((&pending.key, &pending.last_value))
	}

	/// Number of keys ordered strictly before `key`. `None` unless keys are
	/// sorted.
	pub fn lower_count(&self, key: &K) -> Option<usize> {
		self.state.lower_count(key)
	}

	pub fn floor(&self, key: &K) -> Option<(KeyId, &'a K)> {
		self.entry(self.state.floor(key)?)
	}

	pub fn ceiling(&self, key: &K) -> Option<(KeyId, &'a K)> {
		self.entry(self.state.ceiling(key)?)
	}

	pub fn lower(&self, key: &K) -> Option<(KeyId, &'a K)> {
		self.entry(self.state.lower(key)?)
	}

	pub fn higher(&self, key: &K) -> Option<(KeyId, &'a K)> {
		self.entry(self.state.higher(key)?)
	}

	fn entry(&self, slot: usize) -> Option<(KeyId, &'a K)> {
		self.state.bucket(slot).map(|b| (b.id, &b.key))
	}

	pub fn groups(&self) -> Vec<Group<K, V>> {
		self.state.groups()
	}
}
