//! Key materialization: one bucket per distinct key.
//!
//! # Purpose
//!
//! [`UniqueState`] turns single-element source changes into bucket changes
//! and the events describing them. It holds no locks and knows nothing about
//! listeners; [`crate::grouping`] drives it under the transaction lock.
//!
//! # Storage
//!
//! Buckets live in a [`Slab`]; every cross reference (element to bucket,
//! key id to bucket, key position to bucket) is a slab index. Members of a
//! bucket are kept in a [`RankedTree`] ordered by [`ElementId`], i.e. by source
//! position. Buckets are located by key through a hash index, or through the
//! key order tree itself when keys are totally ordered.
//!
//! # Invariants
//!
//! - Every source element belongs to exactly one bucket, whose key is
//!   equivalent to the element's key.
//!   - Enforced in: [`UniqueState::add`], [`UniqueState::update`].
//!   - Tested by: [`crate::invariants::test_bucket_integrity`]
//!   - Failure symptom: a value shows up under the wrong key, or twice.
//!
//! - A bucket exists iff it has a member, and its representative is one of
//!   its members.
//!   - Enforced in: [`UniqueState::remove`] (destroy or hand off).
//!   - Tested by: [`crate::invariants::test_bucket_integrity`]
//!   - Failure symptom: empty keys in the key set, or a collapsed map value
//!     that no longer exists in the source.
//!
//! - Under [`RepresentativePolicy::Sticky`] a representative changes only
//!   when it is removed; under `First`/`Last` it is always the earliest or
//!   latest member in source order.
//!   - Enforced in: [`UniqueState::add`], [`UniqueState::remove`].
//!   - Tested by: [`crate::invariants::test_representative_stability`]
//!   - Failure symptom: collapsed map values flicker on unrelated adds.
//!
//! - Emitted events replayed from empty reproduce the bucket structure.
//!   - Enforced in: every write path.
//!   - Tested by: [`crate::invariants::test_event_completeness`]
//!   - Failure symptom: observers drift out of sync with the grouping.

use std::cmp::Ordering;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use sheaf_collect::{Data, Entry};
use sheaf_primitives::{Cause, ChangeKind, Compare, ElementId, Equivalence, KeyId, RankedTree};
use slab::Slab;
use smallvec::SmallVec;

use crate::error::IntegrityViolation;
use crate::event::{EventLevel, Group, MultiMapEvent, ValueChange};
use crate::options::{KeyOrder, RepresentativePolicy};

pub(crate) type Events<K, V> = Vec<MultiMapEvent<K, V>>;

/// Where a bucket sits among the keys.
#[derive(Clone)]
pub(crate) enum KeyPosition<K> {
	Creation(u64),
	Source(ElementId),
	Sorted(K),
}

impl<K> KeyPosition<K> {
	fn tag(&self) -> u8 {
		match self {
			KeyPosition::Creation(_) => 0,
			KeyPosition::Source(_) => 1,
			KeyPosition::Sorted(_) => 2,
		}
	}
}

pub(crate) struct PositionOrder<K> {
	keys: Arc<dyn Equivalence<K>>,
}

impl<K> Compare<KeyPosition<K>> for PositionOrder<K> {
	fn compare(&self, a: &KeyPosition<K>, b: &KeyPosition<K>) -> Ordering {
		match (a, b) {
			(KeyPosition::Creation(x), KeyPosition::Creation(y)) => x.cmp(y),
			(KeyPosition::Source(x), KeyPosition::Source(y)) => x.cmp(y),
			(KeyPosition::Sorted(x), KeyPosition::Sorted(y)) => {
				self.keys.compare(x, y).unwrap_or(Ordering::Equal)
			}
			_ => a.tag().cmp(&b.tag()),
		}
	}
}

pub(crate) struct Member<K, V> {
	pub(crate) key: K,
	pub(crate) value: V,
}

pub(crate) struct Bucket<K, V> {
	pub(crate) id: KeyId,
	/// Key of the representative.
	pub(crate) key: K,
	hash: u64,
	pub(crate) members: RankedTree<ElementId, Member<K, V>>,
	pub(crate) representative: ElementId,
	position: KeyPosition<K>,
}

impl<K, V> Bucket<K, V> {
	pub(crate) fn representative_value(&self) -> Option<&V> {
		self.members.get(&self.representative).map(|m| &m.value)
	}
}

/// A key whose bucket was destroyed by the operation being dispatched.
pub(crate) struct PendingKey<K, V> {
	pub(crate) id: KeyId,
	pub(crate) key: K,
	pub(crate) last_value: V,
}

pub(crate) struct UniqueState<K, V> {
	keys: Arc<dyn Equivalence<K>>,
	policy: RepresentativePolicy,
	order_mode: KeyOrder,
	buckets: Slab<Bucket<K, V>>,
	by_id: FxHashMap<KeyId, usize>,
	hashed: FxHashMap<u64, SmallVec<[usize; 1]>>,
	order: RankedTree<KeyPosition<K>, usize, PositionOrder<K>>,
	members: FxHashMap<ElementId, usize>,
	pending: Vec<PendingKey<K, V>>,
	next_key: u64,
	next_creation: u64,
	value_count: usize,
}

impl<K: Data, V: Data> UniqueState<K, V> {
	pub(crate) fn new(
		keys: Arc<dyn Equivalence<K>>,
		policy: RepresentativePolicy,
		order_mode: KeyOrder,
	) -> Self {
		let order = RankedTree::with_comparator(PositionOrder {
			keys: Arc::clone(&keys),
		});
		Self {
			keys,
			policy,
			order_mode,
			buckets: Slab::new(),
			by_id: FxHashMap::default(),
			hashed: FxHashMap::default(),
			order,
			members: FxHashMap::default(),
			pending: Vec::new(),
			next_key: 0,
			next_creation: 0,
			value_count: 0,
		}
	}

	pub(crate) fn policy(&self) -> RepresentativePolicy {
		self.policy
	}

	pub(crate) fn order_mode(&self) -> KeyOrder {
		self.order_mode
	}

	pub(crate) fn key_equivalence(&self) -> &dyn Equivalence<K> {
		&*self.keys
	}

	pub(crate) fn len(&self) -> usize {
		self.buckets.len()
	}

	pub(crate) fn value_count(&self) -> usize {
		self.value_count
	}

	pub(crate) fn bucket(&self, slot: usize) -> Option<&Bucket<K, V>> {
		self.buckets.get(slot)
	}

	pub(crate) fn slot(&self, id: KeyId) -> Option<usize> {
		self.by_id.get(&id).copied()
	}

	pub(crate) fn find(&self, key: &K) -> Option<usize> {
		if self.order_mode == KeyOrder::Sorted {
			return self.order.get(&KeyPosition::Sorted(key.clone())).copied();
		}
		let hash = self.keys.hash_key(key);
		self.hashed
			.get(&hash)?
			.iter()
			.copied()
			.find(|&slot| self.keys.equivalent(&self.buckets[slot].key, key))
	}

	pub(crate) fn group_of(&self, element: &ElementId) -> Option<usize> {
		self.members.get(element).copied()
	}

	pub(crate) fn key_index(&self, slot: usize) -> Option<usize> {
		self.order.rank(&self.buckets.get(slot)?.position)
	}

	pub(crate) fn slot_at(&self, index: usize) -> Option<usize> {
		self.order.get_index(index).map(|(_, slot)| *slot)
	}

	/// Bucket slots in key order, starting at position `start`.
	pub(crate) fn slots_from(&self, start: usize) -> impl Iterator<Item = usize> + '_ {
		self.order.iter_from(start).map(|(_, slot)| *slot)
	}

	pub(crate) fn pending(&self, id: KeyId) -> Option<&PendingKey<K, V>> {
		self.pending.iter().find(|p| p.id == id)
	}

	pub(crate) fn clear_pending(&mut self) {
		self.pending.clear();
	}

	fn probe(&self, key: &K) -> Option<KeyPosition<K>> {
		(self.order_mode == KeyOrder::Sorted).then(|| KeyPosition::Sorted(key.clone()))
	}

	/// Number of keys ordered strictly before `key`. Sorted mode only.
	pub(crate) fn lower_count(&self, key: &K) -> Option<usize> {
		let probe = self.probe(key)?;
		Some(self.order.lower_count(&probe))
	}

	pub(crate) fn floor(&self, key: &K) -> Option<usize> {
		let probe = self.probe(key)?;
		self.order.floor(&probe).map(|(_, slot)| *slot)
	}

	pub(crate) fn ceiling(&self, key: &K) -> Option<usize> {
		let probe = self.probe(key)?;
		self.order.ceiling(&probe).map(|(_, slot)| *slot)
	}

	pub(crate) fn lower(&self, key: &K) -> Option<usize> {
		let probe = self.probe(key)?;
		self.order.lower(&probe).map(|(_, slot)| *slot)
	}

	pub(crate) fn higher(&self, key: &K) -> Option<usize> {
		let probe = self.probe(key)?;
		self.order.higher(&probe).map(|(_, slot)| *slot)
	}

	/// One key add plus its value adds per bucket, in key then member order.
	pub(crate) fn replay(&self, cause: &Cause) -> Events<K, V> {
		let mut out = Vec::with_capacity(self.len() + self.value_count);
		for (key_index, slot) in self.slots_from(0).enumerate() {
			self.announce(slot, key_index, cause, &mut out);
		}
		out
	}

	pub(crate) fn groups(&self) -> Vec<Group<K, V>> {
		self.slots_from(0)
			.map(|slot| {
				let bucket = &self.buckets[slot];
				Group {
					key_id: bucket.id,
					key: bucket.key.clone(),
					members: bucket
						.members
						.iter()
						.map(|(e, m)| (e.clone(), m.value.clone()))
						.collect(),
				}
			})
			.collect()
	}

	pub(crate) fn add(&mut self, element: ElementId, key: K, value: V, cause: &Cause, out: &mut Events<K, V>) {
		if self.members.contains_key(&element) {
			tracing::warn!(%element, "element already grouped; add ignored");
			return;
		}
		let Some(slot) = self.find(&key) else {
			self.create(element, key, value, cause, out);
			return;
		};

		let bucket = &mut self.buckets[slot];
		bucket.members.insert(
			element.clone(),
			Member {
				key,
				value: value.clone(),
			},
		);
		let index = bucket.members.rank(&element).unwrap_or_default();
		let takes_over = match self.policy {
			RepresentativePolicy::First => element < bucket.representative,
			RepresentativePolicy::Last => element > bucket.representative,
			RepresentativePolicy::Sticky => false,
		};
		let previous = takes_over
			.then(|| bucket.representative_value().cloned())
			.flatten();
		self.members.insert(element.clone(), slot);
		self.value_count += 1;

		let key_index = self.key_index(slot).unwrap_or_default();
		out.push(self.value_event(
			slot,
			key_index,
			ChangeKind::Add,
			ValueChange {
				element: element.clone(),
				index,
				old: None,
				new: Some(value),
			},
			cause,
		));

		if let Some(previous) = previous {
			self.hand_off(slot, element, previous, cause, out);
		}
	}

	pub(crate) fn remove(&mut self, element: &ElementId, cause: &Cause, out: &mut Events<K, V>) {
		let Some(slot) = self.members.remove(element) else {
			tracing::warn!(%element, "remove of ungrouped element ignored");
			return;
		};
		let key_index = self.key_index(slot).unwrap_or_default();
		let bucket = &mut self.buckets[slot];
		let index = bucket.members.rank(element).unwrap_or_default();
		let Some((_, member)) = bucket.members.remove(element) else {
			return;
		};
		self.value_count -= 1;

		if bucket.members.is_empty() {
			self.destroy(slot, key_index, element.clone(), index, member.value, cause, out);
			return;
		}

		let was_representative = bucket.representative == *element;
		let successor = match self.policy {
			RepresentativePolicy::Last => bucket.members.last(),
			RepresentativePolicy::First | RepresentativePolicy::Sticky => bucket.members.first(),
		}
		.map(|(id, _)| id.clone());

		out.push(self.value_event(
			slot,
			key_index,
			ChangeKind::Remove,
			ValueChange {
				element: element.clone(),
				index,
				old: Some(member.value.clone()),
				new: None,
			},
			cause,
		));

		if was_representative && let Some(successor) = successor {
			self.hand_off(slot, successor, member.value, cause, out);
		}
	}

	/// Applies an in-place source update. A key that is no longer equivalent
	/// moves the element: removal under the old key, then an add under the new.
	pub(crate) fn update(
		&mut self,
		element: &ElementId,
		key: K,
		value: V,
		key_changed: bool,
		cause: &Cause,
		out: &mut Events<K, V>,
	) {
		let Some(slot) = self.group_of(element) else {
			tracing::warn!(%element, "update of ungrouped element treated as add");
			self.add(element.clone(), key, value, cause, out);
			return;
		};
		if !self.keys.equivalent(&self.buckets[slot].key, &key) {
			self.remove(element, cause, out);
			self.add(element.clone(), key, value, cause, out);
			return;
		}

		let key_index = self.key_index(slot).unwrap_or_default();
		let bucket = &mut self.buckets[slot];
		let index = bucket.members.rank(element).unwrap_or_default();
		let Some(member) = bucket.members.get_mut(element) else {
			return;
		};
		let old_value = std::mem::replace(&mut member.value, value.clone());
		member.key = key.clone();
		let old_key = (key_changed && bucket.representative == *element)
			.then(|| std::mem::replace(&mut bucket.key, key));

		let change = ValueChange {
			element: element.clone(),
			index,
			old: Some(old_value),
			new: Some(value),
		};
		out.push(self.value_event(slot, key_index, ChangeKind::Set, change.clone(), cause));
		if let Some(old_key) = old_key {
			let bucket = &self.buckets[slot];
			out.push(MultiMapEvent {
				level: EventLevel::Key,
				kind: ChangeKind::Set,
				key_id: bucket.id,
				key_index,
				key: bucket.key.clone(),
				old_key: Some(old_key),
				value: Some(change),
				cause: cause.clone(),
			});
		}
	}

	/// Checks every structural invariant against the source contents.
	pub(crate) fn check(
		&self,
		source: &[(ElementId, Entry<K, V>)],
		values: &dyn Equivalence<V>,
	) -> Result<(), IntegrityViolation> {
		for (element, entry) in source {
			let slot = self
				.group_of(element)
				.ok_or_else(|| IntegrityViolation::Ungrouped(element.clone()))?;
			let bucket = &self.buckets[slot];
			let wrong = || IntegrityViolation::WrongBucket {
				element: element.clone(),
				key_id: bucket.id,
			};
			if !self.keys.equivalent(&bucket.key, &entry.key) {
				return Err(wrong());
			}
			let member = bucket.members.get(element).ok_or_else(wrong)?;
			if !values.equivalent(&member.value, &entry.value) {
				return Err(wrong());
			}
		}

		if self.members.len() != source.len() {
			let live: FxHashSet<&ElementId> = source.iter().map(|(e, _)| e).collect();
			if let Some(orphan) = self.members.keys().find(|e| !live.contains(e)) {
				return Err(IntegrityViolation::Orphaned(orphan.clone()));
			}
		}
		if self.value_count != source.len() {
			return Err(IntegrityViolation::ValueCount {
				counted: self.value_count,
				actual: source.len(),
			});
		}

		for (slot, bucket) in &self.buckets {
			let (Some((first, _)), Some((last, _))) = (bucket.members.first(), bucket.members.last()) else {
				return Err(IntegrityViolation::EmptyBucket(bucket.id));
			};
			if !bucket.members.contains_key(&bucket.representative) {
				return Err(IntegrityViolation::DeadRepresentative(bucket.id));
			}
			let policy_holds = match self.policy {
				RepresentativePolicy::First => *first == bucket.representative,
				RepresentativePolicy::Last => *last == bucket.representative,
				RepresentativePolicy::Sticky => true,
			};
			if !policy_holds {
				return Err(IntegrityViolation::PolicyViolation(bucket.id));
			}
			let positioned = self.order.get(&bucket.position) == Some(&slot)
				&& self.by_id.get(&bucket.id) == Some(&slot)
				&& match &bucket.position {
					KeyPosition::Source(rep) => *rep == bucket.representative,
					_ => self.order_mode != KeyOrder::SourceOrder,
				};
			if !positioned {
				return Err(IntegrityViolation::Misordered(bucket.id));
			}
		}
		if self.order.len() != self.buckets.len() || self.by_id.len() != self.buckets.len() {
			let id = self.buckets.iter().next().map_or(KeyId::from_raw(0), |(_, b)| b.id);
			return Err(IntegrityViolation::Misordered(id));
		}

		for slots in self.hashed.values() {
			for (i, &a) in slots.iter().enumerate() {
				for &b in &slots[i + 1..] {
					if self.keys.equivalent(&self.buckets[a].key, &self.buckets[b].key) {
						return Err(IntegrityViolation::DuplicateKey(self.buckets[a].id, self.buckets[b].id));
					}
				}
			}
		}
		let ordered: Vec<&Bucket<K, V>> = self.slots_from(0).map(|s| &self.buckets[s]).collect();
		for pair in ordered.windows(2) {
			if self.keys.equivalent(&pair[0].key, &pair[1].key) {
				return Err(IntegrityViolation::DuplicateKey(pair[0].id, pair[1].id));
			}
			if self.order_mode == KeyOrder::Sorted
				&& self.keys.compare(&pair[0].key, &pair[1].key) != Some(Ordering::Less)
			{
				return Err(IntegrityViolation::Misordered(pair[1].id));
			}
		}
		Ok(())
	}

	fn mint_key(&mut self) -> KeyId {
		let id = KeyId::from_raw(self.next_key);
		self.next_key += 1;
		id
	}

	fn create(&mut self, element: ElementId, key: K, value: V, cause: &Cause, out: &mut Events<K, V>) {
		let id = self.mint_key();
		let hash = self.keys.hash_key(&key);
		let position = match self.order_mode {
			KeyOrder::Creation => {
				self.next_creation += 1;
				KeyPosition::Creation(self.next_creation)
			}
			KeyOrder::SourceOrder => KeyPosition::Source(element.clone()),
			KeyOrder::Sorted => KeyPosition::Sorted(key.clone()),
		};
		let mut members = RankedTree::new();
		members.insert(
			element.clone(),
			Member {
				key: key.clone(),
				value,
			},
		);
		let slot = self.buckets.insert(Bucket {
			id,
			key,
			hash,
			members,
			representative: element.clone(),
			position: position.clone(),
		});
		self.order.insert(position, slot);
		self.by_id.insert(id, slot);
		if self.order_mode != KeyOrder::Sorted {
			self.hashed.entry(hash).or_default().push(slot);
		}
		self.members.insert(element, slot);
		self.value_count += 1;

		let key_index = self.key_index(slot).unwrap_or_default();
		tracing::debug!(key_id = %id, key_index, "bucket created");
		self.announce(slot, key_index, cause, out);
	}

	#[allow(clippy::too_many_arguments)]
	fn destroy(
		&mut self,
		slot: usize,
		key_index: usize,
		element: ElementId,
		index: usize,
		value: V,
		cause: &Cause,
		out: &mut Events<K, V>,
	) {
		let bucket = self.buckets.remove(slot);
		self.order.remove(&bucket.position);
		self.by_id.remove(&bucket.id);
		if let Some(slots) = self.hashed.get_mut(&bucket.hash) {
			slots.retain(|s| *s != slot);
			if slots.is_empty() {
				self.hashed.remove(&bucket.hash);
			}
		}
		tracing::debug!(key_id = %bucket.id, key_index, "bucket destroyed");

		self.pending.push(PendingKey {
			id: bucket.id,
			key: bucket.key.clone(),
			last_value: value.clone(),
		});
		out.push(MultiMapEvent {
			level: EventLevel::Key,
			kind: ChangeKind::Remove,
			key_id: bucket.id,
			key_index,
			key: bucket.key,
			old_key: None,
			value: Some(ValueChange {
				element,
				index,
				old: Some(value),
				new: None,
			}),
			cause: cause.clone(),
		});
	}

	/// Makes `successor` the representative. `previous` is the outgoing
	/// representative's value.
	fn hand_off(&mut self, slot: usize, successor: ElementId, previous: V, cause: &Cause, out: &mut Events<K, V>) {
		let bucket = &mut self.buckets[slot];
		let Some(member) = bucket.members.get(&successor) else {
			tracing::warn!(key_id = %bucket.id, element = %successor, "hand-off to non-member ignored");
			return;
		};
		let new_value = member.value.clone();
		let new_key = member.key.clone();
		let old_key = std::mem::replace(&mut bucket.key, new_key);
		let old_rep = std::mem::replace(&mut bucket.representative, successor.clone());
		tracing::debug!(key_id = %bucket.id, from = %old_rep, to = %successor, "representative hand-off");

		if self.order_mode == KeyOrder::SourceOrder {
			let old_position = std::mem::replace(
				&mut bucket.position,
				KeyPosition::Source(successor.clone()),
			);
			let old_index = self.order.rank(&old_position).unwrap_or_default();
			self.order.remove(&old_position);
			self.order.insert(KeyPosition::Source(successor.clone()), slot);
			let new_index = self.key_index(slot).unwrap_or_default();
			if new_index != old_index {
				self.relocate(slot, old_index, new_index, old_key, previous, cause, out);
				return;
			}
		}

		let key_index = self.key_index(slot).unwrap_or_default();
		let bucket = &self.buckets[slot];
		let index = bucket.members.rank(&successor).unwrap_or_default();
		out.push(MultiMapEvent {
			level: EventLevel::Key,
			kind: ChangeKind::Set,
			key_id: bucket.id,
			key_index,
			key: bucket.key.clone(),
			old_key: Some(old_key),
			value: Some(ValueChange {
				element: successor,
				index,
				old: Some(previous),
				new: Some(new_value),
			}),
			cause: cause.clone(),
		});
	}

	/// Re-announces a bucket whose position changed under a fresh key id.
	#[allow(clippy::too_many_arguments)]
	fn relocate(
		&mut self,
		slot: usize,
		old_index: usize,
		new_index: usize,
		old_key: K,
		previous: V,
		cause: &Cause,
		out: &mut Events<K, V>,
	) {
		let new_id = self.mint_key();
		let old_id = std::mem::replace(&mut self.buckets[slot].id, new_id);
		self.by_id.remove(&old_id);
		self.by_id.insert(new_id, slot);
		tracing::debug!(from = %old_id, to = %new_id, old_index, new_index, "bucket moved");

		self.pending.push(PendingKey {
			id: old_id,
			key: old_key.clone(),
			last_value: previous,
		});
		out.push(MultiMapEvent {
			level: EventLevel::Key,
			kind: ChangeKind::Remove,
			key_id: old_id,
			key_index: old_index,
			key: old_key,
			old_key: None,
			value: None,
			cause: cause.clone(),
		});
		self.announce(slot, new_index, cause, out);
	}

	fn announce(&self, slot: usize, key_index: usize, cause: &Cause, out: &mut Events<K, V>) {
		let bucket = &self.buckets[slot];
		out.push(MultiMapEvent {
			level: EventLevel::Key,
			kind: ChangeKind::Add,
			key_id: bucket.id,
			key_index,
			key: bucket.key.clone(),
			old_key: None,
			value: None,
			cause: cause.clone(),
		});
		for (index, (element, member)) in bucket.members.iter().enumerate() {
			out.push(self.value_event(
				slot,
				key_index,
				ChangeKind::Add,
				ValueChange {
					element: element.clone(),
					index,
					old: None,
					new: Some(member.value.clone()),
				},
				cause,
			));
		}
	}

	fn value_event(
		&self,
		slot: usize,
		key_index: usize,
		kind: ChangeKind,
		change: ValueChange<V>,
		cause: &Cause,
	) -> MultiMapEvent<K, V> {
		let bucket = &self.buckets[slot];
		MultiMapEvent {
			level: EventLevel::Value,
			kind,
			key_id: bucket.id,
			key_index,
			key: bucket.key.clone(),
			old_key: None,
			value: Some(change),
			cause: cause.clone(),
		}
	}
}

#[cfg(test)]
mod tests;
