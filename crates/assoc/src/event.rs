//! Structured change records.
//!
//! A grouping emits [`MultiMapEvent`]s at two levels. Key-level events add,
//! remove or re-key a whole bucket; value-level events add, remove or replace
//! one member of a bucket. For a single source operation the events arrive in
//! a fixed order:
//!
//! - a new bucket is announced by a key add followed by one value add per
//!   member, in member order;
//! - removing the last member of a bucket emits only a key remove, which
//!   carries the removed member as its value payload;
//! - a representative hand-off that keeps the bucket in place emits one
//!   key-level set; one that moves the bucket emits a key remove for the old
//!   [`KeyId`] and announces the bucket again under a fresh one.
//!
//! Indices are always those valid at the moment the event is delivered:
//! removals report the position held before the removal.
//!
//! [`EventReplica`] applies such a history to a plain vector model and is the
//! reference consumer of this protocol.

use sheaf_primitives::{Cause, ChangeKind, ElementId, KeyId};

use crate::error::IntegrityViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLevel {
	Key,
	Value,
}

/// Change to one member of a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange<V> {
	pub element: ElementId,
	/// Position of the member within its bucket.
	pub index: usize,
	pub old: Option<V>,
	pub new: Option<V>,
}

#[derive(Debug, Clone)]
pub struct MultiMapEvent<K, V> {
	pub level: EventLevel,
	pub kind: ChangeKind,
	pub key_id: KeyId,
	/// Position of the bucket among all keys.
	pub key_index: usize,
	/// The bucket's key after the change (before it, for removals).
	pub key: K,
	/// Previous key value for key-level sets.
	pub old_key: Option<K>,
	/// Member payload. Always present on value-level events; on key-level
	/// events it carries the last member of a destroyed bucket or the
	/// representative transition of a hand-off.
	pub value: Option<ValueChange<V>>,
	pub cause: Cause,
}

impl<K, V> MultiMapEvent<K, V> {
	pub fn is_key_event(&self) -> bool {
		self.level == EventLevel::Key
	}

	pub fn is_value_event(&self) -> bool {
		self.level == EventLevel::Value
	}

	pub fn element(&self) -> Option<&ElementId> {
		self.value.as_ref().map(|v| &v.element)
	}

	pub fn new_value(&self) -> Option<&V> {
		self.value.as_ref().and_then(|v| v.new.as_ref())
	}

	pub fn old_value(&self) -> Option<&V> {
		self.value.as_ref().and_then(|v| v.old.as_ref())
	}
}

/// Change to a collapsed key-to-representative map.
#[derive(Debug, Clone)]
pub struct MapEvent<K, V> {
	pub kind: ChangeKind,
	pub key_id: KeyId,
	pub key_index: usize,
	pub key: K,
	pub old: Option<V>,
	pub new: Option<V>,
	pub cause: Cause,
}

/// One key with its members, in member order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group<K, V> {
	pub key_id: KeyId,
	pub key: K,
	pub members: Vec<(ElementId, V)>,
}

/// Rebuilds a grouping's structure from its event history alone.
#[derive(Debug, Clone)]
pub struct EventReplica<K, V> {
	groups: Vec<Group<K, V>>,
}

impl<K, V> Default for EventReplica<K, V> {
	fn default() -> Self {
		Self { groups: Vec::new() }
	}
}

impl<K: Clone, V: Clone> EventReplica<K, V> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn groups(&self) -> &[Group<K, V>] {
		&self.groups
	}

	pub fn into_groups(self) -> Vec<Group<K, V>> {
		self.groups
	}

	/// Applies one event, failing when it does not fit the current model.
	pub fn apply(&mut self, event: &MultiMapEvent<K, V>) -> Result<(), IntegrityViolation> {
		let mismatch = || IntegrityViolation::ReplayMismatch {
			key_id: event.key_id,
			index: event.key_index,
		};

		if event.is_key_event() && event.kind == ChangeKind::Add {
			if event.key_index > self.groups.len() {
				return Err(mismatch());
			}
			self.groups.insert(
				event.key_index,
				Group {
					key_id: event.key_id,
					key: event.key.clone(),
					members: Vec::new(),
				},
			);
			return Ok(());
		}

		let group = self
			.groups
			.get_mut(event.key_index)
			.filter(|g| g.key_id == event.key_id)
			.ok_or_else(mismatch)?;

		match (event.level, event.kind) {
			(EventLevel::Key, ChangeKind::Remove) => {
				self.groups.remove(event.key_index);
			}
			(EventLevel::Key, _) => group.key = event.key.clone(),
			(EventLevel::Value, kind) => {
				let change = event.value.as_ref().ok_or_else(mismatch)?;
				match kind {
					ChangeKind::Add => {
						let value = change.new.clone().ok_or_else(mismatch)?;
						if change.index > group.members.len() {
							return Err(mismatch());
						}
						group.members.insert(change.index, (change.element.clone(), value));
					}
					ChangeKind::Remove => {
						if group.members.get(change.index).map(|(e, _)| e) != Some(&change.element) {
							return Err(mismatch());
						}
						group.members.remove(change.index);
					}
					ChangeKind::Set => {
						let value = change.new.clone().ok_or_else(mismatch)?;
						let slot = group
							.members
							.get_mut(change.index)
							.filter(|(e, _)| *e == change.element)
							.ok_or_else(mismatch)?;
						slot.1 = value;
					}
				}
			}
		}
		Ok(())
	}
}
