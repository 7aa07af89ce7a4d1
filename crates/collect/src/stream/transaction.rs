use std::sync::Arc;

use sheaf_primitives::{Cause, ChangeKind, CollectError, ElementId, Rejection, Transaction};

use super::{Data, Entry, EntryStream, Position, SourceChange, SourceEvent};

/// Write access to an [`EntryStream`].
///
/// Every write is validated before anything changes, applied under the
/// stream's state lock, and then announced to subscribers after the state
/// lock is released. All writes share the transaction's cause. When the
/// outermost transaction on the shared lock closes, every stream written
/// during it announces a single commit under that transaction's cause.
pub struct StreamTransaction<'a, K: Data, V: Data> {
	stream: &'a EntryStream<K, V>,
	tx: Transaction<'a>,
}

impl<'a, K: Data, V: Data> StreamTransaction<'a, K, V> {
	pub(super) fn new(stream: &'a EntryStream<K, V>, tx: Transaction<'a>) -> Self {
		Self { stream, tx }
	}

	pub fn cause(&self) -> &Cause {
		self.tx.cause()
	}

	pub fn stream(&self) -> &EntryStream<K, V> {
		self.stream
	}

	pub fn add(&mut self, key: K, value: V) -> Result<ElementId, CollectError> {
		self.insert(key, value, Position::Last)
	}

	pub fn insert(&mut self, key: K, value: V, at: Position) -> Result<ElementId, CollectError> {
		if let Some(rejection) = self.stream.check_entry(&key, &value) {
			return Err(rejection.into());
		}

		let (element, index) = {
			let mut state = self.stream.inner.state.write();
			let (lo, hi) = state.neighbours(&at)?;
			let element = state.mint(lo.as_ref(), hi.as_ref());
			let index = state.entries.lower_count(&element);
			state
				.entries
				.insert(element.clone(), Entry::new(key.clone(), value.clone()));
			state.touch();
			(element, index)
		};

		self.commit_on_close();
		tracing::trace!(stream = self.stream.label(), %element, index, "entry inserted");
		self.emit(SourceChange {
			kind: ChangeKind::Add,
			element: element.clone(),
			index,
			old: None,
			new: Some(Entry::new(key, value)),
			key_changed: false,
			cause: self.tx.cause().child("add"),
		});
		Ok(element)
	}

	pub fn remove(&mut self, id: &ElementId) -> Result<Entry<K, V>, CollectError> {
		if self.stream.inner.read_only {
			return Err(Rejection::ReadOnly.into());
		}

		let (index, entry) = {
			let mut state = self.stream.inner.state.write();
			let index = state
				.entries
				.rank(id)
				.ok_or_else(|| CollectError::StaleElement(id.clone()))?;
			let (_, entry) = state
				.entries
				.remove(id)
				.ok_or_else(|| CollectError::StaleElement(id.clone()))?;
			state.touch();
			(index, entry)
		};

		self.commit_on_close();
		tracing::trace!(stream = self.stream.label(), element = %id, index, "entry removed");
		self.emit(SourceChange {
			kind: ChangeKind::Remove,
			element: id.clone(),
			index,
			old: Some(entry.clone()),
			new: None,
			key_changed: false,
			cause: self.tx.cause().child("remove"),
		});
		Ok(entry)
	}

	/// Replaces the value at `id`, keeping its key. Returns the old value.
	pub fn set_value(&mut self, id: &ElementId, value: V) -> Result<V, CollectError> {
		let current = self
			.stream
			.get(id)
			.ok_or_else(|| CollectError::StaleElement(id.clone()))?;
		let old = self.replace(id, current.key, value, false)?;
		Ok(old.value)
	}

	/// Replaces both key and value at `id`. Returns the old entry.
	pub fn set_entry(&mut self, id: &ElementId, key: K, value: V) -> Result<Entry<K, V>, CollectError> {
		self.replace(id, key, value, true)
	}

	/// Removes every entry matching `pred`, first to last.
	pub fn remove_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) -> Result<usize, CollectError> {
		if self.stream.inner.read_only {
			return Err(Rejection::ReadOnly.into());
		}
		let doomed: Vec<ElementId> = self
			.stream
			.entries()
			.into_iter()
			.filter(|(_, e)| pred(&e.key, &e.value))
			.map(|(id, _)| id)
			.collect();
		for id in &doomed {
			self.remove(id)?;
		}
		Ok(doomed.len())
	}

	pub fn clear(&mut self) -> Result<usize, CollectError> {
		self.remove_where(|_, _| true)
	}

	fn replace(&mut self, id: &ElementId, key: K, value: V, key_changed: bool) -> Result<Entry<K, V>, CollectError> {
		if let Some(rejection) = self.stream.check_entry(&key, &value) {
			return Err(rejection.into());
		}

		let (index, old) = {
			let mut state = self.stream.inner.state.write();
			let index = state
				.entries
				.rank(id)
				.ok_or_else(|| CollectError::StaleElement(id.clone()))?;
			let slot = state
				.entries
				.get_mut(id)
				.ok_or_else(|| CollectError::StaleElement(id.clone()))?;
			let old = std::mem::replace(slot, Entry::new(key.clone(), value.clone()));
			state.touch();
			(index, old)
		};

		self.commit_on_close();
		tracing::trace!(stream = self.stream.label(), element = %id, index, key_changed, "entry set");
		self.emit(SourceChange {
			kind: ChangeKind::Set,
			element: id.clone(),
			index,
			old: Some(old.clone()),
			new: Some(Entry::new(key, value)),
			key_changed,
			cause: self.tx.cause().child("set"),
		});
		Ok(old)
	}

	fn emit(&self, change: SourceChange<K, V>) {
		self.stream.dispatch(&SourceEvent::Change(change));
	}

	/// Schedules this stream's commit for when the outermost transaction on
	/// the shared lock closes, whichever stream opened it.
	fn commit_on_close(&self) {
		let stream = Arc::downgrade(&self.stream.inner);
		self.tx.lock().on_close(Arc::as_ptr(&self.stream.inner) as usize, move |cause| {
			if let Some(inner) = stream.upgrade() {
				EntryStream { inner }.commit(cause);
			}
		});
	}
}
