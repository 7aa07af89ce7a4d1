//! Ordered key/value sequence addressed by element identity.
//!
//! # Mental Model
//!
//! An [`EntryStream`] is a list of [`Entry`] values. Each entry is named by an
//! [`ElementId`] that stays valid until the entry is removed and that orders
//! like the entry's position. Writes go through a [`StreamTransaction`]: each
//! write emits one [`SourceEvent::Change`] to every subscriber, and closing the
//! outermost transaction emits a single [`SourceEvent::Commit`] if anything
//! changed. Streams built over one shared lock commit together when the
//! outermost transaction on that lock closes.
//!
//! # Concurrency
//!
//! - **Writes:** serialized by the stream's [`TransactionLock`], which derived
//!   structures share.
//! - **Reads:** take the lock shared, so other threads see a transaction
//!   whole or not at all. The writer's own thread reads without locking.
//! - **State:** kept behind a short-lived [`RwLock`] that is released before
//!   any listener runs, so listeners may read the stream.
//! - **Listeners:** run synchronously on the writer's thread and must not
//!   write to the stream (doing so panics).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use sheaf_primitives::{
	Cause, ChangeKind, CollectError, ElementId, ListenerList, LockError, OrderKey, RankedTree, ReadTransaction,
	Rejection, Subscription, TransactionLock,
};

mod transaction;

pub use transaction::StreamTransaction;

/// Bounds shared by every key and value type stored in a stream.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry<K, V> {
	pub key: K,
	pub value: V,
}

impl<K, V> Entry<K, V> {
	pub fn new(key: K, value: V) -> Self {
		Self { key, value }
	}
}

/// Where [`StreamTransaction::insert`] places a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
	First,
	Last,
	Before(ElementId),
	After(ElementId),
}

/// One structural change to the stream.
#[derive(Debug, Clone)]
pub struct SourceChange<K, V> {
	pub kind: ChangeKind,
	pub element: ElementId,
	/// Index of the element; for removals, the index it had before removal.
	pub index: usize,
	pub old: Option<Entry<K, V>>,
	pub new: Option<Entry<K, V>>,
	/// Set when a [`ChangeKind::Set`] replaced the key as well as the value.
	pub key_changed: bool,
	pub cause: Cause,
}

#[derive(Debug, Clone)]
pub enum SourceEvent<K, V> {
	Change(SourceChange<K, V>),
	/// The outermost transaction that produced changes has closed.
	Commit { cause: Cause },
}

pub type StreamListener<K, V> = dyn Fn(&SourceEvent<K, V>) + Send + Sync;

/// Returns a reason when an entry may not be stored.
pub type EntryFilter<K, V> = dyn Fn(&K, &V) -> Option<String> + Send + Sync;

pub(crate) struct StreamState<K, V> {
	pub(crate) entries: RankedTree<ElementId, Entry<K, V>>,
	next_serial: u64,
	stamp: u64,
	dirty: bool,
}

impl<K, V> StreamState<K, V> {
	fn new() -> Self {
		Self {
			entries: RankedTree::new(),
			next_serial: 0,
			stamp: 0,
			dirty: false,
		}
	}

	/// Identity for a new entry between `lo` and `hi`.
	pub(crate) fn mint(&mut self, lo: Option<&ElementId>, hi: Option<&ElementId>) -> ElementId {
		let order = OrderKey::between(lo.map(ElementId::order), hi.map(ElementId::order));
		let serial = self.next_serial;
		self.next_serial += 1;
		ElementId::new(order, serial)
	}

	pub(crate) fn touch(&mut self) {
		self.stamp += 1;
		self.dirty = true;
	}

	pub(crate) fn take_dirty(&mut self) -> bool {
		std::mem::take(&mut self.dirty)
	}

	fn stale(id: &ElementId) -> CollectError {
		CollectError::StaleElement(id.clone())
	}

	/// Neighbours a new entry at `at` is placed between.
	#[allow(clippy::type_complexity)]
	pub(crate) fn neighbours(
		&self,
		at: &Position,
	) -> Result<(Option<ElementId>, Option<ElementId>), CollectError> {
		let key = |e: Option<(&ElementId, &Entry<K, V>)>| e.map(|(id, _)| id.clone());
		match at {
			Position::First => Ok((None, key(self.entries.first()))),
			Position::Last => Ok((key(self.entries.last()), None)),
			Position::Before(id) => {
				if !self.entries.contains_key(id) {
					return Err(Self::stale(id));
				}
				Ok((key(self.entries.lower(id)), Some(id.clone())))
			}
			Position::After(id) => {
				if !self.entries.contains_key(id) {
					return Err(Self::stale(id));
				}
				Ok((Some(id.clone()), key(self.entries.higher(id))))
			}
		}
	}
}

pub(crate) struct StreamInner<K, V> {
	label: &'static str,
	pub(crate) lock: Arc<TransactionLock>,
	pub(crate) state: RwLock<StreamState<K, V>>,
	listeners: ListenerList<StreamListener<K, V>>,
	filter: Option<Box<EntryFilter<K, V>>>,
	pub(crate) read_only: bool,
}

/// Shared handle to a live entry sequence.
pub struct EntryStream<K, V> {
	pub(crate) inner: Arc<StreamInner<K, V>>,
}

impl<K, V> Clone for EntryStream<K, V> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<K: Data, V: Data> EntryStream<K, V> {
	pub fn new(label: &'static str) -> Self {
		StreamBuilder::new(label).build()
	}

	pub fn builder(label: &'static str) -> StreamBuilder<K, V> {
		StreamBuilder::new(label)
	}

	pub fn label(&self) -> &'static str {
		self.inner.label
	}

	/// The lock shared by every structure derived from this stream.
	pub fn lock(&self) -> &Arc<TransactionLock> {
		&self.inner.lock
	}

	pub fn is_read_only(&self) -> bool {
		self.inner.read_only
	}

	pub fn len(&self) -> usize {
		let _read = self.lock_read();
		self.inner.state.read().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Counter bumped by every write.
	pub fn stamp(&self) -> u64 {
		let _read = self.lock_read();
		self.inner.state.read().stamp
	}

	pub fn get(&self, id: &ElementId) -> Option<Entry<K, V>> {
		let _read = self.lock_read();
		self.inner.state.read().entries.get(id).cloned()
	}

	pub fn contains(&self, id: &ElementId) -> bool {
		let _read = self.lock_read();
		self.inner.state.read().entries.contains_key(id)
	}

	pub fn index_of(&self, id: &ElementId) -> Option<usize> {
		let _read = self.lock_read();
		self.inner.state.read().entries.rank(id)
	}

	pub fn id_at(&self, index: usize) -> Option<ElementId> {
		let _read = self.lock_read();
		self.inner
			.state
			.read()
			.entries
			.get_index(index)
			.map(|(id, _)| id.clone())
	}

	pub fn entry_at(&self, index: usize) -> Option<(ElementId, Entry<K, V>)> {
		let _read = self.lock_read();
		self.inner
			.state
			.read()
			.entries
			.get_index(index)
			.map(|(id, e)| (id.clone(), e.clone()))
	}

	pub fn first_id(&self) -> Option<ElementId> {
		let _read = self.lock_read();
		self.inner.state.read().entries.first().map(|(id, _)| id.clone())
	}

	pub fn last_id(&self) -> Option<ElementId> {
		let _read = self.lock_read();
		self.inner.state.read().entries.last().map(|(id, _)| id.clone())
	}

	/// Snapshot of all entries in order.
	pub fn entries(&self) -> Vec<(ElementId, Entry<K, V>)> {
		let _read = self.lock_read();
		self.inner
			.state
			.read()
			.entries
			.iter()
			.map(|(id, e)| (id.clone(), e.clone()))
			.collect()
	}

	/// Why adding `key`/`value` would be rejected, if it would.
	pub fn can_add(&self, key: &K, value: &V) -> Option<Rejection> {
		self.check_entry(key, value)
	}

	pub fn can_remove(&self, id: &ElementId) -> Option<Rejection> {
		if self.inner.read_only {
			return Some(Rejection::ReadOnly);
		}
		(!self.contains(id)).then_some(Rejection::NotFound)
	}

	/// Why replacing the entry at `id` with `key`/`value` would be rejected.
	pub fn is_acceptable(&self, id: &ElementId, key: &K, value: &V) -> Option<Rejection> {
		if self.inner.read_only {
			return Some(Rejection::ReadOnly);
		}
		if !self.contains(id) {
			return Some(Rejection::NotFound);
		}
		self.check_entry(key, value)
	}

	pub(crate) fn check_entry(&self, key: &K, value: &V) -> Option<Rejection> {
		if self.inner.read_only {
			return Some(Rejection::ReadOnly);
		}
		self.inner
			.filter
			.as_ref()
			.and_then(|filter| filter(key, value))
			.map(Rejection::Filtered)
	}

	/// Opens (or joins) a write transaction.
	///
	/// # Panics
	///
	/// Panics when called from a listener of this stream or of anything
	/// derived from it.
	pub fn lock_write(&self, cause: Cause) -> StreamTransaction<'_, K, V> {
		let tx = self.inner.lock.lock_write(cause);
		StreamTransaction::new(self, tx)
	}

	pub fn try_lock_write(&self, cause: Cause) -> Result<StreamTransaction<'_, K, V>, LockError> {
		let tx = self.inner.lock.try_lock_write(cause)?;
		Ok(StreamTransaction::new(self, tx))
	}

	pub fn lock_read(&self) -> ReadTransaction<'_> {
		self.inner.lock.lock_read()
	}

	pub fn try_lock_read(&self) -> Result<ReadTransaction<'_>, LockError> {
		self.inner.lock.try_lock_read()
	}

	pub fn add(&self, key: K, value: V) -> Result<ElementId, CollectError> {
		self.lock_write(Cause::new("add")).add(key, value)
	}

	pub fn insert(
		&self,
		key: K,
		value: V,
		at: Position,
	) -> Result<ElementId, CollectError> {
		self.lock_write(Cause::new("insert")).insert(key, value, at)
	}

	pub fn remove(&self, id: &ElementId) -> Result<Entry<K, V>, CollectError> {
		self.lock_write(Cause::new("remove")).remove(id)
	}

	pub fn set_value(&self, id: &ElementId, value: V) -> Result<V, CollectError> {
		self.lock_write(Cause::new("set")).set_value(id, value)
	}

	pub fn set_entry(
		&self,
		id: &ElementId,
		key: K,
		value: V,
	) -> Result<Entry<K, V>, CollectError> {
		self.lock_write(Cause::new("set")).set_entry(id, key, value)
	}

	pub fn remove_where(
		&self,
		pred: impl FnMut(&K, &V) -> bool,
	) -> Result<usize, CollectError> {
		self.lock_write(Cause::new("remove_where")).remove_where(pred)
	}

	pub fn clear(&self) -> Result<usize, CollectError> {
		self.lock_write(Cause::new("clear")).clear()
	}

	/// Registers a listener for future events.
	pub fn subscribe(
		&self,
		listener: impl Fn(&SourceEvent<K, V>) + Send + Sync + 'static,
	) -> Subscription {
		self.inner.listeners.add(Arc::new(listener))
	}

	/// Delivers one add per existing entry, in order and under one cause,
	/// then registers `listener` for live events. No write can interleave.
	pub fn subscribe_with_replay(
		&self,
		listener: impl Fn(&SourceEvent<K, V>) + Send + Sync + 'static,
	) -> Subscription {
		let listener: Arc<StreamListener<K, V>> = Arc::new(listener);
		let _read = self.lock_read();
		let snapshot = self.entries();
		if !snapshot.is_empty() {
			let cause = Cause::new("replay");
			let _scope = self.inner.lock.dispatching();
			for (index, (element, entry)) in snapshot.into_iter().enumerate() {
				listener(&SourceEvent::Change(SourceChange {
					kind: ChangeKind::Add,
					element,
					index,
					old: None,
					new: Some(entry),
					key_changed: false,
					cause: cause.clone(),
				}));
			}
			listener(&SourceEvent::Commit { cause });
		}
		self.inner.listeners.add(listener)
	}

	/// Announces a commit if anything changed since the last one.
	pub(crate) fn commit(&self, cause: &Cause) {
		let dirty = self.inner.state.write().take_dirty();
		if dirty {
			tracing::trace!(stream = self.label(), ?cause, "stream committed");
			self.dispatch(&SourceEvent::Commit { cause: cause.clone() });
		}
	}

	pub(crate) fn dispatch(&self, event: &SourceEvent<K, V>) {
		let listeners = self.inner.listeners.snapshot();
		if listeners.is_empty() {
			return;
		}
		let _scope = self.inner.lock.dispatching();
		for listener in listeners.iter() {
			listener(event);
		}
	}
}

impl<K: Data, V: Data> fmt::Debug for EntryStream<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EntryStream")
			.field("label", &self.inner.label)
			.field("len", &self.len())
			.field("read_only", &self.inner.read_only)
			.finish()
	}
}

/// Configures an [`EntryStream`].
pub struct StreamBuilder<K, V> {
	label: &'static str,
	lock: Option<Arc<TransactionLock>>,
	filter: Option<Box<EntryFilter<K, V>>>,
	read_only: bool,
	seed: Vec<(K, V)>,
}

impl<K: Data, V: Data> StreamBuilder<K, V> {
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			lock: None,
			filter: None,
			read_only: false,
			seed: Vec::new(),
		}
	}

	/// Joins an existing lock instead of creating one.
	pub fn shared_lock(mut self, lock: Arc<TransactionLock>) -> Self {
		self.lock = Some(lock);
		self
	}

	/// Rejects entries for which `filter` returns a reason.
	pub fn filter(mut self, filter: impl Fn(&K, &V) -> Option<String> + Send + Sync + 'static) -> Self {
		self.filter = Some(Box::new(filter));
		self
	}

	pub fn read_only(mut self) -> Self {
		self.read_only = true;
		self
	}

	/// Initial contents. Not subject to the filter.
	pub fn entries(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self {
		self.seed.extend(entries);
		self
	}

	pub fn build(self) -> EntryStream<K, V> {
		let mut state = StreamState::new();
		let mut last: Option<ElementId> = None;
		for (key, value) in self.seed {
			let id = state.mint(last.as_ref(), None);
			state.entries.insert(id.clone(), Entry::new(key, value));
			last = Some(id);
		}
		let lock = self
			.lock
			.unwrap_or_else(|| Arc::new(TransactionLock::new(self.label)));
		tracing::debug!(stream = self.label, len = state.entries.len(), "entry stream created");
		EntryStream {
			inner: Arc::new(StreamInner {
				label: self.label,
				lock,
				state: RwLock::new(state),
				listeners: ListenerList::new(),
				filter: self.filter,
				read_only: self.read_only,
			}),
		}
	}
}
