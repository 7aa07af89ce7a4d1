//! Live group-by over an [`EntryStream`].
//!
//! # Mental Model
//!
//! A [`GroupingManager`] subscribes to its source stream and feeds every
//! change through the key materialization state ([`crate::unique`]). The
//! resulting [`MultiMapEvent`]s are delivered to listeners together with a
//! [`GroupingView`] of the state as it stands after the source operation.
//!
//! Commits of the source transaction are forwarded once per transaction;
//! batch listeners receive every event of the transaction in one slice at
//! that point.
//!
//! # Concurrency
//!
//! The grouping shares the source's [`TransactionLock`]. Its own state sits
//! behind a [`RwLock`] that is written only while translating a source
//! change on the writer's thread, then downgraded for dispatch. Listeners
//! may read the grouping and the source but must not write either.
//!
//! # Invariants
//!
//! - A key remove is delivered before any event for a later bucket that
//!   reuses an equivalent key.
//!   - Enforced in: `GroupingInner::on_change` (events of one source change
//!     are dispatched in emission order).
//!   - Tested by: [`crate::invariants::test_event_completeness`]
//!   - Failure symptom: observers see two buckets for one key.
//!
//! - Readers on other threads never observe part of a write transaction.
//!   - Enforced in: [`GroupingManager::with_view`] and the other read entry
//!     points (take the source read lock before the state lock).
//!   - Tested by: `grouping::tests::other_threads_wait_for_the_whole_transaction`
//!   - Failure symptom: a reader sees one removal of a two-removal batch.
//!
//! - Keys removed by a change stop resolving once its dispatch ends, even if
//!   a listener panicked.
//!   - Enforced in: `ClearPending`.
//!   - Tested by: `grouping::tests::panicking_listener_still_clears_removed_keys`
//!   - Failure symptom: `entry_by_id` keeps answering for a removed key.
//!
//! - Replay hands a late subscriber the full structure before any live event.
//!   - Enforced in: [`GroupingManager::subscribe_with_replay`] (replays and
//!     registers under the source read lock).
//!   - Tested by: [`crate::invariants::test_event_completeness`]
//!   - Failure symptom: initial state built from replay misses a concurrent
//!     write.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use sheaf_collect::{Data, EntryStream, SourceChange, SourceEvent};
use sheaf_primitives::{Cause, ChangeKind, Equivalence, ListenerList, Subscription, TransactionLock};

use crate::error::IntegrityViolation;
use crate::event::{Group, MultiMapEvent};
use crate::options::{GroupingOptions, KeyOrder};
use crate::unique::UniqueState;

mod view;

pub use view::GroupingView;

/// Receives each grouping event with a view of the post-operation state.
pub type GroupingListener<K, V> = dyn Fn(&MultiMapEvent<K, V>, &GroupingView<'_, K, V>) + Send + Sync;

/// Receives the cause of each committed source transaction.
pub type CommitListener = dyn Fn(&Cause) + Send + Sync;

/// Receives every event of one transaction at commit.
pub type BatchListener<K, V> = dyn Fn(&[MultiMapEvent<K, V>]) + Send + Sync;

struct GroupingInner<K, V> {
	source: EntryStream<K, V>,
	keys: Arc<dyn Equivalence<K>>,
	values: Arc<dyn Equivalence<V>>,
	options: GroupingOptions,
	state: RwLock<UniqueState<K, V>>,
	listeners: ListenerList<GroupingListener<K, V>>,
	commit_listeners: ListenerList<CommitListener>,
	batch_listeners: ListenerList<BatchListener<K, V>>,
	batch: Mutex<Vec<MultiMapEvent<K, V>>>,
	_source: Subscription,
}

/// Shared handle to a live grouping.
pub struct GroupingManager<K, V> {
	inner: Arc<GroupingInner<K, V>>,
}

impl<K, V> Clone for GroupingManager<K, V> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<K: Data, V: Data> GroupingManager<K, V> {
	/// Groups `source` by key under `keys`. Sorted key equivalences produce
	/// sorted key order regardless of `options`.
	pub fn new(
		source: EntryStream<K, V>,
		keys: impl Equivalence<K> + 'static,
		values: impl Equivalence<V> + 'static,
		options: GroupingOptions,
	) -> Self {
		Self::with_equivalences(source, Arc::new(keys), Arc::new(values), options)
	}

	pub fn with_equivalences(
		source: EntryStream<K, V>,
		keys: Arc<dyn Equivalence<K>>,
		values: Arc<dyn Equivalence<V>>,
		options: GroupingOptions,
	) -> Self {
		let order = options.key_order(keys.is_sorted());
		let mut state = UniqueState::new(Arc::clone(&keys), options.representative, order);

		let handle = source.clone();
		let _read = handle.lock_read();
		let seed = Cause::new("seed");
		let mut discarded = Vec::new();
		for (element, entry) in source.entries() {
			state.add(element, entry.key, entry.value, &seed, &mut discarded);
			discarded.clear();
		}
		state.clear_pending();
		tracing::debug!(
			stream = source.label(),
			keys = state.len(),
			values = state.value_count(),
			?order,
			"grouping created"
		);

		let inner = Arc::new_cyclic(|weak: &Weak<GroupingInner<K, V>>| {
			let weak = weak.clone();
			let subscription = source.subscribe(move |event| {
				if let Some(inner) = weak.upgrade() {
					inner.on_source(event);
				}
			});
			GroupingInner {
				source,
				keys,
				values,
				options,
				state: RwLock::new(state),
				listeners: ListenerList::new(),
				commit_listeners: ListenerList::new(),
				batch_listeners: ListenerList::new(),
				batch: Mutex::new(Vec::new()),
				_source: subscription,
			}
		});
		Self { inner }
	}

	pub fn source(&self) -> &EntryStream<K, V> {
		&self.inner.source
	}

	pub fn lock(&self) -> &Arc<TransactionLock> {
		self.inner.source.lock()
	}

	pub fn options(&self) -> GroupingOptions {
		self.inner.options
	}

	pub fn key_order(&self) -> KeyOrder {
		self.inner.state.read_recursive().order_mode()
	}

	pub fn key_equivalence(&self) -> &dyn Equivalence<K> {
		&*self.inner.keys
	}

	pub fn value_equivalence(&self) -> &dyn Equivalence<V> {
		&*self.inner.values
	}

	pub(crate) fn shared_keys(&self) -> Arc<dyn Equivalence<K>> {
		Arc::clone(&self.inner.keys)
	}

	/// Runs `f` against a consistent view of the grouping.
	///
	/// Waits for a write transaction open on another thread, so a batch is
	/// seen whole or not at all. On the writer's own thread this never blocks.
	pub fn with_view<R>(&self, f: impl FnOnce(&GroupingView<'_, K, V>) -> R) -> R {
		let _read = self.inner.source.lock_read();
		let state = self.inner.state.read_recursive();
		f(&GroupingView::new(&state))
	}

	pub fn len(&self) -> usize {
		let _read = self.inner.source.lock_read();
		self.inner.state.read_recursive().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn value_count(&self) -> usize {
		let _read = self.inner.source.lock_read();
		self.inner.state.read_recursive().value_count()
	}

	/// Snapshot of all buckets in key order.
	pub fn groups(&self) -> Vec<Group<K, V>> {
		let _read = self.inner.source.lock_read();
		self.inner.state.read_recursive().groups()
	}

	pub fn subscribe(&self, listener: impl Fn(&MultiMapEvent<K, V>) + Send + Sync + 'static) -> Subscription {
		self.subscribe_with_view(move |event, _| listener(event))
	}

	pub fn subscribe_with_view(
		&self,
		listener: impl Fn(&MultiMapEvent<K, V>, &GroupingView<'_, K, V>) + Send + Sync + 'static,
	) -> Subscription {
		self.inner.listeners.add(Arc::new(listener))
	}

	/// Delivers one key add followed by its value adds for every bucket, in
	/// key then member order and under one cause, then registers `listener`
	/// for live events. No write can interleave.
	pub fn subscribe_with_replay(
		&self,
		listener: impl Fn(&MultiMapEvent<K, V>, &GroupingView<'_, K, V>) + Send + Sync + 'static,
	) -> Subscription {
		let listener: Arc<GroupingListener<K, V>> = Arc::new(listener);
		let _read = self.inner.source.lock_read();
		{
			let state = self.inner.state.read_recursive();
			let events = state.replay(&Cause::new("replay"));
			tracing::trace!(events = events.len(), "grouping replay");
			let view = GroupingView::new(&state);
			let _scope = self.lock().dispatching();
			for event in &events {
				listener(event, &view);
			}
		}
		self.inner.listeners.add(listener)
	}

	/// Fires once per source transaction that changed something.
	pub fn on_commit(&self, listener: impl Fn(&Cause) + Send + Sync + 'static) -> Subscription {
		self.inner.commit_listeners.add(Arc::new(listener))
	}

	/// Receives all events of a transaction in one slice when it commits.
	/// Transactions that produced no grouping events are skipped.
	pub fn on_batch(&self, listener: impl Fn(&[MultiMapEvent<K, V>]) + Send + Sync + 'static) -> Subscription {
		self.inner.batch_listeners.add(Arc::new(listener))
	}

	/// Compares the grouping against the current source contents.
	pub fn check_integrity(&self) -> Result<(), IntegrityViolation> {
		let _read = self.inner.source.lock_read();
		let source = self.inner.source.entries();
		self.inner
			.state
			.read_recursive()
			.check(&source, &*self.inner.values)
	}
}

impl<K: Data, V: Data> GroupingInner<K, V> {
	fn on_source(&self, event: &SourceEvent<K, V>) {
		match event {
			SourceEvent::Change(change) => self.on_change(change),
			SourceEvent::Commit { cause } => self.on_commit(cause),
		}
	}

	fn on_change(&self, change: &SourceChange<K, V>) {
		let mut events = Vec::new();
		let _pending = ClearPending(&self.state);
		let mut state = self.state.write();
		match (change.kind, &change.new) {
			(ChangeKind::Add, Some(entry)) => state.add(
				change.element.clone(),
				entry.key.clone(),
				entry.value.clone(),
				&change.cause,
				&mut events,
			),
			(ChangeKind::Remove, _) => state.remove(&change.element, &change.cause, &mut events),
			(ChangeKind::Set, Some(entry)) => state.update(
				&change.element,
				entry.key.clone(),
				entry.value.clone(),
				change.key_changed,
				&change.cause,
				&mut events,
			),
			(kind, None) => {
				tracing::warn!(element = %change.element, ?kind, "source change without new entry ignored");
			}
		}
		tracing::trace!(
			element = %change.element,
			kind = ?change.kind,
			index = change.index,
			events = events.len(),
			"source change translated"
		);

		if !self.batch_listeners.is_empty() {
			self.batch.lock().extend(events.iter().cloned());
		}

		let state = RwLockWriteGuard::downgrade(state);
		let listeners = self.listeners.snapshot();
		if !listeners.is_empty() {
			let view = GroupingView::new(&state);
			for event in &events {
				for listener in listeners.iter() {
					listener(event, &view);
				}
			}
		}
	}

	fn on_commit(&self, cause: &Cause) {
		for listener in self.commit_listeners.snapshot().iter() {
			listener(cause);
		}
		let batch = std::mem::take(&mut *self.batch.lock());
		if batch.is_empty() {
			return;
		}
		tracing::trace!(cause = cause.label(), events = batch.len(), "grouping batch committed");
		for listener in self.batch_listeners.snapshot().iter() {
			listener(&batch);
		}
	}
}

/// Forgets keys removed by the change being dispatched once dispatch ends,
/// including when a listener panics. Must outlive the state guard.
struct ClearPending<'a, K: Data, V: Data>(&'a RwLock<UniqueState<K, V>>);

impl<K: Data, V: Data> Drop for ClearPending<'_, K, V> {
	fn drop(&mut self) {
		self.0.write().clear_pending();
	}
}

impl<K: Data, V: Data> std::fmt::Debug for GroupingManager<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GroupingManager")
			.field("stream", &self.inner.source.label())
			.field("keys", &self.len())
			.field("values", &self.value_count())
			.field("options", &self.inner.options)
			.finish()
	}
}
