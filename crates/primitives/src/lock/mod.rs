//! Chain-wide read/write transactions.
//!
//! # Role
//!
//! One [`TransactionLock`] is shared by every structure in a derivation chain:
//! the root sequence creates it and derived structures hold an `Arc` to it.
//! Writers take it exclusively for the duration of a [`Transaction`]; readers
//! take it shared through a [`ReadTransaction`].
//!
//! # Invariants
//!
//! - Nested write transactions on the owning thread coalesce into the
//!   outermost one and share its cause.
//!   - Enforced in: [`TransactionLock::lock_write`].
//!   - Tested by: `lock::tests::nested_writes_share_cause`.
//!   - Failure symptom: one logical batch produces several commit notifications.
//!
//! - A write attempted while listeners are being dispatched is a fatal usage
//!   error, never a deadlock.
//!   - Enforced in: [`TransactionLock::lock_write`] via [`DispatchScope`].
//!   - Tested by: `lock::tests::write_during_dispatch_panics`.
//!   - Failure symptom: listener that mutates its own source hangs forever.
//!
//! - Reads on the writer's own thread never block; reads on any other thread
//!   wait for the whole write transaction.
//!   - Enforced in: [`TransactionLock::lock_read`].
//!   - Tested by: `lock::tests::writer_can_read_its_own_state`,
//!     `lock::tests::other_threads_read_after_the_writer_closes`.
//!   - Failure symptom: listeners that read the structure they observe
//!     deadlock, or other threads see half of a batch.
//!
//! - Close hooks run once per key, under the outermost cause, before the lock
//!   is released.
//!   - Enforced in: [`TransactionLock::on_close`], `Drop for Transaction`.
//!   - Tested by: `lock::tests::close_hooks_run_once_under_outer_cause`.
//!   - Failure symptom: a structure written through a shared lock never
//!     announces its commit.
//!
//! # Lock ordering
//!
//! The transaction lock is always taken before any per-structure state lock,
//! and state locks are taken root to leaf. State locks are never held
//! exclusively while listeners run.

use std::fmt;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::cause::Cause;
use crate::error::LockError;

type CloseHook = Box<dyn FnOnce(&Cause) + Send>;

#[derive(Default)]
struct Owner {
	thread: Option<ThreadId>,
	depth: usize,
	cause: Option<Cause>,
	dispatching: SmallVec<[ThreadId; 2]>,
	on_close: Vec<(usize, CloseHook)>,
}

impl Owner {
	fn owned_by(&self, thread: ThreadId) -> bool {
		self.thread == Some(thread)
	}

	fn is_dispatching(&self, thread: ThreadId) -> bool {
		self.dispatching.contains(&thread)
	}
}

/// Read/write lock coordinating one derivation chain.
pub struct TransactionLock {
	label: &'static str,
	rw: RwLock<()>,
	owner: Mutex<Owner>,
}

impl TransactionLock {
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			rw: RwLock::new(()),
			owner: Mutex::new(Owner::default()),
		}
	}

	pub fn label(&self) -> &'static str {
		self.label
	}

	/// Opens a write transaction, blocking until the lock is free.
	///
	/// On the thread that already owns the lock this returns a nested
	/// transaction sharing the outermost cause; `cause` is then ignored.
	///
	/// # Panics
	///
	/// Panics when called from a listener being dispatched on this lock.
	pub fn lock_write(&self, cause: Cause) -> Transaction<'_> {
		match self.enter_nested() {
			Ok(Some(tx)) => return tx,
			Ok(None) => {}
			Err(_) => panic!(
				"reentrant write on `{}` from inside listener dispatch",
				self.label
			),
		}
		let guard = self.rw.write();
		self.begin(guard, cause)
	}

	/// Like [`Self::lock_write`] but fails fast instead of blocking.
	pub fn try_lock_write(&self, cause: Cause) -> Result<Transaction<'_>, LockError> {
		if let Some(tx) = self.enter_nested()? {
			return Ok(tx);
		}
		let guard = self.rw.try_write().ok_or(LockError::Contended)?;
		Ok(self.begin(guard, cause))
	}

	/// Opens a read transaction. Satisfied without locking on the thread
	/// that owns the write transaction.
	pub fn lock_read(&self) -> ReadTransaction<'_> {
		if self.is_write_held_by_current_thread() {
			return ReadTransaction { _guard: None };
		}
		ReadTransaction {
			_guard: Some(self.rw.read_recursive()),
		}
	}

	pub fn try_lock_read(&self) -> Result<ReadTransaction<'_>, LockError> {
		if self.is_write_held_by_current_thread() {
			return Ok(ReadTransaction { _guard: None });
		}
		let guard = self.rw.try_read_recursive().ok_or(LockError::Contended)?;
		Ok(ReadTransaction {
			_guard: Some(guard),
		})
	}

	/// Marks the current thread as dispatching listeners until the scope drops.
	pub fn dispatching(&self) -> DispatchScope<'_> {
		let thread = thread::current().id();
		self.owner.lock().dispatching.push(thread);
		DispatchScope { lock: self, thread }
	}

	/// Runs `hook` with the outermost cause when the write transaction held by
	/// this thread closes, before the lock is released. A second hook under
	/// the same `key` in one transaction is dropped. Returns `false` when this
	/// thread holds no write transaction.
	pub fn on_close(&self, key: usize, hook: impl FnOnce(&Cause) + Send + 'static) -> bool {
		let mut owner = self.owner.lock();
		if !owner.owned_by(thread::current().id()) {
			return false;
		}
		if !owner.on_close.iter().any(|(k, _)| *k == key) {
			owner.on_close.push((key, Box::new(hook)));
		}
		true
	}

	pub fn is_write_held_by_current_thread(&self) -> bool {
		self.owner.lock().owned_by(thread::current().id())
	}

	/// Cause of the write transaction owned by this thread, if any.
	pub fn current_cause(&self) -> Option<Cause> {
		let owner = self.owner.lock();
		if owner.owned_by(thread::current().id()) {
			owner.cause.clone()
		} else {
			None
		}
	}

	fn enter_nested(&self) -> Result<Option<Transaction<'_>>, LockError> {
		let thread = thread::current().id();
		let mut owner = self.owner.lock();
		if owner.is_dispatching(thread) {
			return Err(LockError::Reentrant);
		}
		if !owner.owned_by(thread) {
			return Ok(None);
		}
		let Some(cause) = owner.cause.clone() else {
			return Ok(None);
		};
		owner.depth += 1;
		tracing::trace!(lock = self.label, depth = owner.depth, "nested write transaction");
		Ok(Some(Transaction {
			cause,
			hold: Hold { lock: self, guard: None },
		}))
	}

	fn begin<'a>(&'a self, guard: RwLockWriteGuard<'a, ()>, cause: Cause) -> Transaction<'a> {
		let mut owner = self.owner.lock();
		owner.thread = Some(thread::current().id());
		owner.depth = 1;
		owner.cause = Some(cause.clone());
		tracing::trace!(lock = self.label, cause = ?cause, "write transaction opened");
		Transaction {
			cause,
			hold: Hold {
				lock: self,
				guard: Some(guard),
			},
		}
	}
}

impl fmt::Debug for TransactionLock {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransactionLock")
			.field("label", &self.label)
			.finish_non_exhaustive()
	}
}

/// Exclusive write transaction. Only the outermost transaction on a thread
/// holds the lock; nested ones share its cause.
#[must_use = "the transaction ends when dropped"]
pub struct Transaction<'a> {
	cause: Cause,
	hold: Hold<'a>,
}

impl Transaction<'_> {
	pub fn cause(&self) -> &Cause {
		&self.cause
	}

	/// Whether dropping this transaction releases the lock.
	pub fn is_outermost(&self) -> bool {
		self.hold.guard.is_some()
	}

	pub fn lock(&self) -> &TransactionLock {
		self.hold.lock
	}
}

impl Drop for Transaction<'_> {
	fn drop(&mut self) {
		if !self.is_outermost() || thread::panicking() {
			return;
		}
		// Hooks may register further hooks while they run.
		loop {
			let hooks = std::mem::take(&mut self.hold.lock.owner.lock().on_close);
			if hooks.is_empty() {
				break;
			}
			for (_, hook) in hooks {
				hook(&self.cause);
			}
		}
	}
}

/// Releases ownership after [`Transaction`]'s hooks ran, even if one panicked.
struct Hold<'a> {
	lock: &'a TransactionLock,
	guard: Option<RwLockWriteGuard<'a, ()>>,
}

impl Drop for Hold<'_> {
	fn drop(&mut self) {
		let mut owner = self.lock.owner.lock();
		owner.depth = owner.depth.saturating_sub(1);
		if self.guard.is_some() {
			owner.thread = None;
			owner.cause = None;
			owner.depth = 0;
			owner.on_close.clear();
			tracing::trace!(lock = self.lock.label, "write transaction closed");
		}
		drop(owner);
		self.guard.take();
	}
}

/// Shared read transaction.
#[must_use = "the read transaction ends when dropped"]
pub struct ReadTransaction<'a> {
	_guard: Option<RwLockReadGuard<'a, ()>>,
}

/// Scope during which the current thread is notifying listeners.
pub struct DispatchScope<'a> {
	lock: &'a TransactionLock,
	thread: ThreadId,
}

impl Drop for DispatchScope<'_> {
	fn drop(&mut self) {
		let mut owner = self.lock.owner.lock();
		if let Some(pos) = owner.dispatching.iter().rposition(|t| *t == self.thread) {
			owner.dispatching.remove(pos);
		}
	}
}
