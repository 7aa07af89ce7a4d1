//! Copy-on-write listener lists.
//!
//! Registration swaps in a new list ([`ArcSwap::rcu`]); dispatch iterates a
//! snapshot, so listeners may subscribe or unsubscribe while being notified
//! without affecting the dispatch in progress.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use smallvec::SmallVec;

type Entries<F> = Vec<(u64, Arc<F>)>;

struct Registry<F: ?Sized> {
	next: AtomicU64,
	entries: ArcSwap<Entries<F>>,
}

/// A list of callbacks of type `F` (usually a `dyn Fn(..)`).
pub struct ListenerList<F: ?Sized> {
	registry: Arc<Registry<F>>,
}

impl<F: ?Sized> Default for ListenerList<F> {
	fn default() -> Self {
		Self {
			registry: Arc::new(Registry {
				next: AtomicU64::new(0),
				entries: ArcSwap::from_pointee(Vec::new()),
			}),
		}
	}
}

impl<F: ?Sized + Send + Sync + 'static> ListenerList<F> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `listener`; dropping the returned handle removes it.
	pub fn add(&self, listener: Arc<F>) -> Subscription {
		let id = self.registry.next.fetch_add(1, Ordering::Relaxed);
		self.registry.entries.rcu(|current| {
			let mut next = Entries::clone(current);
			next.push((id, Arc::clone(&listener)));
			next
		});

		let weak: Weak<Registry<F>> = Arc::downgrade(&self.registry);
		Subscription::from_fn(move || {
			if let Some(registry) = weak.upgrade() {
				registry.entries.rcu(|current| {
					current
						.iter()
						.filter(|(entry, _)| *entry != id)
						.cloned()
						.collect::<Entries<F>>()
				});
			}
		})
	}

	/// Listeners registered at the time of the call.
	pub fn snapshot(&self) -> ListenerSnapshot<F> {
		ListenerSnapshot(self.registry.entries.load_full())
	}

	pub fn len(&self) -> usize {
		self.registry.entries.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Point-in-time view of a [`ListenerList`].
pub struct ListenerSnapshot<F: ?Sized>(Arc<Entries<F>>);

impl<F: ?Sized> ListenerSnapshot<F> {
	pub fn iter(&self) -> impl Iterator<Item = &F> {
		self.0.iter().map(|(_, f)| &**f)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Disposable registration handle.
///
/// Dropping the handle unsubscribes. [`Subscription::detach`] keeps the
/// listener registered for the lifetime of the list instead.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Default)]
pub struct Subscription {
	cancel: SmallVec<[Box<dyn FnOnce() + Send + Sync>; 1]>,
}

impl Subscription {
	pub fn from_fn(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
		let mut this = Self::default();
		this.cancel.push(Box::new(cancel));
		this
	}

	/// Combines several handles into one.
	pub fn all(subs: impl IntoIterator<Item = Subscription>) -> Self {
		let mut this = Self::default();
		for mut sub in subs {
			this.cancel.extend(sub.cancel.drain(..));
		}
		this
	}

	pub fn unsubscribe(self) {}

	pub fn detach(mut self) {
		self.cancel.clear();
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		for cancel in self.cancel.drain(..) {
			cancel();
		}
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("handles", &self.cancel.len())
			.finish()
	}
}
