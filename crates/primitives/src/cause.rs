//! Causality chains.
//!
//! Every event carries the [`Cause`] of the logical operation that produced
//! it. Causes form a parent chain: a transaction opens a root cause, each
//! operation inside it derives a child, and derived structures hand the same
//! cause on so observers can tell which notifications belong together.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CAUSE: AtomicU64 = AtomicU64::new(1);

struct CauseNode {
	id: u64,
	label: &'static str,
	parent: Option<Cause>,
}

/// Cheaply clonable handle to one link of a causality chain.
#[derive(Clone)]
pub struct Cause(Arc<CauseNode>);

impl Cause {
	/// Starts a new chain.
	pub fn new(label: &'static str) -> Self {
		Self::with_parent(label, None)
	}

	/// Derives a cause whose parent is `self`.
	pub fn child(&self, label: &'static str) -> Self {
		Self::with_parent(label, Some(self.clone()))
	}

	fn with_parent(label: &'static str, parent: Option<Cause>) -> Self {
		Self(Arc::new(CauseNode {
			id: NEXT_CAUSE.fetch_add(1, Ordering::Relaxed),
			label,
			parent,
		}))
	}

	/// Process-unique id of this link.
	pub fn id(&self) -> u64 {
		self.0.id
	}

	pub fn label(&self) -> &'static str {
		self.0.label
	}

	pub fn parent(&self) -> Option<&Cause> {
		self.0.parent.as_ref()
	}

	/// Root of the chain.
	pub fn origin(&self) -> &Cause {
		let mut cur = self;
		while let Some(parent) = cur.parent() {
			cur = parent;
		}
		cur
	}

	/// Iterates from `self` up to the root.
	pub fn chain(&self) -> impl Iterator<Item = &Cause> {
		std::iter::successors(Some(self), |c| c.parent())
	}

	/// Number of ancestors.
	pub fn depth(&self) -> usize {
		self.chain().count() - 1
	}

	/// Whether `other` is `self` or one of its ancestors.
	pub fn is_within(&self, other: &Cause) -> bool {
		self.chain().any(|c| c == other)
	}
}

impl PartialEq for Cause {
	fn eq(&self, other: &Self) -> bool {
		self.0.id == other.0.id
	}
}

impl Eq for Cause {}

impl fmt::Debug for Cause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let labels: Vec<_> = self.chain().map(|c| c.label()).collect();
		write!(f, "Cause#{}({})", self.0.id, labels.join(" <- "))
	}
}
