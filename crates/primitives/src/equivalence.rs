//! Equivalence relations used to group keys and to match values.
//!
//! Structures never discover equality or ordering on their own: callers pass
//! an [`Equivalence`] at construction. A relation whose [`Equivalence::compare`]
//! is total reports so through [`Equivalence::is_sorted`], which switches
//! grouping structures from hashed to ordered key indexes.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// An equivalence relation over `T`, optionally backed by a total order.
pub trait Equivalence<T: ?Sized>: Send + Sync {
	fn equivalent(&self, a: &T, b: &T) -> bool;

	/// Hash consistent with [`Self::equivalent`]. Ordered relations may return
	/// a constant, since ordered indexes never hash.
	fn hash_key(&self, value: &T) -> u64;

	/// Total order consistent with [`Self::equivalent`], when there is one.
	fn compare(&self, _a: &T, _b: &T) -> Option<Ordering> {
		None
	}

	fn is_sorted(&self) -> bool {
		false
	}
}

/// `Eq` + `Hash` equality.
#[derive(Debug, Default, Clone, Copy)]
pub struct Equality;

impl<T: Eq + Hash + ?Sized> Equivalence<T> for Equality {
	fn equivalent(&self, a: &T, b: &T) -> bool {
		a == b
	}

	fn hash_key(&self, value: &T) -> u64 {
		let mut hasher = FxHasher::default();
		value.hash(&mut hasher);
		hasher.finish()
	}
}

/// The type's natural [`Ord`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T: Ord + ?Sized> Equivalence<T> for NaturalOrder {
	fn equivalent(&self, a: &T, b: &T) -> bool {
		a.cmp(b) == Ordering::Equal
	}

	fn hash_key(&self, _value: &T) -> u64 {
		0
	}

	fn compare(&self, a: &T, b: &T) -> Option<Ordering> {
		Some(a.cmp(b))
	}

	fn is_sorted(&self) -> bool {
		true
	}
}

/// Ordering supplied as a closure. Two values are equivalent when the
/// closure orders them equal.
#[derive(Clone, Copy)]
pub struct Comparator<F>(F);

impl<F> Comparator<F> {
	pub fn new<T: ?Sized>(compare: F) -> Self
	where
		F: Fn(&T, &T) -> Ordering + Send + Sync,
	{
		Self(compare)
	}
}

impl<T: ?Sized, F> Equivalence<T> for Comparator<F>
where
	F: Fn(&T, &T) -> Ordering + Send + Sync,
{
	fn equivalent(&self, a: &T, b: &T) -> bool {
		(self.0)(a, b) == Ordering::Equal
	}

	fn hash_key(&self, _value: &T) -> u64 {
		0
	}

	fn compare(&self, a: &T, b: &T) -> Option<Ordering> {
		Some((self.0)(a, b))
	}

	fn is_sorted(&self) -> bool {
		true
	}
}
