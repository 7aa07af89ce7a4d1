//! Identities for elements of a live sequence and for key buckets.
//!
//! An [`ElementId`] names one element of an ordered sequence for as long as
//! that element is present. Identities compare in sequence order without
//! consulting the sequence: the [`OrderKey`] inside is a dense fractional
//! index, so a new element inserted between two neighbours gets a key that
//! sorts strictly between theirs and no existing key ever changes.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

/// Number of distinct values a single digit can hold.
const DIGIT_SPAN: u64 = 1 << 32;

/// Gap left after the last (or before the first) key when appending or prepending.
const STEP: u64 = 1 << 16;

/// Dense, totally ordered position key.
///
/// Keys are sequences of 32-bit digits compared lexicographically (a proper
/// prefix sorts first). Generated keys never end in a zero digit, which keeps
/// the space between any two distinct keys non-empty.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey(SmallVec<[u32; 2]>);

impl OrderKey {
	/// Returns a key strictly between `lo` and `hi`.
	///
	/// `None` stands for an open bound. Appending (`hi == None`) and prepending
	/// (`lo == None`) step by a fixed stride so that long append-only histories
	/// keep keys short.
	///
	/// # Panics
	///
	/// Debug builds panic if `lo >= hi`.
	pub fn between(lo: Option<&OrderKey>, hi: Option<&OrderKey>) -> OrderKey {
		match (lo, hi) {
			(None, None) => return OrderKey::initial(),
			(Some(lo), Some(hi)) => debug_assert!(lo < hi, "OrderKey::between called with lo >= hi"),
			_ => {}
		}

		let mut digits = SmallVec::new();
		let mut bounded = hi.is_some();
		let mut depth = 0;
		loop {
			let lo_digit = lo.and_then(|k| k.0.get(depth)).map_or(0, |d| u64::from(*d));
			let lo_open = lo.is_none_or(|k| depth >= k.0.len());
			let hi_digit = match hi {
				Some(k) if bounded => match k.0.get(depth) {
					Some(d) => u64::from(*d),
					None => {
						bounded = false;
						DIGIT_SPAN
					}
				},
				_ => DIGIT_SPAN,
			};

			let gap = hi_digit.saturating_sub(lo_digit);
			if gap > 1 {
				let mid = if !bounded {
					lo_digit + STEP.min(gap / 2)
				} else if lo_open {
					hi_digit - STEP.min(gap / 2)
				} else {
					lo_digit + gap / 2
				};
				digits.push(mid as u32);
				return OrderKey(digits);
			}

			digits.push(lo_digit as u32);
			if gap == 1 {
				bounded = false;
			}
			depth += 1;
		}
	}

	/// Key for the first element of an empty sequence.
	///
	/// Sits in the middle of the first digit so that appends and prepends
	/// have the same room.
	pub fn initial() -> OrderKey {
		OrderKey(SmallVec::from_slice(&[(DIGIT_SPAN / 2) as u32]))
	}

	/// Number of digits in the key.
	pub fn depth(&self) -> usize {
		self.0.len()
	}

	pub fn digits(&self) -> &[u32] {
		&self.0
	}
}

impl fmt::Debug for OrderKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.0.iter()).finish()
	}
}

/// Opaque, order-comparable identity of one element of a live sequence.
///
/// Ordering follows the element's position in its sequence. Equality also
/// covers a per-sequence serial, so the identity of a removed element never
/// aliases an element inserted later.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ElementId {
	order: OrderKey,
	serial: u64,
}

impl ElementId {
	pub fn new(order: OrderKey, serial: u64) -> Self {
		Self { order, serial }
	}

	pub fn order(&self) -> &OrderKey {
		&self.order
	}

	/// Serial assigned when the element was inserted.
	pub fn serial(&self) -> u64 {
		self.serial
	}
}

impl Ord for ElementId {
	fn cmp(&self, other: &Self) -> Ordering {
		self.order.cmp(&other.order).then(self.serial.cmp(&other.serial))
	}
}

impl PartialOrd for ElementId {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Debug for ElementId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ElementId(#{} @ {:?})", self.serial, self.order)
	}
}

impl fmt::Display for ElementId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.serial)
	}
}

/// Identity of a key bucket for its lifetime. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u64);

impl KeyId {
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn as_raw(self) -> u64 {
		self.0
	}
}

impl fmt::Debug for KeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "KeyId({})", self.0)
	}
}

impl fmt::Display for KeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "k{}", self.0)
	}
}

#[cfg(test)]
mod tests;
