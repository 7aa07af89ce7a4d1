//! Arena-backed order-statistic tree.
//!
//! [`RankedTree`] is a treap whose nodes live in a [`Slab`]; links between
//! nodes are slab indices. Every node records the size of its subtree, which
//! gives logarithmic rank queries and positional access on top of ordinary
//! ordered-map operations.

use std::cmp::Ordering;
use std::fmt;

use slab::Slab;

/// Total order over tree keys.
pub trait Compare<K: ?Sized> {
	fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The key type's own [`Ord`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Natural;

impl<K: Ord + ?Sized> Compare<K> for Natural {
	fn compare(&self, a: &K, b: &K) -> Ordering {
		a.cmp(b)
	}
}

/// Adapts a comparison closure.
#[derive(Clone, Copy)]
pub struct FnCompare<F>(pub F);

impl<K, F> Compare<K> for FnCompare<F>
where
	F: Fn(&K, &K) -> Ordering,
{
	fn compare(&self, a: &K, b: &K) -> Ordering {
		(self.0)(a, b)
	}
}

type Link = Option<usize>;

struct Node<K, V> {
	key: K,
	value: V,
	priority: u64,
	size: usize,
	left: Link,
	right: Link,
}

/// Ordered map with rank queries.
///
/// Keys are unique under the comparator. All operations are expected
/// `O(log n)`.
pub struct RankedTree<K, V, C = Natural> {
	nodes: Slab<Node<K, V>>,
	root: Link,
	cmp: C,
	seed: u64,
}

impl<K, V, C: Compare<K> + Default> Default for RankedTree<K, V, C> {
	fn default() -> Self {
		Self::with_comparator(C::default())
	}
}

impl<K, V> RankedTree<K, V, Natural>
where
	K: Ord,
{
	pub fn new() -> Self {
		Self::with_comparator(Natural)
	}
}

impl<K, V, C: Compare<K>> RankedTree<K, V, C> {
	pub fn with_comparator(cmp: C) -> Self {
		Self {
			nodes: Slab::new(),
			root: None,
			cmp,
			seed: 0x2545_f491_4f6c_dd1d,
		}
	}

	pub fn comparator(&self) -> &C {
		&self.cmp
	}

	pub fn len(&self) -> usize {
		self.size(self.root)
	}

	pub fn is_empty(&self) -> bool {
		self.root.is_none()
	}

	pub fn clear(&mut self) {
		self.nodes.clear();
		self.root = None;
	}

	/// Inserts `key`, returning the previous value if an equal key was present.
	///
	/// An equal key keeps its original key value; only the value is replaced.
	pub fn insert(&mut self, key: K, value: V) -> Option<V> {
		if let Some(idx) = self.find(&key) {
			return Some(std::mem::replace(&mut self.nodes[idx].value, value));
		}

		let priority = self.next_priority();
		let (left, right) = self.split(self.root, &key, false);
		let node = self.nodes.insert(Node {
			key,
			value,
			priority,
			size: 1,
			left: None,
			right: None,
		});
		let merged = self.merge(left, Some(node));
		self.root = self.merge(merged, right);
		None
	}

	/// Removes the entry equal to `key`.
	pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
		let (left, rest) = self.split(self.root, key, false);
		let (found, right) = self.split(rest, key, true);
		self.root = self.merge(left, right);
		found.map(|idx| {
			let node = self.nodes.remove(idx);
			(node.key, node.value)
		})
	}

	pub fn get(&self, key: &K) -> Option<&V> {
		self.find(key).map(|idx| &self.nodes[idx].value)
	}

	pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
		self.find(key).map(|idx| self.entry(idx))
	}

	pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
		self.find(key).map(|idx| &mut self.nodes[idx].value)
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.find(key).is_some()
	}

	/// Position of `key` in iteration order, if present.
	pub fn rank(&self, key: &K) -> Option<usize> {
		let mut cur = self.root;
		let mut below = 0;
		while let Some(idx) = cur {
			let node = &self.nodes[idx];
			match self.cmp.compare(key, &node.key) {
				Ordering::Less => cur = node.left,
				Ordering::Equal => return Some(below + self.size(node.left)),
				Ordering::Greater => {
					below += self.size(node.left) + 1;
					cur = node.right;
				}
			}
		}
		None
	}

	/// Number of keys strictly less than `key`. `key` need not be present.
	pub fn lower_count(&self, key: &K) -> usize {
		let mut cur = self.root;
		let mut below = 0;
		while let Some(idx) = cur {
			let node = &self.nodes[idx];
			if self.cmp.compare(&node.key, key) == Ordering::Less {
				below += self.size(node.left) + 1;
				cur = node.right;
			} else {
				cur = node.left;
			}
		}
		below
	}

	/// Entry at position `index` in iteration order.
	pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
		self.index_node(index).map(|idx| self.entry(idx))
	}

	pub fn first(&self) -> Option<(&K, &V)> {
		let mut cur = self.root?;
		while let Some(left) = self.nodes[cur].left {
			cur = left;
		}
		Some(self.entry(cur))
	}

	pub fn last(&self) -> Option<(&K, &V)> {
		let mut cur = self.root?;
		while let Some(right) = self.nodes[cur].right {
			cur = right;
		}
		Some(self.entry(cur))
	}

	/// Greatest entry `<= key`.
	pub fn floor(&self, key: &K) -> Option<(&K, &V)> {
		self.bound(key, true, true)
	}

	/// Least entry `>= key`.
	pub fn ceiling(&self, key: &K) -> Option<(&K, &V)> {
		self.bound(key, false, true)
	}

	/// Greatest entry `< key`.
	pub fn lower(&self, key: &K) -> Option<(&K, &V)> {
		self.bound(key, true, false)
	}

	/// Least entry `> key`.
	pub fn higher(&self, key: &K) -> Option<(&K, &V)> {
		self.bound(key, false, false)
	}

	pub fn iter(&self) -> Iter<'_, K, V, C> {
		self.iter_from(0)
	}

	/// Iterates in order starting at position `start`.
	pub fn iter_from(&self, start: usize) -> Iter<'_, K, V, C> {
		let mut stack = Vec::new();
		let mut cur = self.root;
		let mut skip = start;
		while let Some(idx) = cur {
			let left = self.size(self.nodes[idx].left);
			match skip.cmp(&left) {
				Ordering::Less => {
					stack.push(idx);
					cur = self.nodes[idx].left;
				}
				Ordering::Equal => {
					stack.push(idx);
					break;
				}
				Ordering::Greater => {
					skip -= left + 1;
					cur = self.nodes[idx].right;
				}
			}
		}
		Iter {
			tree: self,
			stack,
			remaining: self.len().saturating_sub(start),
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
		self.iter().map(|(k, _)| k)
	}

	pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
		self.iter().map(|(_, v)| v)
	}

	fn entry(&self, idx: usize) -> (&K, &V) {
		let node = &self.nodes[idx];
		(&node.key, &node.value)
	}

	fn size(&self, link: Link) -> usize {
		link.map_or(0, |idx| self.nodes[idx].size)
	}

	fn update(&mut self, idx: usize) {
		let size = 1 + self.size(self.nodes[idx].left) + self.size(self.nodes[idx].right);
		self.nodes[idx].size = size;
	}

	fn find(&self, key: &K) -> Option<usize> {
		let mut cur = self.root;
		while let Some(idx) = cur {
			let node = &self.nodes[idx];
			match self.cmp.compare(key, &node.key) {
				Ordering::Less => cur = node.left,
				Ordering::Equal => return Some(idx),
				Ordering::Greater => cur = node.right,
			}
		}
		None
	}

	fn index_node(&self, mut index: usize) -> Option<usize> {
		let mut cur = self.root;
		while let Some(idx) = cur {
			let left = self.size(self.nodes[idx].left);
			match index.cmp(&left) {
				Ordering::Less => cur = self.nodes[idx].left,
				Ordering::Equal => return Some(idx),
				Ordering::Greater => {
					index -= left + 1;
					cur = self.nodes[idx].right;
				}
			}
		}
		None
	}

	fn bound(&self, key: &K, below: bool, inclusive: bool) -> Option<(&K, &V)> {
		let mut cur = self.root;
		let mut best = None;
		while let Some(idx) = cur {
			let node = &self.nodes[idx];
			let ord = self.cmp.compare(&node.key, key);
			if ord == Ordering::Equal && inclusive {
				return Some(self.entry(idx));
			}
			if below {
				if ord == Ordering::Less {
					best = Some(idx);
					cur = node.right;
				} else {
					cur = node.left;
				}
			} else if ord == Ordering::Greater {
				best = Some(idx);
				cur = node.left;
			} else {
				cur = node.right;
			}
		}
		best.map(|idx| self.entry(idx))
	}

	/// Splits `link` into keys ordered before `key` and the rest. With
	/// `equal_left`, keys equal to `key` go to the left half as well.
	fn split(&mut self, link: Link, key: &K, equal_left: bool) -> (Link, Link) {
		let Some(idx) = link else {
			return (None, None);
		};
		let ord = self.cmp.compare(&self.nodes[idx].key, key);
		if ord == Ordering::Less || (equal_left && ord == Ordering::Equal) {
			let (left, right) = self.split(self.nodes[idx].right, key, equal_left);
			self.nodes[idx].right = left;
			self.update(idx);
			(Some(idx), right)
		} else {
			let (left, right) = self.split(self.nodes[idx].left, key, equal_left);
			self.nodes[idx].left = right;
			self.update(idx);
			(left, Some(idx))
		}
	}

	/// Joins two trees where every key of `a` orders before every key of `b`.
	fn merge(&mut self, a: Link, b: Link) -> Link {
		match (a, b) {
			(None, other) | (other, None) => other,
			(Some(x), Some(y)) => {
				if self.nodes[x].priority > self.nodes[y].priority {
					let right = self.merge(self.nodes[x].right, Some(y));
					self.nodes[x].right = right;
					self.update(x);
					Some(x)
				} else {
					let left = self.merge(Some(x), self.nodes[y].left);
					self.nodes[y].left = left;
					self.update(y);
					Some(y)
				}
			}
		}
	}

	/// splitmix64 over an internal counter.
	fn next_priority(&mut self) -> u64 {
		self.seed = self.seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
		let mut z = self.seed;
		z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
		z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
		z ^ (z >> 31)
	}
}

impl<K: fmt::Debug, V: fmt::Debug, C: Compare<K>> fmt::Debug for RankedTree<K, V, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.iter()).finish()
	}
}

/// In-order iterator over a [`RankedTree`].
pub struct Iter<'a, K, V, C> {
	tree: &'a RankedTree<K, V, C>,
	stack: Vec<usize>,
	remaining: usize,
}

impl<'a, K, V, C: Compare<K>> Iterator for Iter<'a, K, V, C> {
	type Item = (&'a K, &'a V);

	fn next(&mut self) -> Option<Self::Item> {
		let idx = self.stack.pop()?;
		let mut cur = self.tree.nodes[idx].right;
		while let Some(next) = cur {
			self.stack.push(next);
			cur = self.tree.nodes[next].left;
		}
		self.remaining = self.remaining.saturating_sub(1);
		Some(self.tree.entry(idx))
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.remaining, Some(self.remaining))
	}
}

impl<K, V, C: Compare<K>> ExactSizeIterator for Iter<'_, K, V, C> {}

impl<'a, K, V, C: Compare<K>> IntoIterator for &'a RankedTree<K, V, C> {
	type Item = (&'a K, &'a V);
	type IntoIter = Iter<'a, K, V, C>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

#[cfg(test)]
mod tests;
