//! Grouping configuration.
//!
//! Options are plain data with serde support so they can live in a config
//! file:
//!
//! ```toml
//! representative = "first"
//! preserve_source_order = true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Which member of a key bucket stands for the key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativePolicy {
	/// Always the member earliest in source order. Inserting an element
	/// before the current representative hands off to it.
	First,
	/// Always the member latest in source order.
	Last,
	/// The first member stays representative until it is removed; its
	/// successor is the earliest remaining member.
	#[default]
	Sticky,
}

/// How a bucket's position among the keys is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyOrder {
	/// Fixed when the bucket is created.
	Creation,
	/// Follows the representative's position in the source.
	SourceOrder,
	/// Follows the key equivalence's total order.
	Sorted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingOptions {
	pub representative: RepresentativePolicy,
	/// Keep buckets in their representatives' source order. May produce
	/// extra remove/add pairs when a hand-off moves a bucket. Ignored for
	/// sorted keys.
	pub preserve_source_order: bool,
}

impl GroupingOptions {
	/// `true` selects [`RepresentativePolicy::First`], `false` the sticky
	/// policy.
	pub fn use_first(self, use_first: bool) -> Self {
		let representative = if use_first {
			RepresentativePolicy::First
		} else {
			RepresentativePolicy::Sticky
		};
		self.with_representative(representative)
	}

	pub fn with_representative(mut self, representative: RepresentativePolicy) -> Self {
		self.representative = representative;
		self
	}

	pub fn with_source_order(mut self, preserve: bool) -> Self {
		self.preserve_source_order = preserve;
		self
	}

	pub fn from_toml_str(source: &str) -> Result<Self, OptionsError> {
		Ok(toml::from_str(source)?)
	}

	pub fn key_order(&self, sorted_keys: bool) -> KeyOrder {
		if sorted_keys {
			KeyOrder::Sorted
		} else if self.preserve_source_order {
			KeyOrder::SourceOrder
		} else {
			KeyOrder::Creation
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_toml() {
		let opts = GroupingOptions::from_toml_str(
			"representative = \"last\"\npreserve_source_order = true\n",
		)
		.unwrap();
		assert_eq!(opts.representative, RepresentativePolicy::Last);
		assert_eq!(opts.key_order(false), KeyOrder::SourceOrder);
		assert_eq!(opts.key_order(true), KeyOrder::Sorted);
	}

	#[test]
	fn empty_toml_is_default() {
		assert_eq!(GroupingOptions::from_toml_str("").unwrap(), GroupingOptions::default());
	}

	#[test]
	fn unknown_fields_are_rejected() {
		assert!(matches!(
			GroupingOptions::from_toml_str("use_fist = true"),
			Err(OptionsError::Parse(_))
		));
	}

	#[test]
	fn use_first_switches_policy() {
		let opts = GroupingOptions::default().use_first(true);
		assert_eq!(opts.representative, RepresentativePolicy::First);
		assert_eq!(opts.use_first(false).representative, RepresentativePolicy::Sticky);
	}
}
