use sheaf_primitives::{ElementId, KeyId};
use thiserror::Error;

/// Invalid grouping configuration.
#[derive(Debug, Error)]
pub enum OptionsError {
	#[error("invalid grouping options: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("sorted multi-maps need a key equivalence with a total order")]
	UnorderedKeys,
}

/// A broken structural invariant, reported by
/// [`GroupingManager::check_integrity`](crate::GroupingManager::check_integrity).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
	#[error("source element {0} is not grouped")]
	Ungrouped(ElementId),
	#[error("element {element} is grouped under {key_id} but its key is not equivalent")]
	WrongBucket { element: ElementId, key_id: KeyId },
	#[error("element {0} is grouped but no longer in the source")]
	Orphaned(ElementId),
	#[error("bucket {0} has no members")]
	EmptyBucket(KeyId),
	#[error("buckets {0} and {1} hold equivalent keys")]
	DuplicateKey(KeyId, KeyId),
	#[error("representative of {0} is not one of its members")]
	DeadRepresentative(KeyId),
	#[error("representative of {0} violates the configured policy")]
	PolicyViolation(KeyId),
	#[error("key order of {0} is inconsistent")]
	Misordered(KeyId),
	#[error("event for {key_id} does not fit the replica at key index {index}")]
	ReplayMismatch { key_id: KeyId, index: usize },
	#[error("counted {counted} values but the source holds {actual}")]
	ValueCount { counted: usize, actual: usize },
}
