//! Error taxonomy.
//!
//! Three kinds of failure exist:
//!
//! - [`Rejection`]: the structure disallows the change (read-only view,
//!   filtered value, element from another group). Expected; computed by
//!   pre-flight checks such as `can_add`, and returned inside
//!   [`CollectError::Rejected`] when the change is attempted anyway.
//! - Usage errors: stale identities and out-of-bounds indices. These signal a
//!   bug in the caller; see [`CollectError::is_usage_error`].
//! - [`LockError`]: returned only by the `try_` lock variants.
//!
//! A failing mutation never leaves a partial change or a partial event set.

use thiserror::Error;

use crate::ids::ElementId;

/// Why a structure refuses a change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
	#[error("operation is not supported")]
	Unsupported,
	#[error("element is not acceptable here")]
	IllegalElement,
	#[error("filtered out: {0}")]
	Filtered(String),
	#[error("element belongs to a different group")]
	WrongGroup,
	#[error("no such element")]
	NotFound,
	#[error("collection is read-only")]
	ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
	#[error("rejected: {0}")]
	Rejected(#[from] Rejection),
	#[error("element {0} is no longer present")]
	StaleElement(ElementId),
	#[error("index {index} out of bounds for length {len}")]
	IndexOutOfBounds { index: usize, len: usize },
}

impl CollectError {
	/// Whether this error indicates a programming mistake rather than a
	/// policy decision.
	pub fn is_usage_error(&self) -> bool {
		!matches!(self, CollectError::Rejected(_))
	}

	pub fn rejection(&self) -> Option<&Rejection> {
		match self {
			CollectError::Rejected(r) => Some(r),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
	#[error("lock is held by another transaction")]
	Contended,
	#[error("write attempted while dispatching listeners")]
	Reentrant,
}
