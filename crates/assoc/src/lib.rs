//! Incrementally maintained group-by over live entry streams.
//!
//! A [`GroupingManager`] keeps one bucket per distinct key of an
//! [`EntryStream`](sheaf_collect::EntryStream) and translates every source
//! change into key-level and value-level [`MultiMapEvent`]s. The façades
//! built on it never rescan the source:
//!
//! - [`MultiMap`]: keys with their members in source order, writable through
//!   the source.
//! - [`CollapsedMap`]: each key mapped to its first or last member.
//! - [`SortedMultiMap`] and [`SortedCollapsedMap`]: the same over totally
//!   ordered keys, with navigation and live range views.

/// Key to single value view of a grouping.
pub mod collapsed;
/// Error types.
pub mod error;
/// Structured change records and the replay model.
pub mod event;
/// Live group-by over an entry stream.
pub mod grouping;
/// Multi-map façade.
pub mod multimap;
/// Grouping configuration.
pub mod options;
/// Multi-maps over ordered keys.
pub mod sorted;
mod unique;

#[cfg(any(test, doc))]
pub(crate) mod invariants;

pub use collapsed::{CollapsedMap, MapListener};
pub use error::{IntegrityViolation, OptionsError};
pub use event::{EventLevel, EventReplica, Group, MapEvent, MultiMapEvent, ValueChange};
pub use grouping::{BatchListener, CommitListener, GroupingListener, GroupingManager, GroupingView};
pub use multimap::{EntryState, KeySet, MemberCollection, MultiEntry, MultiMap};
pub use options::{GroupingOptions, KeyOrder, RepresentativePolicy};
pub use sorted::{SortedCollapsedMap, SortedCollapsedRange, SortedMultiMap, SortedRange};
