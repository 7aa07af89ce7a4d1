//! Live, identity-addressed key/value sequences.
//!
//! [`EntryStream`] is the source that grouping structures derive from: an
//! ordered list of entries, each named by an [`ElementId`], whose writes are
//! delivered synchronously to subscribers as [`SourceEvent`]s.
//!
//! [`ElementId`]: sheaf_primitives::ElementId

/// The entry stream and its transactions.
pub mod stream;

pub use stream::{
	Data, Entry, EntryFilter, EntryStream, Position, SourceChange, SourceEvent, StreamBuilder,
	StreamListener, StreamTransaction,
};
