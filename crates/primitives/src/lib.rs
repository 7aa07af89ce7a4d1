//! Shared building blocks for live, incrementally maintained collections.
//!
//! Everything here is independent of grouping semantics: identities that name
//! positions in a sequence, an order-statistic tree, equivalence relations,
//! causality chains, the transaction lock shared by a derivation chain, and
//! copy-on-write listener lists.

/// Causality chains attached to every emitted event.
pub mod cause;
/// Kinds of structural change.
pub mod change;
/// Pluggable equality and ordering relations.
pub mod equivalence;
/// Rejections and usage errors.
pub mod error;
/// Element and key identities.
pub mod ids;
/// Copy-on-write listener registration.
pub mod listeners;
/// Chain-wide read/write transactions.
pub mod lock;
/// Arena-backed order-statistic tree.
pub mod tree;

pub use cause::Cause;
pub use change::ChangeKind;
pub use equivalence::{Comparator, Equality, Equivalence, NaturalOrder};
pub use error::{CollectError, LockError, Rejection};
pub use ids::{ElementId, KeyId, OrderKey};
pub use listeners::{ListenerList, ListenerSnapshot, Subscription};
pub use lock::{DispatchScope, ReadTransaction, Transaction, TransactionLock};
pub use tree::{Compare, FnCompare, Natural, RankedTree};
