#![warn(missing_docs)]

//! The channel subsystem: per-`(id, owner)` append-only chains of
//! timestamped entries, merged across replicas by a deterministic CRDT.
//!
//! A channel's value is a singly-linked list of immutable
//! `LinkedListEntry` records, each wrapping a `CreationTime` record, hanging
//! off the `head` field of a versioned `ChannelInfo`. Traversing from head
//! through `previous` always yields strictly descending
//! `(creationTime, creationTimeHash)` keys; inserting into the middle
//! rebuilds the prefix above the insertion point, because every entry's hash
//! covers its whole ancestry.
//!
//! Concurrent `ChannelInfo` versions are reconciled by interleaving every
//! distinct entry once, ordered by that same key — the merge depends only on
//! the multiset of chains, never on traversal order, which is what makes
//! replicas converge to byte-identical heads.

mod error;
pub use error::*;

mod records;
pub use records::*;

mod iterator;
pub use iterator::*;

mod resolver;
pub use resolver::*;

mod manager;
pub use manager::*;
