#![warn(missing_docs)]

//! Typed object storage on top of the hashed store: every committed record
//! flows through recipe validation and the canonical codec, versioned
//! identities get a version-map entry and a node in their version graph,
//! reference fields feed the reverse-map index, and each commit publishes
//! exactly one event.
//!
//! The version graph is a DAG of [`VersionNode`]s — a root `Edge`, linear
//! `Change`s and confluence `Merge`s — stored as ordinary content-addressed
//! objects. Computing the current version of an identity walks the map,
//! finds the heads, and (when replicas raced) writes a `Merge` node whose
//! payload is chosen by the [`CrdtResolver`] registered for the type.

mod error;
pub use error::*;

mod node;
pub use node::*;

mod reverse;
pub use reverse::*;

mod store;
pub use store::*;
