#![warn(missing_docs)]

//! The chum synchronizer: bidirectional transfer of object closures between
//! two authenticated instances, gated by the access layer.
//!
//! Both sides run the same machinery over one duplex frame transport: an
//! exporter answers requests for records the peer may read, while an
//! importer walks the closure of its accessible roots breadth-first,
//! verifying that every fetched record hashes to the address it was
//! requested under. What was transferred (and what went wrong) is persisted
//! as a versioned `Chum` record when the session ends.
//!
//! The wire transport is abstract; [`StreamTransport`] adapts any duplex
//! byte stream with a length-prefixed frame codec, and an in-memory duplex
//! pair ships for tests.

mod error;
pub use error::*;

mod protocol;
pub use protocol::*;

mod transport;
pub use transport::*;

mod exporter;
pub use exporter::*;

mod importer;
pub use importer::*;

mod session;
pub use session::*;
