#![warn(missing_docs)]

//! The microdata codec: canonical textual form of typed records.
//!
//! Every record the substrate stores is a single line of microdata-flavored
//! markup; its SHA-256 is the record's content address. The codec is total
//! and deterministic — serializing the same object against the same recipes
//! always yields the same bytes, and `parse ∘ serialize` is the identity on
//! valid objects.
//!
//! Three conversions live here:
//!
//! - [`serialize`]: object → canonical text (validating against the recipe),
//! - [`parse`]: canonical text → object (strict; anything but the canonical
//!   grammar is rejected),
//! - [`to_json`]: canonical text → JSON, skipping the in-memory object for
//!   consumers that only want to look at a record.
//!
//! Identity projections ([`extract_id_object`]) never rebuild an object:
//! they splice the exact byte ranges of the identity fields out of the
//! canonical text.

mod error;
pub use error::*;

mod data;
pub use data::*;

mod text;
pub use text::*;

mod scanner;
pub(crate) use scanner::*;

mod emit;
pub use emit::*;

mod parse;
pub use parse::*;

mod json;
pub use json::*;

mod id;
pub use id::*;
