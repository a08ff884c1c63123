//! Documents, the primary document store, and collection schemas.

pub mod document;
pub mod list;
pub mod schema;

pub use document::{Document, Id};
pub use list::DocumentList;
pub use schema::{DefaultValue, FieldKind, FieldSpec, Schema};
