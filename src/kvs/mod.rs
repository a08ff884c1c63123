//! Storage adapters for collection payloads.

pub mod api;
pub mod file;
pub mod mem;

pub use api::{Adapter, AdapterKind};
