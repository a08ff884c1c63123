//! The declarative query engine.
//!
//! A query is a JSON object mapping field paths to literals (equality) or
//! operator objects, with `$and` / `$or` at the top level. Updates are
//! either a plain replacement document or an operator document.

pub mod filter;
pub mod plan;
pub mod update;

pub use filter::Filter;
pub use plan::Plan;
