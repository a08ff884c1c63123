#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod dbs;
pub mod doc;
pub mod err;
pub mod iam;
pub mod idx;
pub mod kvs;
pub mod qry;
pub mod val;

/// Channels for receiving database change and audit notifications
pub mod channel {
	pub use async_channel::bounded;
	pub use async_channel::unbounded;
	pub use async_channel::Receiver;
	pub use async_channel::Sender;
}
