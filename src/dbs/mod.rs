//! The database: collections, transactions, savepoints and the facade.

pub mod collection;
pub mod ds;
pub mod options;
pub mod savepoint;
pub mod session;
pub mod tx;

pub use collection::{Collection, UpdateOutcome};
pub use ds::Datastore;
pub use options::{CollectionConfig, IsolationLevel, TransactionOptions, UpdateOptions};
pub use savepoint::{SavepointId, SavepointInfo};
pub use session::Session;
pub use tx::{ChangeOperation, ChangeRecord, Transaction, TxStatus};
