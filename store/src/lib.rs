//! Storage contract of the wallet.
//!
//! The wallet keeps all state in named logical stores accessed through
//! transactions that declare the stores they touch. Backends (LMDB, in-memory
//! for testing) implement [`Database`]; everything above this crate works with
//! typed [`Record`]s through the helpers in [`record`].

pub mod error;
pub mod migration;
pub mod name;
pub mod record;
pub mod records;
pub mod txn;

pub use error::StoreError;
pub use migration::{Migrator, CURRENT_SCHEMA_VERSION};
pub use name::StoreName;
pub use record::Record;
pub use txn::{prefix_upper_bound, run_read, run_write, Database, Entries, ReadTxn, WriteTxn};
