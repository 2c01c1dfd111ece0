//! LMDB storage backend for the Taler wallet.
//!
//! Implements [`taler_store::Database`] using the `heed` LMDB bindings. Each
//! logical store maps to one named LMDB database within a single environment.

pub mod environment;
pub mod error;
pub mod integrity;
pub mod txn;

pub use environment::{LmdbDatabase, DEFAULT_MAP_SIZE};
pub use error::LmdbError;
pub use integrity::{check_data_dir, check_integrity, IntegrityReport};
