//! Schema-versioned migrations.
//!
//! The schema version lives in the `meta` store. [`Migrator::run`] is called
//! once when a database is opened and brings it up to
//! [`CURRENT_SCHEMA_VERSION`] inside a single write transaction.

use tracing::info;

use crate::txn::{run_write, Database, ReadTxn, WriteTxn};
use crate::{StoreError, StoreName};

/// The schema version that the current code expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub struct Migrator;

impl Migrator {
    /// Check the stored schema version and run any needed migrations.
    ///
    /// Version 0 means a fresh database. A stored version higher than
    /// [`CURRENT_SCHEMA_VERSION`] was written by newer code and is refused.
    pub fn run(db: &dyn Database) -> Result<u32, StoreError> {
        run_write(db, &StoreName::ALL, |tx| {
            let current = schema_version(&*tx)?;

            if current == CURRENT_SCHEMA_VERSION {
                info!(version = current, "database schema is up to date");
                return Ok(current);
            }

            if current > CURRENT_SCHEMA_VERSION {
                return Err(StoreError::Migration(format!(
                    "database schema version {} is newer than supported version {}",
                    current, CURRENT_SCHEMA_VERSION
                )));
            }

            for version in current..CURRENT_SCHEMA_VERSION {
                info!(from = version, to = version + 1, "running migration");
                run_migration(&mut *tx, version, version + 1)?;
            }
            set_schema_version(&mut *tx, CURRENT_SCHEMA_VERSION)?;

            info!(version = CURRENT_SCHEMA_VERSION, "migration complete");
            Ok(CURRENT_SCHEMA_VERSION)
        })
    }
}

/// Stored schema version, 0 if none.
pub fn schema_version<T: ReadTxn + ?Sized>(tx: &T) -> Result<u32, StoreError> {
    match tx.get(StoreName::Meta, SCHEMA_VERSION_KEY)? {
        None => Ok(0),
        Some(bytes) => {
            let arr = <[u8; 4]>::try_from(bytes.as_slice()).map_err(|_| {
                StoreError::Corruption(format!(
                    "schema version has {} bytes, expected 4",
                    bytes.len()
                ))
            })?;
            Ok(u32::from_le_bytes(arr))
        }
    }
}

pub fn set_schema_version<T: WriteTxn + ?Sized>(tx: &mut T, version: u32) -> Result<(), StoreError> {
    tx.put(StoreName::Meta, SCHEMA_VERSION_KEY, &version.to_le_bytes())
}

fn run_migration<T: WriteTxn + ?Sized>(_tx: &mut T, from: u32, to: u32) -> Result<(), StoreError> {
    match (from, to) {
        // Initial schema: every store starts empty.
        (0, 1) => Ok(()),
        _ => Err(StoreError::Migration(format!(
            "unknown migration: {} -> {}",
            from, to
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTxn;

    impl ReadTxn for NoopTxn {
        fn get(&self, _: StoreName, _: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn scan_prefix(&self, _: StoreName, _: &[u8]) -> Result<crate::Entries, StoreError> {
            Ok(Vec::new())
        }
    }

    impl WriteTxn for NoopTxn {
        fn put(&mut self, _: StoreName, _: &[u8], _: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }

        fn delete(&mut self, _: StoreName, _: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn unknown_migration_is_error() {
        assert!(run_migration(&mut NoopTxn, 99, 100).is_err());
    }

    #[test]
    fn initial_migration_succeeds() {
        assert!(run_migration(&mut NoopTxn, 0, 1).is_ok());
    }

    #[test]
    fn missing_version_reads_as_zero() {
        assert_eq!(schema_version(&NoopTxn).unwrap(), 0);
    }
}
