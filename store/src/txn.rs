//! Transactions over named stores.
//!
//! A transaction is opened for a fixed set of stores. Touching any other store
//! fails with [`StoreError::NotInScope`]. A write transaction becomes visible
//! only when committed; dropping it uncommitted rolls everything back.

use crate::{StoreError, StoreName};

/// Raw key/value pairs returned by a prefix scan, in key order.
pub type Entries = Vec<(Vec<u8>, Vec<u8>)>;

pub trait ReadTxn {
    fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries of `store` whose key starts with `prefix`.
    fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError>;
}

pub trait WriteTxn: ReadTxn {
    fn put(&mut self, store: StoreName, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, store: StoreName, key: &[u8]) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A transactional database of named stores.
///
/// Writes to overlapping store sets are mutually exclusive; disjoint sets may
/// proceed concurrently if the backend supports it.
pub trait Database: Send + Sync {
    fn begin_read(&self, stores: &[StoreName]) -> Result<Box<dyn ReadTxn + '_>, StoreError>;

    fn begin_write(&self, stores: &[StoreName]) -> Result<Box<dyn WriteTxn + '_>, StoreError>;
}

/// Run `f` inside a read transaction.
pub fn run_read<T, E, F>(db: &dyn Database, stores: &[StoreName], f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&dyn ReadTxn) -> Result<T, E>,
{
    let tx = db.begin_read(stores)?;
    f(tx.as_ref())
}

/// Run `f` inside a write transaction, committing if it returns `Ok` and
/// rolling back otherwise.
pub fn run_write<T, E, F>(db: &dyn Database, stores: &[StoreName], f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut dyn WriteTxn) -> Result<T, E>,
{
    let mut tx = db.begin_write(stores)?;
    let out = f(tx.as_mut())?;
    tx.commit()?;
    Ok(out)
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` if there is none (all bytes 0xFF).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
    }

    #[test]
    fn upper_bound_carries_over_ff() {
        assert_eq!(prefix_upper_bound(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(&[]), None);
    }
}
