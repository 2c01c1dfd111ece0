//! Scoped LMDB transactions.
//!
//! LMDB itself serializes all write transactions of an environment, which is
//! stricter than the per-store exclusion the contract asks for.

use heed::types::Bytes;
use heed::{Database, RoTxn, RwTxn};

use taler_store::{Entries, ReadTxn, StoreError, StoreName, WriteTxn};

use crate::LmdbError;

/// The stores a transaction was opened for.
pub(crate) struct Scope([bool; StoreName::ALL.len()]);

impl Scope {
    pub(crate) fn new(stores: &[StoreName]) -> Self {
        let mut allowed = [false; StoreName::ALL.len()];
        for s in stores {
            allowed[s.index()] = true;
        }
        Scope(allowed)
    }

    fn check(&self, store: StoreName) -> Result<(), StoreError> {
        if self.0[store.index()] {
            Ok(())
        } else {
            Err(StoreError::NotInScope(store))
        }
    }
}

fn get(
    txn: &RoTxn,
    db: &Database<Bytes, Bytes>,
    key: &[u8],
) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(db
        .get(txn, key)
        .map_err(LmdbError::from)?
        .map(|v| v.to_vec()))
}

fn scan(txn: &RoTxn, db: &Database<Bytes, Bytes>, prefix: &[u8]) -> Result<Entries, StoreError> {
    let iter = db.prefix_iter(txn, prefix).map_err(LmdbError::from)?;
    let mut out = Vec::new();
    for item in iter {
        let (k, v) = item.map_err(LmdbError::from)?;
        out.push((k.to_vec(), v.to_vec()));
    }
    Ok(out)
}

pub struct LmdbReadTxn<'e> {
    pub(crate) txn: RoTxn<'e>,
    pub(crate) dbs: &'e [Database<Bytes, Bytes>],
    pub(crate) scope: Scope,
}

impl ReadTxn for LmdbReadTxn<'_> {
    fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.scope.check(store)?;
        get(&self.txn, &self.dbs[store.index()], key)
    }

    fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError> {
        self.scope.check(store)?;
        scan(&self.txn, &self.dbs[store.index()], prefix)
    }
}

/// A write transaction; dropping it without `commit` aborts it.
pub struct LmdbWriteTxn<'e> {
    pub(crate) txn: RwTxn<'e>,
    pub(crate) dbs: &'e [Database<Bytes, Bytes>],
    pub(crate) scope: Scope,
}

impl ReadTxn for LmdbWriteTxn<'_> {
    fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.scope.check(store)?;
        get(&self.txn, &self.dbs[store.index()], key)
    }

    fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError> {
        self.scope.check(store)?;
        scan(&self.txn, &self.dbs[store.index()], prefix)
    }
}

impl WriteTxn for LmdbWriteTxn<'_> {
    fn put(&mut self, store: StoreName, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.scope.check(store)?;
        self.dbs[store.index()]
            .put(&mut self.txn, key, value)
            .map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&mut self, store: StoreName, key: &[u8]) -> Result<(), StoreError> {
        self.scope.check(store)?;
        self.dbs[store.index()]
            .delete(&mut self.txn, key)
            .map_err(LmdbError::from)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}
