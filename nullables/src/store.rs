//! Nullable store: an in-memory [`Database`] with fault injection.
//!
//! Each named store is a `BTreeMap` behind its own `RwLock`. Transactions
//! take the locks of their declared stores in canonical [`StoreName`] order,
//! so overlapping write sets exclude each other and disjoint ones run in
//! parallel. Writes are staged and applied on commit; a dropped transaction
//! leaves nothing behind.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use taler_store::{Database, Entries, ReadTxn, StoreError, StoreName, WriteTxn};
use tracing::warn;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Where an injected fault strikes a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// The commit fails and nothing is applied.
    BeforeCommit,
    /// Everything is applied, then the commit reports failure, as if the
    /// process died right after the data reached disk.
    AfterCommit,
}

#[derive(Clone, Copy, Debug)]
struct Fault {
    store: Option<StoreName>,
    point: FaultPoint,
}

pub struct MemoryDatabase {
    tables: Vec<RwLock<Table>>,
    fault: Mutex<Option<Fault>>,
    commits: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            tables: StoreName::ALL.iter().map(|_| RwLock::new(Table::new())).collect(),
            fault: Mutex::new(None),
            commits: AtomicU64::new(0),
        }
    }

    /// Make the next commit fail at `point`.
    pub fn inject_fault(&self, point: FaultPoint) {
        self.arm(Fault { store: None, point });
    }

    /// Make the next commit of a transaction that includes `store` fail at `point`.
    pub fn inject_fault_on(&self, store: StoreName, point: FaultPoint) {
        self.arm(Fault {
            store: Some(store),
            point,
        });
    }

    pub fn clear_fault(&self) {
        *self.fault.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Number of successfully applied commits (including `AfterCommit` faults).
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of raw entries (records and index entries) in a store.
    pub fn raw_len(&self, store: StoreName) -> usize {
        self.tables[store.index()]
            .read()
            .map(|t| t.len())
            .unwrap_or(0)
    }

    fn arm(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(|p| p.into_inner()) = Some(fault);
    }

    /// Take the armed fault if it applies to a transaction over `scope`.
    fn take_fault(&self, scope: &[StoreName]) -> Option<FaultPoint> {
        let mut slot = self.fault.lock().unwrap_or_else(|p| p.into_inner());
        let fault = (*slot)?;
        let applies = match fault.store {
            None => true,
            Some(store) => scope.contains(&store),
        };
        if applies {
            *slot = None;
            Some(fault.point)
        } else {
            None
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_scope(stores: &[StoreName]) -> Vec<StoreName> {
    let mut scope = stores.to_vec();
    scope.sort();
    scope.dedup();
    scope
}

fn poisoned(store: StoreName) -> StoreError {
    StoreError::Backend(format!("lock on store {store} poisoned"))
}

fn scan(table: &Table, prefix: &[u8]) -> Table {
    table
        .range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl Database for MemoryDatabase {
    fn begin_read(&self, stores: &[StoreName]) -> Result<Box<dyn ReadTxn + '_>, StoreError> {
        let mut guards = Vec::with_capacity(stores.len());
        for store in canonical_scope(stores) {
            let guard = self.tables[store.index()]
                .read()
                .map_err(|_| poisoned(store))?;
            guards.push((store, guard));
        }
        Ok(Box::new(MemoryReadTxn { guards }))
    }

    fn begin_write(&self, stores: &[StoreName]) -> Result<Box<dyn WriteTxn + '_>, StoreError> {
        let mut guards = Vec::with_capacity(stores.len());
        for store in canonical_scope(stores) {
            let guard = self.tables[store.index()]
                .write()
                .map_err(|_| poisoned(store))?;
            guards.push((store, guard));
        }
        Ok(Box::new(MemoryWriteTxn {
            db: self,
            guards,
            staged: BTreeMap::new(),
        }))
    }
}

struct MemoryReadTxn<'a> {
    guards: Vec<(StoreName, RwLockReadGuard<'a, Table>)>,
}

impl MemoryReadTxn<'_> {
    fn table(&self, store: StoreName) -> Result<&Table, StoreError> {
        self.guards
            .iter()
            .find(|(s, _)| *s == store)
            .map(|(_, g)| &**g)
            .ok_or(StoreError::NotInScope(store))
    }
}

impl ReadTxn for MemoryReadTxn<'_> {
    fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.table(store)?.get(key).cloned())
    }

    fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError> {
        Ok(scan(self.table(store)?, prefix).into_iter().collect())
    }
}

struct MemoryWriteTxn<'a> {
    db: &'a MemoryDatabase,
    guards: Vec<(StoreName, RwLockWriteGuard<'a, Table>)>,
    /// `None` marks a deletion.
    staged: BTreeMap<(StoreName, Vec<u8>), Option<Vec<u8>>>,
}

impl MemoryWriteTxn<'_> {
    fn table(&self, store: StoreName) -> Result<&Table, StoreError> {
        self.guards
            .iter()
            .find(|(s, _)| *s == store)
            .map(|(_, g)| &**g)
            .ok_or(StoreError::NotInScope(store))
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, store: StoreName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let table = self.table(store)?;
        match self.staged.get(&(store, key.to_vec())) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(table.get(key).cloned()),
        }
    }

    fn scan_prefix(&self, store: StoreName, prefix: &[u8]) -> Result<Entries, StoreError> {
        let mut merged = scan(self.table(store)?, prefix);
        let staged = self
            .staged
            .range((store, prefix.to_vec())..)
            .take_while(|((s, k), _)| *s == store && k.starts_with(prefix));
        for ((_, key), value) in staged {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn put(&mut self, store: StoreName, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.table(store)?;
        self.staged
            .insert((store, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, store: StoreName, key: &[u8]) -> Result<(), StoreError> {
        self.table(store)?;
        self.staged.insert((store, key.to_vec()), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryWriteTxn {
            db,
            mut guards,
            staged,
        } = *self;
        let scope: Vec<StoreName> = guards.iter().map(|(s, _)| *s).collect();
        let fault = db.take_fault(&scope);

        if fault == Some(FaultPoint::BeforeCommit) {
            warn!(?scope, "injected fault before commit");
            return Err(StoreError::Backend("injected fault before commit".into()));
        }

        for ((store, key), value) in staged {
            let table = guards
                .iter_mut()
                .find(|(s, _)| *s == store)
                .map(|(_, g)| &mut **g)
                .ok_or(StoreError::NotInScope(store))?;
            match value {
                Some(v) => {
                    table.insert(key, v);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
        db.commits.fetch_add(1, Ordering::SeqCst);

        if fault == Some(FaultPoint::AfterCommit) {
            warn!(?scope, "injected fault after commit");
            return Err(StoreError::Backend("injected fault after commit".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use taler_store::{run_read, run_write, Migrator, CURRENT_SCHEMA_VERSION};

    fn put_raw(db: &MemoryDatabase, store: StoreName, key: &[u8], value: &[u8]) {
        run_write::<_, StoreError, _>(db, &[store], |tx| tx.put(store, key, value)).unwrap();
    }

    fn get_raw(db: &MemoryDatabase, store: StoreName, key: &[u8]) -> Option<Vec<u8>> {
        run_read::<_, StoreError, _>(db, &[store], |tx| tx.get(store, key)).unwrap()
    }

    #[test]
    fn committed_writes_are_visible() {
        let db = MemoryDatabase::new();
        put_raw(&db, StoreName::Coins, b"a", b"1");
        assert_eq!(get_raw(&db, StoreName::Coins, b"a"), Some(b"1".to_vec()));
        assert_eq!(db.commit_count(), 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let db = MemoryDatabase::new();
        {
            let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
            tx.put(StoreName::Coins, b"a", b"1").unwrap();
            assert_eq!(tx.get(StoreName::Coins, b"a").unwrap(), Some(b"1".to_vec()));
        }
        assert_eq!(get_raw(&db, StoreName::Coins, b"a"), None);
    }

    #[test]
    fn error_in_closure_rolls_back() {
        let db = MemoryDatabase::new();
        let res: Result<(), StoreError> = run_write(&db, &[StoreName::Coins], |tx| {
            tx.put(StoreName::Coins, b"a", b"1")?;
            Err(StoreError::NotFound("boom".into()))
        });
        assert!(res.is_err());
        assert_eq!(db.raw_len(StoreName::Coins), 0);
    }

    #[test]
    fn out_of_scope_access_is_rejected() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
        assert!(matches!(
            tx.put(StoreName::Reserves, b"a", b"1"),
            Err(StoreError::NotInScope(StoreName::Reserves))
        ));
        let rtx = db.begin_read(&[StoreName::Coins]).unwrap();
        drop(tx);
        assert!(matches!(
            rtx.get(StoreName::Meta, b"x"),
            Err(StoreError::NotInScope(StoreName::Meta))
        ));
    }

    #[test]
    fn scan_merges_staged_writes_and_deletes() {
        let db = MemoryDatabase::new();
        put_raw(&db, StoreName::Coins, b"p1", b"old");
        put_raw(&db, StoreName::Coins, b"p2", b"gone");
        put_raw(&db, StoreName::Coins, b"q1", b"other");

        let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
        tx.delete(StoreName::Coins, b"p2").unwrap();
        tx.put(StoreName::Coins, b"p0", b"new").unwrap();
        tx.put(StoreName::Coins, b"p1", b"upd").unwrap();
        let entries = tx.scan_prefix(StoreName::Coins, b"p").unwrap();
        assert_eq!(
            entries,
            vec![
                (b"p0".to_vec(), b"new".to_vec()),
                (b"p1".to_vec(), b"upd".to_vec()),
            ]
        );
    }

    #[test]
    fn fault_before_commit_applies_nothing() {
        let db = MemoryDatabase::new();
        db.inject_fault(FaultPoint::BeforeCommit);
        let res: Result<(), StoreError> =
            run_write(&db, &[StoreName::Coins], |tx| tx.put(StoreName::Coins, b"a", b"1"));
        assert!(matches!(res, Err(StoreError::Backend(_))));
        assert_eq!(get_raw(&db, StoreName::Coins, b"a"), None);

        // One-shot.
        put_raw(&db, StoreName::Coins, b"a", b"1");
        assert!(get_raw(&db, StoreName::Coins, b"a").is_some());
    }

    #[test]
    fn fault_after_commit_keeps_data() {
        let db = MemoryDatabase::new();
        db.inject_fault(FaultPoint::AfterCommit);
        let res: Result<(), StoreError> =
            run_write(&db, &[StoreName::Coins], |tx| tx.put(StoreName::Coins, b"a", b"1"));
        assert!(res.is_err());
        assert_eq!(get_raw(&db, StoreName::Coins, b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn targeted_fault_waits_for_matching_scope() {
        let db = MemoryDatabase::new();
        db.inject_fault_on(StoreName::DepositGroups, FaultPoint::BeforeCommit);
        put_raw(&db, StoreName::Coins, b"a", b"1");
        let res: Result<(), StoreError> = run_write(
            &db,
            &[StoreName::Coins, StoreName::DepositGroups],
            |tx| tx.put(StoreName::Coins, b"b", b"2"),
        );
        assert!(res.is_err());
        assert_eq!(get_raw(&db, StoreName::Coins, b"a"), Some(b"1".to_vec()));
        assert_eq!(get_raw(&db, StoreName::Coins, b"b"), None);
    }

    #[test]
    fn disjoint_write_sets_proceed_concurrently() {
        let db = MemoryDatabase::new();
        let both_open = Barrier::new(2);
        let release = Barrier::new(2);
        std::thread::scope(|s| {
            s.spawn(|| {
                let mut tx = db.begin_write(&[StoreName::Coins]).unwrap();
                tx.put(StoreName::Coins, b"a", b"1").unwrap();
                both_open.wait();
                release.wait();
                tx.commit().unwrap();
            });
            s.spawn(|| {
                both_open.wait();
                let mut tx = db.begin_write(&[StoreName::Reserves]).unwrap();
                tx.put(StoreName::Reserves, b"r", b"1").unwrap();
                tx.commit().unwrap();
                release.wait();
            });
        });
        assert_eq!(db.commit_count(), 2);
    }

    #[test]
    fn migrator_sets_schema_version() {
        let db = MemoryDatabase::new();
        assert_eq!(Migrator::run(&db).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(Migrator::run(&db).unwrap(), CURRENT_SCHEMA_VERSION);
    }
}
