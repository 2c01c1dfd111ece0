//! LMDB environment setup.

use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::info;

use taler_store::{Migrator, ReadTxn, StoreError, StoreName, WriteTxn};

use crate::integrity::{check_data_dir, check_integrity};
use crate::txn::{LmdbReadTxn, LmdbWriteTxn, Scope};
use crate::LmdbError;

/// Default memory map size (1 GiB).
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// The wallet database: one LMDB environment, one named database per store.
pub struct LmdbDatabase {
    env: Env,
    dbs: Vec<Database<Bytes, Bytes>>,
    path: PathBuf,
}

impl LmdbDatabase {
    /// Open or create the database at `path`, check it and run migrations.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, StoreError> {
        check_data_dir(path).map_err(LmdbError::DataDir)?;
        std::fs::create_dir_all(path).map_err(LmdbError::from)?;

        let mut options = EnvOpenOptions::new();
        options
            .map_size(map_size)
            .max_dbs(StoreName::ALL.len() as u32);
        // SAFETY: the environment is only opened once per path in this
        // process and the files are not modified by anything else.
        let env = unsafe { options.open(path) }.map_err(LmdbError::from)?;

        let mut wtxn = env.write_txn().map_err(LmdbError::from)?;
        let mut dbs = Vec::with_capacity(StoreName::ALL.len());
        for store in StoreName::ALL {
            let db = env
                .create_database::<Bytes, Bytes>(&mut wtxn, Some(store.as_str()))
                .map_err(LmdbError::from)?;
            dbs.push(db);
        }
        wtxn.commit().map_err(LmdbError::from)?;

        let report = check_integrity(&env)?;
        if !report.is_healthy() {
            return Err(StoreError::Corruption(report.errors.join("; ")));
        }
        info!(
            path = %path.display(),
            entries = report.total_entries,
            "opened wallet database"
        );

        let db = Self {
            env,
            dbs,
            path: path.to_path_buf(),
        };
        Migrator::run(&db)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn env(&self) -> &Env {
        &self.env
    }
}

impl taler_store::Database for LmdbDatabase {
    fn begin_read(&self, stores: &[StoreName]) -> Result<Box<dyn ReadTxn + '_>, StoreError> {
        let txn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(Box::new(LmdbReadTxn {
            txn,
            dbs: &self.dbs,
            scope: Scope::new(stores),
        }))
    }

    fn begin_write(&self, stores: &[StoreName]) -> Result<Box<dyn WriteTxn + '_>, StoreError> {
        let txn = self.env.write_txn().map_err(LmdbError::from)?;
        Ok(Box::new(LmdbWriteTxn {
            txn,
            dbs: &self.dbs,
            scope: Scope::new(stores),
        }))
    }
}
