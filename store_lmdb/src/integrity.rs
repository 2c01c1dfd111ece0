//! LMDB database integrity checks.
//!
//! Run on open to detect corruption early, before the wallet starts
//! processing pending operations.

use std::path::Path;

use heed::types::Bytes;
use heed::Env;
use taler_store::StoreName;

use crate::LmdbError;

/// Summary of an integrity check run.
#[derive(Debug)]
pub struct IntegrityReport {
    pub databases_checked: u32,
    pub total_entries: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    /// Returns `true` if no errors were detected.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Open every store's database and count its entries.
///
/// Missing or unreadable databases are recorded in the report rather than
/// causing a hard error.
pub fn check_integrity(env: &Env) -> Result<IntegrityReport, LmdbError> {
    let mut report = IntegrityReport {
        databases_checked: 0,
        total_entries: 0,
        errors: Vec::new(),
    };

    let rtxn = env.read_txn()?;

    for store in StoreName::ALL {
        match env.open_database::<Bytes, Bytes>(&rtxn, Some(store.as_str())) {
            Ok(Some(db)) => {
                report.databases_checked += 1;
                match db.len(&rtxn) {
                    Ok(count) => report.total_entries += count,
                    Err(e) => report
                        .errors
                        .push(format!("failed to read database '{}': {}", store, e)),
                }
            }
            Ok(None) => report.errors.push(format!("database '{}' is missing", store)),
            Err(e) => report
                .errors
                .push(format!("failed to open database '{}': {}", store, e)),
        }
    }

    Ok(report)
}

/// Check if the data directory looks valid before opening.
///
/// A missing or empty directory is a fresh start. A non-empty directory
/// without `data.mdb` suggests corruption or misconfiguration.
pub fn check_data_dir(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    if path.join("data.mdb").exists() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if entries.next().is_none() {
        return Ok(());
    }
    Err(format!(
        "directory {} is not empty but data.mdb is missing",
        path.display()
    ))
}
