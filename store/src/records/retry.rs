use serde::{Deserialize, Serialize};
use taler_types::ErrorDetail;

use crate::record::Record;
use crate::StoreName;

/// Backoff state of one task, keyed by its tag (`withdraw:<id>`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRetryRecord {
    pub tag: String,
    pub retry_counter: u32,
    /// Unix milliseconds.
    pub next_retry_ms: u64,
    pub last_error: Option<ErrorDetail>,
}

impl Record for OperationRetryRecord {
    const STORE: StoreName = StoreName::OperationRetries;

    fn key(&self) -> Vec<u8> {
        self.tag.as_bytes().to_vec()
    }
}
