//! Persisted error details.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A serializable description of a failure, stored on the record of the
/// operation it belongs to and returned to API callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable machine-readable error kind, e.g. `"DoubleSpendDetected"`.
    pub kind: String,
    /// Human-readable message.
    pub hint: String,
    /// HTTP status of the exchange response that caused the failure, if any.
    pub http_status: Option<u16>,
    /// Additional context (usually the exchange's response body).
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            hint: hint.into(),
            http_status: None,
            details: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.hint)?;
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {status})")?;
        }
        Ok(())
    }
}
