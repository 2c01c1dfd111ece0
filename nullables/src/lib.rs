//! Nullable infrastructure for deterministic testing.
//!
//! Every external dependency of the wallet (clock, storage, HTTP) sits behind
//! a trait. This crate provides test implementations that:
//! - return deterministic values
//! - can be controlled programmatically (advance time, inject faults)
//! - never touch the filesystem or the network
//!
//! [`FakeExchange`] goes one step further and plays a complete exchange plus
//! test bank in-process, with real signatures, so protocol flows run end to
//! end inside a unit test.

pub mod clock;
pub mod exchange;
pub mod http;
pub mod store;

pub use clock::NullClock;
pub use exchange::{DenomSpec, FakeExchange, FakeExchangeConfig};
pub use http::{NullHttpClient, RecordedRequest};
pub use store::{FaultPoint, MemoryDatabase};
