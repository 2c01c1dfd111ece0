//! HTTP layer of the wallet.
//!
//! Protocol code talks to exchanges and banks through the [`HttpClient`]
//! trait: plain GET and JSON POST, responses with status and body. The
//! production client uses reqwest; [`ThrottledHttpClient`] wraps any client
//! with the per-origin [`RequestThrottler`].

pub mod error;
pub mod http;
pub mod throttle;
pub mod wire;

pub use error::NetworkError;
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient, ThrottledHttpClient};
pub use throttle::{RequestThrottler, ThrottleStats};
