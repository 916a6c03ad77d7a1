//! HTTP transport for the archive engine.
//!
//! [`HttpTransport`] turns engine requests into signed HTTPS calls and hands
//! back every response, whatever its status, for the engine to validate.

pub mod error;
pub mod http;

pub use error::{TransportError, TransportResult};
pub use http::{HttpTransport, endpoint_for_region};
