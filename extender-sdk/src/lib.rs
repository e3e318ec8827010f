//! Wire types and HTTP client for the explorer node API.
//!
//! The node speaks JSON over HTTP. Every response is wrapped in an envelope
//! carrying either a `result` or an `error`; see [`objects::NodeResponse`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod address;
#[cfg(feature = "client")]
pub mod client;
pub mod objects;
