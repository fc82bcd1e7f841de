//! Request layer for the CipherBox client.
//!
//! Provides the HTTP transport, credential storage, the single-flight
//! credential refresh, and the request pipeline every API call goes through.

pub mod auth;
pub mod client;
pub mod error;
pub mod interceptor;
pub mod refresh;
pub mod types;
#[cfg(test)]
mod tests;

pub use error::{ApiError, FailureKind, TransportError};
pub use interceptor::{Failure, Invalidate, RequestPipeline};
