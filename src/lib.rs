//! Resilient request layer for the CipherBox client.
//!
//! - `connectivity`: network/server reachability, banners, retry queue
//! - `api`: transport, credentials, refresh coordination, request pipeline
//! - `cache`: time-bounded response cache
//!
//! Everything is wired together by [`state::AppContext`].

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod state;

pub use api::{ApiError, FailureKind, RequestPipeline};
pub use cache::ResponseCache;
pub use config::ClientConfig;
pub use connectivity::{ConnectionStatus, ConnectivityMonitor, ConnectivityState};
pub use state::AppContext;
