//! Single-flight credential refresh.
//!
//! Every request that needs fresh credentials joins the same shared future,
//! so at most one refresh call is in flight and every waiter observes the
//! same outcome. Once that future has settled, the next caller starts a new
//! cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use thiserror::Error;

use super::auth::KeychainError;
use super::error::TransportError;
use super::types::TokenPair;

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("refresh rejected (HTTP {0})")]
    Rejected(u16),
    #[error("refresh request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("credential store error: {0}")]
    Store(#[from] KeychainError),
}

/// Outcome shared by every waiter of one cycle.
pub type RefreshOutcome = Result<TokenPair, RefreshError>;

/// Handle to an in-flight (or just settled) refresh.
pub type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Coordinates refresh cycles so that at most one runs at a time.
#[derive(Default)]
pub struct RefreshCycle {
    current: Mutex<Option<SharedRefresh>>,
    started: AtomicU64,
}

impl RefreshCycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> MutexGuard<'_, Option<SharedRefresh>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` while a refresh is running.
    pub fn is_pending(&self) -> bool {
        self.current()
            .as_ref()
            .is_some_and(|cycle| cycle.peek().is_none())
    }

    /// Number of cycles started so far.
    pub fn cycles_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Join the running refresh, or start a new one with `start`.
    ///
    /// `start` is only called when no refresh is pending.
    pub fn join_or_start<F>(&self, start: F) -> SharedRefresh
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let mut current = self.current();
        if let Some(cycle) = current.as_ref() {
            if cycle.peek().is_none() {
                log::debug!("Joining in-flight credential refresh");
                return cycle.clone();
            }
        }

        let cycle = start().shared();
        *current = Some(cycle.clone());
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Starting credential refresh (cycle {})", n);
        cycle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn pair(n: u32) -> TokenPair {
        TokenPair {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
        }
    }

    fn slow_refresh(calls: Arc<AtomicU32>, outcome: RefreshOutcome) -> BoxFuture<'static, RefreshOutcome> {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            outcome
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_joiners_share_one_refresh() {
        let cycle = RefreshCycle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| cycle.join_or_start(|| slow_refresh(calls.clone(), Ok(pair(1)))))
            .collect();
        assert!(cycle.is_pending());

        let outcomes = futures_util::future::join_all(handles).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cycle.cycles_started(), 1);
        assert!(outcomes.iter().all(|o| o.as_ref().unwrap() == &pair(1)));
        assert!(!cycle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_by_all_waiters() {
        let cycle = RefreshCycle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let a = cycle.join_or_start(|| slow_refresh(calls.clone(), Err(RefreshError::Rejected(401))));
        let b = cycle.join_or_start(|| slow_refresh(calls.clone(), Ok(pair(9))));

        let (a, b) = tokio::join!(a, b);
        assert!(matches!(a, Err(RefreshError::Rejected(401))));
        assert!(matches!(b, Err(RefreshError::Rejected(401))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_cycle_after_settlement() {
        let cycle = RefreshCycle::new();
        let calls = Arc::new(AtomicU32::new(0));

        let first = cycle.join_or_start(|| slow_refresh(calls.clone(), Ok(pair(1)))).await;
        let second = cycle.join_or_start(|| slow_refresh(calls.clone(), Ok(pair(2)))).await;

        assert_eq!(first.unwrap(), pair(1));
        assert_eq!(second.unwrap(), pair(2));
        assert_eq!(cycle.cycles_started(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
