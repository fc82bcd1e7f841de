//! Connectivity monitor for the CipherBox client.
//!
//! Tracks local network reachability and server reachability, notifies
//! subscribers on every change, drives the connectivity banners, and owns the
//! retry queue, which is drained whenever the server becomes reachable again.
//!
//! Probing is on demand: after a network-up event, when the pipeline sees a
//! response-less failure, from `force_check`, and from the [`ConnectivityMonitor::run`]
//! loop while the server is unreachable.

pub mod health;
pub mod notify;
pub mod queue;
pub mod status;

pub use health::{HealthCheck, HttpHealthCheck, ProbeError};
pub use notify::{
    Banner, LogNavigator, LogNotifier, Navigator, NetworkSignal, Notifier, PlatformSignal,
    ToastLevel,
};
pub use queue::{DrainReport, RetryQueue, RetryTask};
pub use status::{ConnectionStatus, ConnectivityState};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::api::error::FailureKind;
use crate::config::ClientConfig;

/// Toast shown once when the server answers again after an outage.
pub const RECOVERED_MESSAGE: &str = "Connection restored";

/// Timing knobs for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub probe_debounce: Duration,
    pub health_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for MonitorConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            probe_debounce: config.probe_debounce,
            health_timeout: config.health_timeout,
            probe_interval: config.probe_interval,
        }
    }
}

/// Why a probe request did not go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Local network is known to be down.
    Offline,
    /// Another probe is already running.
    InFlight,
    /// The last probe started less than the debounce interval ago.
    Debounced,
}

/// Result of [`ConnectivityMonitor::probe_server_reachability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Skipped(SkipReason),
    Reachable,
    Unreachable,
}

/// Callback invoked with a state snapshot after every change.
pub type Listener = Arc<dyn Fn(&ConnectivityState) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`ConnectivityMonitor::subscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    /// Remove this registration. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Mutable monitor state, guarded by one lock.
struct Inner {
    state: ConnectivityState,
    probe_in_flight: bool,
    last_probe_at: Option<Instant>,
    active_banner: Option<Banner>,
}

/// User-facing side effects computed under the lock and applied after it.
enum Notice {
    Show(Banner),
    Dismiss(Banner),
    Recovered,
}

impl Inner {
    /// Make `banner` the active one, replacing any other. No-op if already active.
    fn raise(&mut self, banner: Banner, notices: &mut Vec<Notice>) {
        if self.active_banner == Some(banner) {
            return;
        }
        if let Some(previous) = self.active_banner.take() {
            notices.push(Notice::Dismiss(previous));
        }
        self.active_banner = Some(banner);
        notices.push(Notice::Show(banner));
    }

    fn lower(&mut self, banner: Banner, notices: &mut Vec<Notice>) {
        if self.active_banner == Some(banner) {
            self.active_banner = None;
            notices.push(Notice::Dismiss(banner));
        }
    }

    fn lower_any(&mut self, notices: &mut Vec<Notice>) {
        if let Some(banner) = self.active_banner.take() {
            notices.push(Notice::Dismiss(banner));
        }
    }
}

/// Clears `probe_in_flight` if a probe future is dropped before it settles.
struct InFlightGuard<'a> {
    inner: &'a Mutex<Inner>,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::debug!("Server probe abandoned before completion");
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .probe_in_flight = false;
        }
    }
}

/// Process-wide connectivity tracker. Construct once and share via `Arc`.
pub struct ConnectivityMonitor {
    inner: Mutex<Inner>,
    config: MonitorConfig,
    health: Arc<dyn HealthCheck>,
    signal: Arc<dyn NetworkSignal>,
    notifier: Arc<dyn Notifier>,
    queue: RetryQueue,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    state_tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    /// Create the monitor from the platform's current network signal.
    pub fn new(
        config: MonitorConfig,
        health: Arc<dyn HealthCheck>,
        signal: Arc<dyn NetworkSignal>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let online = signal.is_online();
        let state = ConnectivityState::initial(online);
        let (state_tx, _) = watch::channel(state);

        let mut inner = Inner {
            state,
            probe_in_flight: false,
            last_probe_at: None,
            active_banner: None,
        };
        if !online {
            inner.active_banner = Some(Banner::Offline);
            notifier.show_banner(Banner::Offline);
        }

        log::info!(
            "Connectivity monitor started ({})",
            state.status().label()
        );

        Arc::new(Self {
            inner: Mutex::new(inner),
            config,
            health,
            signal,
            notifier,
            queue: RetryQueue::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            state_tx,
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current snapshot.
    pub fn state(&self) -> ConnectivityState {
        self.inner().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    pub fn is_local_network_up(&self) -> bool {
        self.inner().state.local_network_up
    }

    /// Banner currently displayed, if any.
    pub fn active_banner(&self) -> Option<Banner> {
        self.inner().active_banner
    }

    pub fn retry_queue_len(&self) -> usize {
        self.queue.len()
    }

    fn apply(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Show(banner) => self.notifier.show_banner(banner),
                Notice::Dismiss(banner) => self.notifier.dismiss_banner(banner),
                Notice::Recovered => self.notifier.toast(ToastLevel::Success, RECOVERED_MESSAGE),
            }
        }
    }

    /// Handle the platform's native online/offline signal.
    ///
    /// Going down forces `server_reachable = false` without probing. Coming up
    /// triggers a forced probe. Repeating the current value only refreshes
    /// `last_checked_at`.
    pub async fn report_local_network_change(&self, up: bool) {
        let mut notices = Vec::new();
        let came_up = {
            let mut inner = self.inner();
            let was_up = inner.state.local_network_up;
            inner.state.last_checked_at = Instant::now();
            inner.state.local_network_up = up;
            if !up {
                inner.state.server_reachable = false;
            }

            if up == was_up {
                false
            } else if up {
                inner.lower(Banner::Offline, &mut notices);
                true
            } else {
                inner.raise(Banner::Offline, &mut notices);
                false
            }
        };

        if came_up {
            log::info!("Local network is back, probing server");
        } else if !up && !notices.is_empty() {
            log::info!("Local network went down");
        }

        self.apply(notices);
        self.notify();

        if came_up {
            self.probe_server_reachability(true).await;
        }
    }

    /// Check whether the server answers on the health endpoint.
    ///
    /// Skipped when the local network is down, when a probe is already
    /// running, or (unless `force`) when the last probe started within the
    /// debounce interval. A transition to reachable dismisses the banner and
    /// shows one success toast. Any success drains the retry queue if it holds
    /// tasks. A failure raises
    /// the server-down banner unless it is already showing.
    pub async fn probe_server_reachability(&self, force: bool) -> ProbeOutcome {
        {
            let mut inner = self.inner();
            if !inner.state.local_network_up {
                return ProbeOutcome::Skipped(SkipReason::Offline);
            }
            if inner.probe_in_flight {
                return ProbeOutcome::Skipped(SkipReason::InFlight);
            }
            let now = Instant::now();
            if !force {
                if let Some(last) = inner.last_probe_at {
                    if now.duration_since(last) < self.config.probe_debounce {
                        return ProbeOutcome::Skipped(SkipReason::Debounced);
                    }
                }
            }
            inner.probe_in_flight = true;
            inner.last_probe_at = Some(now);
        }
        let mut in_flight = InFlightGuard {
            inner: &self.inner,
            armed: true,
        };

        let result = match tokio::time::timeout(self.config.health_timeout, self.health.check()).await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };

        let mut notices = Vec::new();
        let (outcome, recovered) = {
            let mut inner = self.inner();
            inner.probe_in_flight = false;
            in_flight.disarm();
            inner.state.last_checked_at = Instant::now();

            if !inner.state.local_network_up {
                // Network dropped while the probe was out; the offline path owns the state.
                (ProbeOutcome::Unreachable, false)
            } else {
                match result {
                    Ok(()) => {
                        let was_reachable = inner.state.server_reachable;
                        inner.state.server_reachable = true;
                        if !was_reachable {
                            inner.lower_any(&mut notices);
                            notices.push(Notice::Recovered);
                        }
                        (ProbeOutcome::Reachable, !was_reachable)
                    }
                    Err(ref e) => {
                        log::warn!("Server probe failed: {}", e);
                        inner.state.server_reachable = false;
                        inner.raise(Banner::ServerDown, &mut notices);
                        (ProbeOutcome::Unreachable, false)
                    }
                }
            }
        };

        if recovered {
            log::info!("Server reachable again");
        }

        self.apply(notices);
        self.notify();

        // Also drain after a blip the monitor never saw as an outage.
        if recovered || (outcome == ProbeOutcome::Reachable && !self.queue.is_empty()) {
            self.drain_retry_queue().await;
        }
        outcome
    }

    /// Classify a failed request. `status` is `None` when no response arrived.
    pub fn classify_failure(&self, status: Option<StatusCode>) -> FailureKind {
        match status {
            Some(status) => FailureKind::from_status(status),
            None if self.is_local_network_up() => FailureKind::ServerUnreachable,
            None => FailureKind::Offline,
        }
    }

    /// Queue a replay action for the next reconnect.
    pub fn enqueue_retry(&self, task: RetryTask) {
        self.queue.enqueue(task);
    }

    /// Replay everything queued so far, in enqueue order.
    pub async fn drain_retry_queue(&self) -> DrainReport {
        let report = self.queue.drain().await;
        if report.attempted > 0 {
            log::info!(
                "Retry queue drained: {} attempted, {} failed",
                report.attempted,
                report.failed
            );
        }
        report
    }

    /// Register a listener for state changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectivityState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Channel view of the same notifications.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Deliver the current snapshot to every listener.
    ///
    /// A panicking listener is logged and skipped.
    pub fn notify(&self) {
        let snapshot = self.state();
        self.state_tx.send_replace(snapshot);

        // Clone the list so listeners may (un)subscribe while being called.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                log::error!("Connectivity listener panicked");
            }
        }
    }

    /// Reconcile with the platform's live online flag (covers events missed
    /// while suspended), then force a probe if online.
    pub async fn force_check(&self) {
        let live = self.signal.is_online();
        if live != self.is_local_network_up() {
            log::info!("Platform network flag changed while unobserved (online: {})", live);
            // Coming up probes on its own.
            self.report_local_network_change(live).await;
            return;
        }
        if live {
            self.probe_server_reachability(true).await;
        }
    }

    /// Page-visibility hook: becoming visible triggers [`Self::force_check`].
    pub async fn on_visibility_change(&self, visible: bool) {
        if visible {
            self.force_check().await;
        }
    }

    /// Probe loop. Polls the health endpoint every `probe_interval` while the
    /// server is unreachable; exits when `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.config.probe_interval.is_zero() {
            log::error!("Probe interval must be non-zero, probe loop not started");
            return;
        }
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        log::info!(
            "Connectivity probe loop started (interval: {}s)",
            self.config.probe_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.status().wants_probe() {
                        self.probe_server_reachability(false).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Connectivity probe loop stopping");
                        break;
                    }
                }
            }
        }
    }
}
