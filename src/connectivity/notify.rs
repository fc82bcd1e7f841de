//! Seams to the host application: user-facing notifications, sign-in
//! navigation, and the platform's online/offline signal.
//!
//! The defaults log through the `log` facade; a UI shell supplies its own.

use std::sync::atomic::{AtomicBool, Ordering};

/// Persistent (non-auto-dismissing) banners raised by connectivity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Banner {
    /// No local network.
    Offline,
    /// Network is up but the server does not answer.
    ServerDown,
}

impl Banner {
    pub fn message(self) -> &'static str {
        match self {
            Banner::Offline => "You are offline. Changes will sync when the connection returns.",
            Banner::ServerDown => "Cannot reach the CipherBox server. Retrying...",
        }
    }
}

/// Severity of a transient, auto-dismissed toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Info,
    Error,
}

/// User-facing notification surface.
pub trait Notifier: Send + Sync {
    /// Show a persistent banner. Called at most once per active banner.
    fn show_banner(&self, banner: Banner);

    /// Dismiss a banner previously shown.
    fn dismiss_banner(&self, banner: Banner);

    /// Show a transient toast.
    fn toast(&self, level: ToastLevel, message: &str);
}

/// Notifier that writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_banner(&self, banner: Banner) {
        log::warn!("[banner] {}", banner.message());
    }

    fn dismiss_banner(&self, banner: Banner) {
        log::info!("[banner dismissed] {:?}", banner);
    }

    fn toast(&self, level: ToastLevel, message: &str) {
        match level {
            ToastLevel::Error => log::error!("[toast] {}", message),
            ToastLevel::Success | ToastLevel::Info => log::info!("[toast] {}", message),
        }
    }
}

/// Navigation to the unauthenticated entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self);
}

#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_sign_in(&self) {
        log::warn!("Session ended, sign-in required");
    }
}

/// Platform-level network reachability signal.
pub trait NetworkSignal: Send + Sync {
    /// Live value of the platform's online flag.
    fn is_online(&self) -> bool;
}

/// Online flag maintained by the host from its native online/offline events.
#[derive(Debug)]
pub struct PlatformSignal {
    online: AtomicBool,
}

impl PlatformSignal {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for PlatformSignal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkSignal for PlatformSignal {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
