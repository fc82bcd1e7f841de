//! Connectivity snapshot and the effective status shown to the user.
//!
//! Two independent signals (local network, server reachability) combine into
//! three user-visible states. There is no terminal state.

use tokio::time::Instant;

/// Point-in-time copy of what the monitor believes.
///
/// `server_reachable` is only meaningful while `local_network_up` is true and
/// is forced to `false` whenever the local network goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub local_network_up: bool,
    pub server_reachable: bool,
    pub last_checked_at: Instant,
}

impl ConnectivityState {
    /// Initial state: follows the platform signal, with the server optimistically
    /// assumed reachable until the first probe completes.
    pub fn initial(local_network_up: bool) -> Self {
        Self {
            local_network_up,
            server_reachable: local_network_up,
            last_checked_at: Instant::now(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match (self.local_network_up, self.server_reachable) {
            (false, _) => ConnectionStatus::Offline,
            (true, false) => ConnectionStatus::OnlineDegraded,
            (true, true) => ConnectionStatus::OnlineConnected,
        }
    }
}

/// Effective connectivity as displayed by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Network up, server answering. No banner.
    OnlineConnected,
    /// Network up, server not answering. Persistent banner, periodic probing.
    OnlineDegraded,
    /// No local network. Banner, no probing.
    Offline,
}

impl ConnectionStatus {
    /// Human-readable status text for the indicator.
    pub fn label(&self) -> &str {
        match self {
            ConnectionStatus::OnlineConnected => "Connected",
            ConnectionStatus::OnlineDegraded => "Server unreachable",
            ConnectionStatus::Offline => "Offline",
        }
    }

    pub fn shows_banner(&self) -> bool {
        !matches!(self, ConnectionStatus::OnlineConnected)
    }

    /// Whether the periodic probe loop should poll the health endpoint.
    pub fn wants_probe(&self) -> bool {
        matches!(self, ConnectionStatus::OnlineDegraded)
    }
}
