//! Connection manager.
//!
//! Owns the transport connection's lifecycle. The manager only requests
//! enable/disable and observes the outcome; status values are driven by
//! the transport, never forced (the sole exception is the `Idle` reset
//! when the connection is torn down).
//!
//! Address changes while enabled reconnect without the caller
//! re-issuing `set_enabled`: the connect effect depends on both signals
//! and re-runs, closing the old connection first.

use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::diag::DiagLog;
use crate::effect::EffectScope;
use crate::signal::Signal;
use crate::traits::{RelayConnection, Transport};

/// Transport connection status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Disabled or no address set.
    Idle,
    /// Dialing the relay.
    Connecting,
    /// Connection established.
    Connected,
    /// Transport closed the connection cleanly.
    Disconnected,
    /// Connect failed or the connection was lost.
    Error,
}

/// Manages one transport connection to a relay.
pub struct ConnectionManager {
    address: Signal<Option<Url>>,
    enabled: Signal<bool>,
    status: Signal<ConnectionStatus>,
    established: Signal<Option<Arc<dyn RelayConnection>>>,
    scope: EffectScope,
}

impl ConnectionManager {
    /// Create a manager driving `transport`. Starts disabled with no
    /// address.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, diag: DiagLog) -> Self {
        let address: Signal<Option<Url>> = Signal::new(None);
        let enabled = Signal::new(false);
        let status = Signal::new(ConnectionStatus::Idle);
        let established: Signal<Option<Arc<dyn RelayConnection>>> = Signal::new(None);

        let mut scope = EffectScope::new();
        {
            let address = address.clone();
            let enabled = enabled.clone();
            let status = status.clone();
            let established = established.clone();
            scope.effect(move |ctx| {
                let is_enabled = ctx.get(&enabled);
                let addr = ctx.get(&address);

                {
                    let status = status.clone();
                    let established = established.clone();
                    ctx.on_cleanup(move || {
                        established.replace(None);
                        status.set(ConnectionStatus::Idle);
                    });
                }

                if !is_enabled {
                    return;
                }
                let Some(addr) = addr else {
                    return;
                };

                status.set(ConnectionStatus::Connecting);
                diag.record("conn", format!("connecting to {addr}"));

                let transport = Arc::clone(&transport);
                let status = status.clone();
                let established = established.clone();
                let diag = diag.clone();
                ctx.spawn(move |cancel| async move {
                    let conn = tokio::select! {
                        () = cancel.cancelled() => return,
                        result = transport.connect(&addr) => match result {
                            Ok(conn) => conn,
                            Err(e) => {
                                status.set(ConnectionStatus::Error);
                                diag.record("conn", format!("connect failed: {e}"));
                                warn!(target: "sc.connection", error = %e, "connect failed");
                                return;
                            }
                        },
                    };

                    established.replace(Some(Arc::clone(&conn)));
                    status.set(ConnectionStatus::Connected);
                    diag.record("conn", "connected");
                    info!(target: "sc.connection", address = %addr, "connection established");

                    tokio::select! {
                        () = cancel.cancelled() => {
                            conn.close();
                        }
                        reason = conn.closed() => {
                            established.replace(None);
                            match reason {
                                None => {
                                    status.set(ConnectionStatus::Disconnected);
                                    diag.record("conn", "connection closed");
                                }
                                Some(err) => {
                                    status.set(ConnectionStatus::Error);
                                    diag.record("conn", format!("connection lost: {err}"));
                                    warn!(target: "sc.connection", error = %err, "connection lost");
                                }
                            }
                        }
                    }
                });
            });
        }

        Self {
            address,
            enabled,
            status,
            established,
            scope,
        }
    }

    /// Set the relay address. `None` disables connecting.
    pub fn set_address(&self, address: Option<Url>) {
        self.address.set(address);
    }

    /// Enable or disable the connection.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Connection status signal.
    #[must_use]
    pub fn status(&self) -> Signal<ConnectionStatus> {
        self.status.clone()
    }

    /// Established connection handle, `None` until connected.
    #[must_use]
    pub fn established(&self) -> Signal<Option<Arc<dyn RelayConnection>>> {
        self.established.clone()
    }

    /// Dispose the manager, closing any live connection.
    pub async fn close(self) {
        self.scope.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sc_test_utils::MockTransport;
    use session_controller::connection::{ConnectionManager, ConnectionStatus};
    use session_controller::diag::DiagLog;
    use std::time::Duration;

    fn relay_url() -> Url {
        Url::parse("https://relay.example/anon/room1").unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_idle_while_disabled() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        settle().await;
        assert_eq!(manager.status().get(), ConnectionStatus::Idle);
        assert!(manager.established().get().is_none());

        // Address alone does not connect
        manager.set_address(Some(relay_url()));
        settle().await;
        assert_eq!(manager.status().get(), ConnectionStatus::Idle);
        assert_eq!(transport.connection_count(), 0);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_connects_when_enabled_with_address() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;

        assert_eq!(manager.status().get(), ConnectionStatus::Connected);
        assert!(manager.established().get().is_some());
        assert_eq!(transport.connection_count(), 1);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_disable_releases_connection() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;
        let relay = transport.connection(0);

        manager.set_enabled(false);
        settle().await;

        assert!(manager.established().get().is_none());
        assert_eq!(manager.status().get(), ConnectionStatus::Idle);
        assert!(relay.is_closed());

        manager.close().await;
    }

    #[tokio::test]
    async fn test_address_change_reconnects_without_reenabling() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;
        assert_eq!(transport.connection_count(), 1);

        manager.set_address(Some(Url::parse("https://other.example/anon/room2").unwrap()));
        settle().await;

        assert_eq!(transport.connection_count(), 2);
        assert!(transport.connection(0).is_closed());
        assert!(!transport.connection(1).is_closed());
        assert_eq!(manager.status().get(), ConnectionStatus::Connected);

        manager.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let transport = MockTransport::failing("connection refused");
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;

        assert_eq!(manager.status().get(), ConnectionStatus::Error);
        assert!(manager.established().get().is_none());

        manager.close().await;
    }

    #[tokio::test]
    async fn test_transport_drop_surfaces_as_status_change() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;

        transport.connection(0).drop_connection(Some("timeout".to_string()));
        settle().await;

        assert_eq!(manager.status().get(), ConnectionStatus::Error);
        assert!(manager.established().get().is_none());

        manager.close().await;
    }

    #[tokio::test]
    async fn test_clean_close_surfaces_as_disconnected() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(transport.as_dyn(), DiagLog::default());

        manager.set_address(Some(relay_url()));
        manager.set_enabled(true);
        settle().await;

        transport.connection(0).drop_connection(None);
        settle().await;

        assert_eq!(manager.status().get(), ConnectionStatus::Disconnected);

        manager.close().await;
    }
}
