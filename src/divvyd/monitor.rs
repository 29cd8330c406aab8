//! Connectivity tracking for the shared divvyd connection.
//!
//! Readiness is judged from the last observed ledger close rather than the
//! socket state: a connected socket to a node that has stopped closing
//! ledgers is not a usable connection.

use crate::divvyd::client::NodeClient;
use crate::divvyd::connection::NodeConnection;
use crate::divvyd::errors::{LedgerError, LedgerResult};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// If no ledger close is observed within this window, the connection is
/// considered offline.
pub const LEDGER_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub divvyd_server_url: String,
    pub divvyd_server_status: JsonValue,
}

pub struct ConnectionMonitor {
    connection: Arc<NodeConnection>,
    client: NodeClient,
}

impl ConnectionMonitor {
    pub fn new(connection: Arc<NodeConnection>, client: NodeClient) -> Self {
        Self { connection, client }
    }

    /// True iff the current ledger index is known, a server is associated
    /// with the connection, and either the node runs standalone (no external
    /// consensus, so no ledger cadence to measure) or the last ledger close
    /// is within the freshness window.
    pub fn is_ready(&self) -> bool {
        let state = self.connection.state();
        if state.current_ledger_index.is_none() {
            // Missing the index of the last closed ledger; unprepared to
            // submit transactions.
            return false;
        }
        if state.server_url.is_none() {
            return false;
        }
        if state.standalone {
            return true;
        }
        state
            .last_ledger_close
            .map(|at| at.elapsed() <= LEDGER_FRESHNESS_WINDOW)
            .unwrap_or(false)
    }

    pub fn ensure_ready(&self) -> LedgerResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(LedgerError::NotReady)
        }
    }

    /// Connectivity check plus upstream server info, merged.
    pub async fn status(&self) -> LedgerResult<ServerStatus> {
        self.ensure_ready()?;
        let info = self.client.server_info().await?;
        let server_url = self
            .connection
            .state()
            .server_url
            .unwrap_or_default();
        Ok(ServerStatus {
            divvyd_server_url: server_url,
            divvyd_server_status: info,
        })
    }

    /// Whether the node's complete-ledger range covers the given index.
    pub async fn has_ledger(&self, ledger_index: u64) -> LedgerResult<bool> {
        static RANGE_RE: OnceLock<Regex> = OnceLock::new();
        let range_re =
            RANGE_RE.get_or_init(|| Regex::new(r"([0-9]+)-([0-9]+)$").unwrap());

        let status = self.status().await?;
        let range = status
            .divvyd_server_status
            .get("complete_ledgers")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let Some(captures) = range_re.captures(&range) else {
            return Ok(false);
        };
        let min: u64 = captures[1].parse().unwrap_or(u64::MAX);
        let max: u64 = captures[2].parse().unwrap_or(0);
        Ok(ledger_index >= min && ledger_index <= max)
    }

    /// The current open-ledger transaction fee in drops, derived from the
    /// node's reference fee scaled by its load factor.
    pub async fn transaction_fee_drops(&self) -> LedgerResult<i64> {
        let info = self.client.server_info().await?;
        let base_fee_xdv = info
            .pointer("/validated_ledger/base_fee_xdv")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| LedgerError::protocol("server_info missing base_fee_xdv"))?;
        let load_factor = info
            .get("load_factor")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        // Round up: quoting a fee slightly high is harmless, quoting low
        // produces submissions the ledger will reject.
        let drops = (base_fee_xdv * 1_000_000.0 * load_factor).ceil() as i64;
        Ok(drops.max(0))
    }

    pub fn current_ledger_index(&self) -> Option<u64> {
        self.connection.state().current_ledger_index
    }
}

/// Background probe of the upstream, independent of caller requests. Failures
/// are logged and retried forever; callers are never blocked on it.
pub struct HeartbeatWorker {
    client: NodeClient,
    interval: Duration,
}

impl HeartbeatWorker {
    pub fn new(client: NodeClient, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "divvyd heartbeat started");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("divvyd heartbeat stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.client.ping().await {
                        Ok(()) => debug!("divvyd heartbeat ok"),
                        Err(e) => warn!(error = %e, "divvyd heartbeat failed"),
                    }
                }
            }
        }
        info!("divvyd heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::divvyd::testing::{mock_connection, ok_response};
    use serde_json::json;
    use std::time::Instant;

    fn monitor_for(connection: &Arc<NodeConnection>) -> ConnectionMonitor {
        let client = NodeClient::new(Arc::clone(connection), Duration::from_secs(5));
        ConnectionMonitor::new(Arc::clone(connection), client)
    }

    #[tokio::test]
    async fn not_ready_without_ledger_index() {
        let (connection, _handle) = mock_connection(|_, _, _| None);
        let monitor = monitor_for(&connection);
        assert!(!monitor.is_ready());
    }

    #[tokio::test]
    async fn ready_with_fresh_ledger_close() {
        let (connection, _handle) = mock_connection(|_, _, _| None);
        connection.update_state(|state| {
            state.current_ledger_index = Some(100);
            state.last_ledger_close = Some(Instant::now());
        });
        let monitor = monitor_for(&connection);
        assert!(monitor.is_ready());
    }

    #[tokio::test]
    async fn stale_ledger_close_is_not_ready() {
        let (connection, _handle) = mock_connection(|_, _, _| None);
        connection.update_state(|state| {
            state.current_ledger_index = Some(100);
            state.last_ledger_close = Some(Instant::now() - Duration::from_secs(31));
        });
        let monitor = monitor_for(&connection);
        assert!(!monitor.is_ready());
    }

    #[tokio::test]
    async fn standalone_ignores_freshness() {
        let (connection, _handle) = mock_connection(|_, _, _| None);
        connection.update_state(|state| {
            state.current_ledger_index = Some(100);
            state.last_ledger_close = Some(Instant::now() - Duration::from_secs(3600));
            state.standalone = true;
        });
        let monitor = monitor_for(&connection);
        assert!(monitor.is_ready());
    }

    #[tokio::test]
    async fn status_fails_fast_when_not_ready() {
        let (connection, handle) = mock_connection(|_, _, _| None);
        let monitor = monitor_for(&connection);
        assert!(matches!(
            monitor.status().await.unwrap_err(),
            LedgerError::NotReady
        ));
        // No doomed server_info command was issued upstream.
        assert!(handle.sent_commands().is_empty());
    }

    #[tokio::test]
    async fn fee_scales_with_load_factor() {
        let (connection, _handle) = mock_connection(|id, command, _| {
            assert_eq!(command, "server_info");
            Some(ok_response(
                id,
                json!({"info": {
                    "validated_ledger": {"base_fee_xdv": 0.00001},
                    "load_factor": 256.0,
                }}),
            ))
        });
        connection.update_state(|state| {
            state.current_ledger_index = Some(100);
            state.standalone = true;
        });
        let monitor = monitor_for(&connection);
        assert_eq!(monitor.transaction_fee_drops().await.unwrap(), 2560);
    }

    #[tokio::test]
    async fn has_ledger_parses_complete_range() {
        let (connection, _handle) = mock_connection(|id, _, _| {
            Some(ok_response(
                id,
                json!({"info": {"complete_ledgers": "32570-8696231"}}),
            ))
        });
        connection.update_state(|state| {
            state.current_ledger_index = Some(8_696_231);
            state.standalone = true;
        });
        let monitor = monitor_for(&connection);
        assert!(monitor.has_ledger(32_570).await.unwrap());
        assert!(monitor.has_ledger(8_696_231).await.unwrap());
        assert!(!monitor.has_ledger(1).await.unwrap());
    }
}
