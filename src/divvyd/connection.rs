//! The single shared divvyd connection: an outbound command multiplexer plus
//! the asynchronous event stream.
//!
//! Any number of commands may be in flight at once. Each is correlated purely
//! by a transport-level request id assigned at send time; responses may come
//! back in any order. Messages without an id are events (`ledgerClosed`,
//! validated transactions) and are fanned out on a broadcast channel.

use crate::divvyd::errors::{LedgerError, LedgerResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One-way transport for serialized protocol messages. Inbound messages are
/// delivered over the channel handed to [`NodeConnection::start`].
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(&self, message: String) -> LedgerResult<()>;
}

/// Process-wide connectivity state, updated on every ledger-close event.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub current_ledger_index: Option<u64>,
    pub last_ledger_close: Option<Instant>,
    pub server_url: Option<String>,
    pub standalone: bool,
}

/// Asynchronous notifications from the node, decoupled from command
/// responses.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    LedgerClosed {
        ledger_index: u64,
    },
    TransactionValidated {
        hash: String,
        engine_result: String,
        engine_result_message: String,
        ledger_index: Option<u64>,
    },
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<LedgerResult<JsonValue>>>>;

pub struct NodeConnection {
    transport: Arc<dyn NodeTransport>,
    next_id: AtomicU64,
    pending: PendingMap,
    events_tx: broadcast::Sender<NodeEvent>,
    state: RwLock<ConnectionState>,
}

impl NodeConnection {
    /// Wire up the multiplexer over a transport and start its receive loop.
    pub fn start(
        transport: Arc<dyn NodeTransport>,
        inbound: mpsc::Receiver<String>,
        server_url: impl Into<String>,
        standalone: bool,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connection = Arc::new(Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            events_tx,
            state: RwLock::new(ConnectionState {
                server_url: Some(server_url.into()),
                standalone,
                ..ConnectionState::default()
            }),
        });

        tokio::spawn(receive_loop(Arc::clone(&connection), inbound));
        connection
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().expect("connection state poisoned").clone()
    }

    pub(crate) fn update_state(&self, apply: impl FnOnce(&mut ConnectionState)) {
        let mut state = self.state.write().expect("connection state poisoned");
        apply(&mut state);
    }

    /// Send a command and await its correlated response. Cancelling the
    /// returned future (or timing out) releases the pending registration so
    /// a late response is simply dropped.
    pub async fn request(
        &self,
        command: &str,
        params: JsonValue,
        timeout: Duration,
    ) -> LedgerResult<JsonValue> {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);

        let mut message = match params {
            JsonValue::Object(map) => map,
            JsonValue::Null => serde_json::Map::new(),
            other => {
                return Err(LedgerError::protocol(format!(
                    "command parameters must be an object, got {}",
                    other
                )))
            }
        };
        message.insert("id".to_string(), JsonValue::from(id));
        message.insert("command".to_string(), JsonValue::from(command));

        let (response_tx, response_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, response_tx);

        let text = JsonValue::Object(message).to_string();
        trace!(id, command, "sending divvyd command");
        if let Err(e) = self.transport.send(text).await {
            self.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LedgerError::disconnected(
                "connection closed while awaiting response",
            )),
            Err(_) => {
                self.forget(id);
                Err(LedgerError::timeout(timeout.as_secs()))
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending.lock().expect("pending map poisoned").remove(&id);
    }

    fn dispatch(&self, text: &str) {
        let message: JsonValue = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "discarding unparseable divvyd message");
                return;
            }
        };

        if let Some(id) = message.get("id").and_then(|v| v.as_u64()) {
            self.dispatch_response(id, message);
        } else if let Some(kind) = message.get("type").and_then(|v| v.as_str()) {
            self.dispatch_event(kind, &message);
        } else {
            debug!("divvyd message with neither id nor type ignored");
        }
    }

    fn dispatch_response(&self, id: u64, mut message: JsonValue) {
        let waiter = self.pending.lock().expect("pending map poisoned").remove(&id);
        let Some(waiter) = waiter else {
            // Already timed out or cancelled.
            debug!(id, "dropping response with no registered waiter");
            return;
        };

        let outcome = if message.get("status").and_then(|v| v.as_str()) == Some("error") {
            let code = message
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let detail = message
                .get("error_message")
                .or_else(|| message.get("error_exception"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Err(LedgerError::node(code, detail))
        } else {
            Ok(message
                .get_mut("result")
                .map(JsonValue::take)
                .unwrap_or(message))
        };

        let _ = waiter.send(outcome);
    }

    fn dispatch_event(&self, kind: &str, message: &JsonValue) {
        match kind {
            "ledgerClosed" => {
                let Some(ledger_index) = message.get("ledger_index").and_then(|v| v.as_u64())
                else {
                    warn!("ledgerClosed event without a ledger_index");
                    return;
                };
                self.update_state(|state| {
                    state.current_ledger_index = Some(ledger_index);
                    state.last_ledger_close = Some(Instant::now());
                });
                let _ = self.events_tx.send(NodeEvent::LedgerClosed { ledger_index });
            }
            "transaction" => {
                if message.get("validated").and_then(|v| v.as_bool()) != Some(true) {
                    return;
                }
                let Some(hash) = message
                    .pointer("/transaction/hash")
                    .and_then(|v| v.as_str())
                else {
                    warn!("validated transaction event without a hash");
                    return;
                };
                let event = NodeEvent::TransactionValidated {
                    hash: hash.to_string(),
                    engine_result: message
                        .get("engine_result")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    engine_result_message: message
                        .get("engine_result_message")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    ledger_index: message.get("ledger_index").and_then(|v| v.as_u64()),
                };
                let _ = self.events_tx.send(event);
            }
            other => trace!(kind = other, "ignoring divvyd event"),
        }
    }
}

async fn receive_loop(connection: Arc<NodeConnection>, mut inbound: mpsc::Receiver<String>) {
    while let Some(text) = inbound.recv().await {
        connection.dispatch(&text);
    }

    warn!("divvyd inbound channel closed");
    // No server is associated with the connection anymore; readiness checks
    // must fail until a new connection is established.
    connection.update_state(|state| {
        state.server_url = None;
        state.last_ledger_close = None;
    });
    let waiters: Vec<_> = {
        let mut pending = connection.pending.lock().expect("pending map poisoned");
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for waiter in waiters {
        let _ = waiter.send(Err(LedgerError::disconnected("divvyd connection lost")));
    }
}
