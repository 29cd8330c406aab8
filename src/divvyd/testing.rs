//! Scripted in-process transport for exercising the connection layer and the
//! submission flow without a live node.

use crate::divvyd::connection::{NodeConnection, NodeTransport};
use crate::divvyd::errors::LedgerResult;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Responder = dyn FnMut(u64, &str, &JsonValue) -> Option<JsonValue> + Send;

struct MockTransport {
    sent: Arc<Mutex<Vec<JsonValue>>>,
    responder: Mutex<Box<Responder>>,
    in_tx: mpsc::Sender<String>,
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn send(&self, message: String) -> LedgerResult<()> {
        let parsed: JsonValue = serde_json::from_str(&message).expect("mock received non-JSON");
        self.sent.lock().unwrap().push(parsed.clone());

        let id = parsed["id"].as_u64().expect("command without id");
        let command = parsed["command"].as_str().expect("command without name").to_string();
        let response = {
            let mut responder = self.responder.lock().unwrap();
            responder(id, &command, &parsed)
        };
        if let Some(response) = response {
            let _ = self.in_tx.send(response.to_string()).await;
        }
        Ok(())
    }
}

/// Handle for injecting node messages and inspecting what was sent.
pub struct MockHandle {
    sent: Arc<Mutex<Vec<JsonValue>>>,
    in_tx: mpsc::Sender<String>,
}

impl MockHandle {
    /// Deliver a raw message as if it came from the node.
    pub async fn emit(&self, message: JsonValue) {
        self.in_tx
            .send(message.to_string())
            .await
            .expect("mock inbound channel closed");
    }

    /// Names of every command sent so far, in order.
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m["command"].as_str().map(str::to_string))
            .collect()
    }

    /// The full message for the most recent command with the given name.
    pub fn last_sent(&self, command: &str) -> Option<JsonValue> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m["command"] == command)
            .cloned()
    }
}

/// Build a connection backed by a scripted transport. The responder sees each
/// outbound command and may return a complete response message; returning
/// `None` leaves the command unanswered.
pub fn mock_connection(
    responder: impl FnMut(u64, &str, &JsonValue) -> Option<JsonValue> + Send + 'static,
) -> (Arc<NodeConnection>, MockHandle) {
    let (in_tx, in_rx) = mpsc::channel(64);
    let sent = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport {
        sent: Arc::clone(&sent),
        responder: Mutex::new(Box::new(responder)),
        in_tx: in_tx.clone(),
    });
    let connection = NodeConnection::start(transport, in_rx, "ws://mock.divvyd", false);
    (connection, MockHandle { sent, in_tx })
}

pub fn ok_response(id: u64, result: JsonValue) -> JsonValue {
    json!({"id": id, "status": "success", "type": "response", "result": result})
}

pub fn error_response(id: u64, code: &str, message: &str) -> JsonValue {
    json!({
        "id": id,
        "status": "error",
        "type": "response",
        "error": code,
        "error_message": message,
    })
}
