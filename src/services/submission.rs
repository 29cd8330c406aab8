//! Transaction lifecycle tracking between preliminary acceptance and final
//! validation.
//!
//! A submitted transaction is only provisionally accepted until it appears in
//! a validated ledger. The router listens to the node's validated-transaction
//! stream and resolves one waiter per hash; ledger-close events expire
//! waiters whose LastLedgerSequence has passed without validation.

use crate::divvyd::connection::NodeEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Final disposition of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    Validated {
        ledger_index: Option<u64>,
    },
    Failed {
        engine_result: String,
        message: String,
        ledger_index: Option<u64>,
    },
    /// The ledger passed the transaction's LastLedgerSequence without
    /// validating it. The transaction can never be applied now.
    Expired {
        ledger_index: u64,
    },
}

/// Preliminary engine results starting tem, tef or tel mean the transaction
/// was rejected outright and will never reach a ledger. tes and the retryable
/// classes (ter, tec) are provisionally accepted.
pub fn is_immediate_rejection(engine_result: &str) -> bool {
    engine_result.starts_with("tem")
        || engine_result.starts_with("tef")
        || engine_result.starts_with("tel")
}

struct Waiter {
    tx: oneshot::Sender<FinalOutcome>,
    last_ledger_sequence: u64,
}

type WaiterMap = Arc<Mutex<HashMap<String, Waiter>>>;

/// Routes validated-transaction events to the task awaiting each hash.
#[derive(Clone)]
pub struct ConfirmationRouter {
    waiters: WaiterMap,
}

impl Default for ConfirmationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationRouter {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Consume node events until the channel closes. Run once, on its own
    /// task.
    pub async fn run(self, mut events: broadcast::Receiver<NodeEvent>) {
        loop {
            match events.recv().await {
                Ok(NodeEvent::TransactionValidated {
                    hash,
                    engine_result,
                    engine_result_message,
                    ledger_index,
                }) => self.resolve(&hash, engine_result, engine_result_message, ledger_index),
                Ok(NodeEvent::LedgerClosed { ledger_index }) => self.expire_past(ledger_index),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed validations are recovered by the caller's
                    // poll-after-timeout path.
                    warn!(skipped, "confirmation router lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("confirmation router stopping, event stream closed");
                    break;
                }
            }
        }
    }

    /// Register interest in a hash before its validation can arrive. Dropping
    /// the registration unregisters it.
    pub fn register(&self, hash: &str, last_ledger_sequence: u64) -> WaitRegistration {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("waiter map poisoned").insert(
            hash.to_string(),
            Waiter {
                tx,
                last_ledger_sequence,
            },
        );
        WaitRegistration {
            hash: hash.to_string(),
            waiters: Arc::clone(&self.waiters),
            rx: Some(rx),
        }
    }

    /// Resolve a waiter directly, used when the outcome is learned from a
    /// `tx` query rather than the event stream.
    pub fn resolve(
        &self,
        hash: &str,
        engine_result: String,
        message: String,
        ledger_index: Option<u64>,
    ) {
        let waiter = self.waiters.lock().expect("waiter map poisoned").remove(hash);
        let Some(waiter) = waiter else {
            return;
        };
        let outcome = if engine_result == "tesSUCCESS" {
            FinalOutcome::Validated { ledger_index }
        } else {
            FinalOutcome::Failed {
                engine_result,
                message,
                ledger_index,
            }
        };
        debug!(hash, ?outcome, "transaction reached final disposition");
        let _ = waiter.tx.send(outcome);
    }

    fn expire_past(&self, ledger_index: u64) {
        let expired: Vec<(String, Waiter)> = {
            let mut waiters = self.waiters.lock().expect("waiter map poisoned");
            let hashes: Vec<String> = waiters
                .iter()
                .filter(|(_, w)| w.last_ledger_sequence < ledger_index)
                .map(|(hash, _)| hash.clone())
                .collect();
            hashes
                .into_iter()
                .filter_map(|hash| waiters.remove(&hash).map(|w| (hash, w)))
                .collect()
        };
        for (hash, waiter) in expired {
            debug!(
                hash,
                last_ledger_sequence = waiter.last_ledger_sequence,
                ledger_index,
                "transaction expired without validation"
            );
            let _ = waiter.tx.send(FinalOutcome::Expired { ledger_index });
        }
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

/// A one-shot handle to a transaction's final outcome.
pub struct WaitRegistration {
    hash: String,
    waiters: WaiterMap,
    rx: Option<oneshot::Receiver<FinalOutcome>>,
}

impl WaitRegistration {
    /// Await the final outcome. `None` means the wait timed out with the
    /// outcome still unknown.
    pub async fn outcome(mut self, timeout: Duration) -> Option<FinalOutcome> {
        let rx = self.rx.take()?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) | Err(_) => None,
        }
    }
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        self.waiters
            .lock()
            .expect("waiter map poisoned")
            .remove(&self.hash);
    }
}
