//! Duplicate-submission protection keyed on (source account, client resource
//! id).
//!
//! The check and the reservation happen under a per-key lock so two
//! concurrent submissions with the same identifier cannot both pass: one
//! reserves, the other observes the pending record and is rejected.

use crate::database::{RecordStore, SubmissionRecord, SubmissionState};
use crate::error::RestError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDecision {
    /// No prior submission under this identifier.
    Proceed,
    /// A prior submission failed terminally; this attempt supersedes it.
    ProceedRetry,
}

pub struct IdempotencyGuard {
    store: Arc<dyn RecordStore>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check for a prior submission and reserve the identifier by
    /// writing a pending record.
    ///
    /// A pending or validated record rejects the attempt. A failed record
    /// permits a retry; the fresh pending record supersedes the stored hash.
    pub async fn check_and_reserve(
        &self,
        source_account: &str,
        client_resource_id: &str,
    ) -> Result<ReserveDecision, RestError> {
        let key_lock = self.key_lock(source_account, client_resource_id).await;
        let _guard = key_lock.lock().await;

        let existing = self.store.get(source_account, client_resource_id).await?;
        let decision = match existing.map(|r| r.state) {
            Some(SubmissionState::Pending) | Some(SubmissionState::Validated) => {
                return Err(RestError::Duplicate(format!(
                    "A transaction with client_resource_id '{client_resource_id}' has already \
                     been submitted for this account. Use a new client_resource_id to submit \
                     another payment",
                )));
            }
            Some(SubmissionState::Failed) => {
                debug!(
                    source_account,
                    client_resource_id, "retrying a previously failed submission"
                );
                ReserveDecision::ProceedRetry
            }
            None => ReserveDecision::Proceed,
        };

        self.store
            .put(&SubmissionRecord::pending(source_account, client_resource_id))
            .await?;
        drop(_guard);
        self.prune_lock(source_account, client_resource_id, &key_lock)
            .await;
        Ok(decision)
    }

    async fn key_lock(&self, source_account: &str, client_resource_id: &str) -> Arc<Mutex<()>> {
        let key = (source_account.to_string(), client_resource_id.to_string());
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key).or_default())
    }

    /// Drop the per-key lock once no other task holds it, so the map does not
    /// grow with every identifier ever seen.
    async fn prune_lock(
        &self,
        source_account: &str,
        client_resource_id: &str,
        key_lock: &Arc<Mutex<()>>,
    ) {
        let mut locks = self.locks.lock().await;
        // Two strong counts: the map entry and our local handle.
        if Arc::strong_count(key_lock) <= 2 {
            locks.remove(&(source_account.to_string(), client_resource_id.to_string()));
        }
    }
}
