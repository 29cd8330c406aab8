//! Payment submission and retrieval.
//!
//! Submission is a pipeline: validate, assemble, reserve the identifier,
//! price the fee, submit, classify the preliminary result, then either return
//! immediately or hold the request open until the transaction reaches a
//! final disposition.

use crate::database::{RecordStore, SubmissionState};
use crate::divvyd::amount::{compare_by_ledger_order, from_wire_amount, xdv_to_drops};
use crate::divvyd::client::{NodeClient, SubmitOutcome};
use crate::divvyd::monitor::ConnectionMonitor;
use crate::divvyd::types::{
    is_valid_address, is_valid_client_resource_id, is_valid_hash256, Payment, TF_NO_DIVVY_DIRECT,
    TF_PARTIAL_PAYMENT,
};
use crate::divvyd::LedgerError;
use crate::error::{RestError, RestResult};
use crate::services::assembler::assemble_payment;
use crate::services::idempotency::IdempotencyGuard;
use crate::services::submission::{is_immediate_rejection, ConfirmationRouter, FinalOutcome};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ledgers past the current one before an unvalidated transaction expires,
/// when the caller does not set its own horizon.
pub const DEFAULT_LEDGER_HORIZON: u64 = 8;

/// How long a non-blocking submission keeps tracking its outcome in the
/// background. The expiry horizon resolves long before this in practice.
const BACKGROUND_TRACK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct SubmitPaymentRequest {
    pub secret: String,
    pub client_resource_id: String,
    pub payment: Payment,
    #[serde(default)]
    pub max_fee: Option<String>,
    #[serde(default)]
    pub last_ledger_sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitPaymentResponse {
    pub success: bool,
    pub client_resource_id: String,
    pub status_url: String,
    pub hash: String,
    pub state: String,
}

/// One entry in the account payments listing.
#[derive(Debug, Serialize)]
pub struct AccountPaymentEntry {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_resource_id: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<u64>,
    pub state: String,
    pub payment: Payment,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatus {
    pub success: bool,
    pub payment: Payment,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_resource_id: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<u64>,
    pub state: String,
}

pub struct PaymentService {
    client: NodeClient,
    monitor: Arc<ConnectionMonitor>,
    router: ConfirmationRouter,
    store: Arc<dyn RecordStore>,
    idempotency: IdempotencyGuard,
    ledger_horizon: u64,
    validation_timeout: Duration,
}

impl PaymentService {
    pub fn new(
        client: NodeClient,
        monitor: Arc<ConnectionMonitor>,
        router: ConfirmationRouter,
        store: Arc<dyn RecordStore>,
        ledger_horizon: u64,
        validation_timeout: Duration,
    ) -> Self {
        let idempotency = IdempotencyGuard::new(Arc::clone(&store));
        Self {
            client,
            monitor,
            router,
            store,
            idempotency,
            ledger_horizon,
            validation_timeout,
        }
    }

    /// Submit a payment. With `wait_validated` the response is held until the
    /// transaction validates, fails, or expires.
    pub async fn submit(
        &self,
        account: &str,
        request: SubmitPaymentRequest,
        wait_validated: bool,
    ) -> RestResult<SubmitPaymentResponse> {
        self.monitor.ensure_ready()?;
        self.validate_submit(account, &request)?;

        let tx = assemble_payment(&request.payment)?;
        self.idempotency
            .check_and_reserve(account, &request.client_resource_id)
            .await?;

        // Failures past the reservation must release it, or the identifier
        // would be poisoned as permanently pending.
        match self.submit_reserved(account, request, tx, wait_validated).await {
            Ok(response) => Ok(response),
            Err((err, client_resource_id)) => {
                self.mark_failed(account, &client_resource_id, &err).await;
                Err(err)
            }
        }
    }

    async fn submit_reserved(
        &self,
        account: &str,
        request: SubmitPaymentRequest,
        mut tx: crate::divvyd::types::PaymentTransaction,
        wait_validated: bool,
    ) -> Result<SubmitPaymentResponse, (RestError, String)> {
        let client_resource_id = request.client_resource_id.clone();
        let fail = |err: RestError| (err, client_resource_id.clone());

        let fee_drops = self
            .monitor
            .transaction_fee_drops()
            .await
            .map_err(|e| fail(e.into()))?;
        if let Some(max_fee) = request.max_fee.as_deref() {
            let max_fee_drops: i64 = xdv_to_drops(max_fee)
                .map_err(|e| fail(e.into()))?
                .parse()
                .map_err(|_| fail(RestError::invalid_request("Invalid parameter: max_fee")))?;
            if fee_drops > max_fee_drops {
                // Refused before anything reaches the node.
                return Err(fail(RestError::transaction(
                    Some("restMAX_FEE_EXCEEDED".to_string()),
                    format!(
                        "Current network fee of {fee_drops} drops exceeds max_fee of \
                         {max_fee_drops} drops"
                    ),
                )));
            }
        }
        tx.fee = Some(fee_drops.to_string());

        let current_ledger = self
            .monitor
            .current_ledger_index()
            .ok_or_else(|| fail(LedgerError::NotReady.into()))?;
        let last_ledger_sequence = request
            .last_ledger_sequence
            .unwrap_or(current_ledger + self.ledger_horizon);
        tx.last_ledger_sequence = Some(last_ledger_sequence);

        let tx_json = serde_json::to_value(&tx)
            .map_err(|e| fail(RestError::internal(e.to_string())))?;
        let outcome = self
            .client
            .submit(tx_json, &request.secret)
            .await
            .map_err(|e| fail(e.into()))?;

        if is_immediate_rejection(&outcome.engine_result) {
            info!(
                account,
                client_resource_id,
                engine_result = %outcome.engine_result,
                "payment rejected at submission"
            );
            return Err(fail(
                LedgerError::submission(outcome.engine_result, outcome.engine_result_message)
                    .into(),
            ));
        }

        self.record_submitted(account, &client_resource_id, &outcome)
            .await
            .map_err(fail)?;

        // Registered only after the hash is known; the window between
        // submission and registration is closed by the reconcile query below.
        let registration = self.router.register(&outcome.hash, last_ledger_sequence);
        self.reconcile(&outcome.hash).await;

        let mut state = SubmissionState::Pending;
        if wait_validated {
            state = match registration.outcome(self.validation_timeout).await {
                Some(final_outcome) => {
                    record_outcome(&*self.store, account, &client_resource_id, &final_outcome)
                        .await
                        .map_err(fail)?;
                    match final_outcome {
                        FinalOutcome::Validated { .. } => SubmissionState::Validated,
                        FinalOutcome::Failed {
                            engine_result,
                            message,
                            ..
                        } => {
                            return Err(fail(RestError::transaction(
                                Some(engine_result),
                                message,
                            )))
                        }
                        FinalOutcome::Expired { .. } => {
                            return Err(fail(RestError::transaction(
                                Some("tejMaxLedger".to_string()),
                                "Transaction expired: the ledger passed its LastLedgerSequence \
                                 without including it",
                            )))
                        }
                    }
                }
                None => {
                    // Still in flight. The record stays pending; the caller
                    // polls the status URL rather than resubmitting.
                    return Err(fail(RestError::Timeout(format!(
                        "Transaction {} not yet validated. Poll the payment status instead \
                         of resubmitting",
                        outcome.hash
                    ))));
                }
            };
        } else {
            // Keep tracking in the background so the stored record reflects
            // the final disposition even though no caller is waiting.
            let store = Arc::clone(&self.store);
            let account = account.to_string();
            let resource_id = client_resource_id.clone();
            tokio::spawn(async move {
                if let Some(final_outcome) = registration.outcome(BACKGROUND_TRACK_TIMEOUT).await {
                    if let Err(e) =
                        record_outcome(&*store, &account, &resource_id, &final_outcome).await
                    {
                        warn!(
                            account,
                            client_resource_id = resource_id,
                            error = %e,
                            "failed to record a background payment outcome"
                        );
                    }
                }
            });
        }

        Ok(SubmitPaymentResponse {
            success: true,
            client_resource_id: client_resource_id.clone(),
            status_url: format!("/v1/accounts/{account}/payments/{client_resource_id}"),
            hash: outcome.hash,
            state: state.as_str().to_string(),
        })
    }

    /// Look up a payment by transaction hash or client resource id.
    pub async fn get(&self, account: &str, identifier: &str) -> RestResult<PaymentStatus> {
        self.monitor.ensure_ready()?;

        let (hash, record) = if is_valid_hash256(identifier) {
            let record = self.store.find_by_hash(identifier).await?;
            (identifier.to_string(), record)
        } else if is_valid_client_resource_id(identifier) {
            let record = self
                .store
                .get(account, identifier)
                .await?
                .ok_or_else(|| {
                    RestError::not_found(format!("No payment found with identifier '{identifier}'"))
                })?;
            (record.tx_hash.clone(), Some(record))
        } else {
            return Err(RestError::invalid_request(
                "Invalid parameter: identifier. Must be a transaction hash or client_resource_id",
            ));
        };

        let client_resource_id = record
            .as_ref()
            .map(|r| r.client_resource_id.clone())
            .unwrap_or_default();

        if hash.is_empty() {
            // Reserved but never submitted, or submission failed before a
            // hash was assigned.
            let record = record.ok_or_else(|| RestError::not_found("Payment not found"))?;
            return Ok(PaymentStatus {
                success: true,
                payment: Payment {
                    source_account: record.source_account.clone(),
                    ..Payment::default()
                },
                client_resource_id,
                hash: String::new(),
                ledger: None,
                state: record.state.as_str().to_string(),
            });
        }

        let tx = match (self.client.tx(&hash).await, record) {
            (Ok(tx), _) => tx,
            (Err(LedgerError::Node { code, .. }), Some(record)) if code == "txnNotFound" => {
                // Known locally but not (yet) in any ledger the node holds.
                return Ok(PaymentStatus {
                    success: true,
                    payment: Payment {
                        source_account: record.source_account.clone(),
                        ..Payment::default()
                    },
                    client_resource_id,
                    hash,
                    ledger: record.ledger_index.map(|i| i as u64),
                    state: record.state.as_str().to_string(),
                });
            }
            (Err(e), _) => return Err(e.into()),
        };

        if tx.get("TransactionType").and_then(|v| v.as_str()) != Some("Payment") {
            return Err(RestError::not_found(format!(
                "Transaction {hash} is not a payment"
            )));
        }

        let payment = payment_from_tx(&tx)?;
        let validated = tx.get("validated").and_then(|v| v.as_bool()).unwrap_or(false);
        let result = tx
            .pointer("/meta/TransactionResult")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let state = if !validated {
            "pending"
        } else if result == "tesSUCCESS" {
            "validated"
        } else {
            "failed"
        };

        Ok(PaymentStatus {
            success: true,
            payment,
            client_resource_id,
            hash,
            ledger: tx.get("ledger_index").and_then(|v| v.as_u64()),
            state: state.to_string(),
        })
    }

    /// List the validated payments touching an account, in ledger order.
    pub async fn list(
        &self,
        account: &str,
        exclude_failed: bool,
    ) -> RestResult<Vec<AccountPaymentEntry>> {
        self.monitor.ensure_ready()?;

        let mut transactions = self.client.account_tx(account).await?;
        transactions.retain(|tx| {
            tx.get("TransactionType").and_then(|v| v.as_str()) == Some("Payment")
        });
        transactions.sort_by(|a, b| compare_by_ledger_order(a, b));

        let mut entries = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let result = tx
                .pointer("/meta/TransactionResult")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if exclude_failed && result != "tesSUCCESS" {
                continue;
            }
            let hash = tx
                .get("hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let client_resource_id = match self.store.find_by_hash(&hash).await? {
                Some(record) => record.client_resource_id,
                None => String::new(),
            };
            let state = if result == "tesSUCCESS" {
                "validated"
            } else {
                "failed"
            };
            entries.push(AccountPaymentEntry {
                client_resource_id,
                hash,
                ledger: tx.get("ledger_index").and_then(|v| v.as_u64()),
                state: state.to_string(),
                payment: payment_from_tx(tx)?,
            });
        }
        Ok(entries)
    }

    fn validate_submit(&self, account: &str, request: &SubmitPaymentRequest) -> RestResult<()> {
        if request.secret.is_empty() {
            return Err(RestError::invalid_request("Missing parameter: secret"));
        }
        if !is_valid_client_resource_id(&request.client_resource_id) {
            return Err(RestError::invalid_request(
                "Invalid parameter: client_resource_id. Must be printable ASCII and must not \
                 be a transaction hash",
            ));
        }
        let payment = &request.payment;
        if !is_valid_address(&payment.source_account) {
            return Err(RestError::invalid_request(
                "Invalid parameter: source_account. Must be a valid Divvy address",
            ));
        }
        if payment.source_account != account {
            return Err(RestError::invalid_request(
                "Invalid parameter: source_account. Must match the account in the URL",
            ));
        }
        if !is_valid_address(&payment.destination_account) {
            return Err(RestError::invalid_request(
                "Invalid parameter: destination_account. Must be a valid Divvy address",
            ));
        }
        if payment.destination_amount.value.is_empty() {
            return Err(RestError::invalid_request(
                "Missing parameter: destination_amount",
            ));
        }
        if BigDecimal::from_str(payment.destination_amount.value.trim())
            .map(|v| v <= BigDecimal::from(0))
            .unwrap_or(true)
        {
            return Err(RestError::invalid_request(
                "Invalid parameter: destination_amount. Must be a positive amount",
            ));
        }
        Ok(())
    }

    async fn record_submitted(
        &self,
        account: &str,
        client_resource_id: &str,
        outcome: &SubmitOutcome,
    ) -> RestResult<()> {
        let mut record = self
            .store
            .get(account, client_resource_id)
            .await?
            .unwrap_or_else(|| {
                crate::database::SubmissionRecord::pending(account, client_resource_id)
            });
        record.tx_hash = outcome.hash.clone();
        record.engine_result = Some(outcome.engine_result.clone());
        record.result_message = Some(outcome.engine_result_message.clone());
        self.store.put(&record).await?;
        debug!(
            account,
            client_resource_id,
            hash = %outcome.hash,
            engine_result = %outcome.engine_result,
            "payment provisionally accepted"
        );
        Ok(())
    }

    async fn mark_failed(&self, account: &str, client_resource_id: &str, err: &RestError) {
        // A timeout leaves the outcome unknown. The record stays pending so
        // the identifier cannot be reused while the transaction is in flight.
        if matches!(err, RestError::Timeout(_)) {
            return;
        }
        if let Err(store_err) = record_final(
            &*self.store,
            account,
            client_resource_id,
            SubmissionState::Failed,
            None,
            err.error_code(),
            Some(err.to_string()),
        )
        .await
        {
            warn!(
                account,
                client_resource_id,
                error = %store_err,
                "failed to record a failed submission"
            );
        }
    }

    /// Close the race between submission and waiter registration: if the
    /// transaction validated before the waiter existed, learn that from a
    /// direct query and resolve the waiter by hand.
    async fn reconcile(&self, hash: &str) {
        match self.client.tx(hash).await {
            Ok(tx) => {
                if tx.get("validated").and_then(|v| v.as_bool()) == Some(true) {
                    let engine_result = tx
                        .pointer("/meta/TransactionResult")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let ledger_index = tx.get("ledger_index").and_then(|v| v.as_u64());
                    self.router
                        .resolve(hash, engine_result, String::new(), ledger_index);
                }
            }
            Err(LedgerError::Node { ref code, .. }) if code == "txnNotFound" => {
                // Expected for a transaction still in flight.
            }
            Err(e) => debug!(hash, error = %e, "reconcile query failed"),
        }
    }
}

async fn record_final(
    store: &dyn RecordStore,
    account: &str,
    client_resource_id: &str,
    state: SubmissionState,
    ledger_index: Option<u64>,
    engine_result: Option<String>,
    message: Option<String>,
) -> RestResult<()> {
    let Some(mut record) = store.get(account, client_resource_id).await? else {
        return Ok(());
    };
    record.state = state;
    // A later write without a ledger index must not wipe one already stored.
    if ledger_index.is_some() {
        record.ledger_index = ledger_index.map(|i| i as i64);
    }
    if engine_result.is_some() {
        record.engine_result = engine_result;
    }
    if message.is_some() {
        record.result_message = message;
    }
    store.put(&record).await?;
    Ok(())
}

async fn record_outcome(
    store: &dyn RecordStore,
    account: &str,
    client_resource_id: &str,
    outcome: &FinalOutcome,
) -> RestResult<()> {
    match outcome {
        FinalOutcome::Validated { ledger_index } => {
            record_final(
                store,
                account,
                client_resource_id,
                SubmissionState::Validated,
                *ledger_index,
                Some("tesSUCCESS".to_string()),
                None,
            )
            .await
        }
        FinalOutcome::Failed {
            engine_result,
            message,
            ledger_index,
        } => {
            record_final(
                store,
                account,
                client_resource_id,
                SubmissionState::Failed,
                *ledger_index,
                Some(engine_result.clone()),
                Some(message.clone()),
            )
            .await
        }
        FinalOutcome::Expired { ledger_index } => {
            record_final(
                store,
                account,
                client_resource_id,
                SubmissionState::Failed,
                Some(*ledger_index),
                None,
                Some("Transaction expired before validation".to_string()),
            )
            .await
        }
    }
}

/// Rebuild the flattened REST payment from a divvyd transaction.
pub fn payment_from_tx(tx: &JsonValue) -> RestResult<Payment> {
    let flags = tx.get("Flags").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let source_amount = match tx.get("SendMax") {
        Some(send_max) => Some(from_wire_amount(send_max)?),
        None => None,
    };
    let destination_amount = from_wire_amount(
        tx.get("Amount")
            .ok_or_else(|| RestError::internal("transaction missing Amount"))?,
    )?;

    Ok(Payment {
        source_account: tx
            .get("Account")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        destination_account: tx
            .get("Destination")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        source_amount,
        source_slippage: None,
        destination_amount,
        source_tag: tx
            .get("SourceTag")
            .and_then(|v| v.as_u64())
            .map(|t| t.to_string())
            .unwrap_or_default(),
        destination_tag: tx
            .get("DestinationTag")
            .and_then(|v| v.as_u64())
            .map(|t| t.to_string())
            .unwrap_or_default(),
        invoice_id: tx
            .get("InvoiceID")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        paths: tx.get("Paths").cloned(),
        memos: tx.get("Memos").cloned(),
        partial_payment: flags & TF_PARTIAL_PAYMENT != 0,
        no_direct_divvy: flags & TF_NO_DIVVY_DIRECT != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryRecordStore;
    use crate::divvyd::testing::{mock_connection, ok_response};
    use crate::divvyd::types::Amount;
    use crate::divvyd::NodeConnection;
    use serde_json::json;

    const ALICE: &str = "rKXCummUHnenhYudNb9UoJ4mGBR75vFcgz";
    const BOB: &str = "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ";
    const HASH: &str = "F4AB442A6D4CBB935D66E1DA7309A5FC71C7143ED4049053EC14E3875B0CF9BF";

    fn ready(connection: &Arc<NodeConnection>) {
        connection.update_state(|state| {
            state.current_ledger_index = Some(100);
            state.standalone = true;
        });
    }

    fn service_for(connection: &Arc<NodeConnection>) -> (PaymentService, ConfirmationRouter) {
        let client = NodeClient::new(Arc::clone(connection), Duration::from_secs(5));
        let monitor = Arc::new(ConnectionMonitor::new(Arc::clone(connection), client.clone()));
        let router = ConfirmationRouter::new();
        tokio::spawn(router.clone().run(connection.subscribe_events()));
        let service = PaymentService::new(
            client,
            monitor,
            router.clone(),
            Arc::new(MemoryRecordStore::new()),
            DEFAULT_LEDGER_HORIZON,
            Duration::from_secs(2),
        );
        (service, router)
    }

    fn submit_request() -> SubmitPaymentRequest {
        SubmitPaymentRequest {
            secret: "shhh".to_string(),
            client_resource_id: "payment-1".to_string(),
            payment: Payment {
                source_account: ALICE.to_string(),
                destination_account: BOB.to_string(),
                destination_amount: Amount::native("1"),
                ..Payment::default()
            },
            max_fee: None,
            last_ledger_sequence: None,
        }
    }

    fn upstream_responder(id: u64, command: &str, params: &JsonValue) -> Option<JsonValue> {
        match command {
            "server_info" => Some(ok_response(
                id,
                json!({"info": {
                    "validated_ledger": {"base_fee_xdv": 0.00001},
                    "load_factor": 1.0,
                }}),
            )),
            "submit" => {
                assert_eq!(params["secret"], "shhh");
                assert_eq!(params["tx_json"]["Fee"], "10");
                assert_eq!(params["tx_json"]["LastLedgerSequence"], 108);
                Some(ok_response(
                    id,
                    json!({
                        "engine_result": "tesSUCCESS",
                        "engine_result_message": "The transaction was applied.",
                        "tx_json": {"hash": HASH},
                    }),
                ))
            }
            "tx" => Some(ok_response(id, json!({"validated": false}))),
            other => panic!("unexpected command {other}"),
        }
    }

    #[tokio::test]
    async fn submit_without_wait_returns_pending() {
        let (connection, _handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let response = service.submit(ALICE, submit_request(), false).await.unwrap();
        assert!(response.success);
        assert_eq!(response.state, "pending");
        assert_eq!(response.hash, HASH);
        assert_eq!(
            response.status_url,
            format!("/v1/accounts/{ALICE}/payments/payment-1")
        );
    }

    #[tokio::test]
    async fn submit_with_wait_resolves_on_validation_event() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let submit = service.submit(ALICE, submit_request(), true);
        let validate = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle
                .emit(json!({
                    "type": "transaction",
                    "validated": true,
                    "engine_result": "tesSUCCESS",
                    "engine_result_message": "The transaction was applied.",
                    "ledger_index": 101,
                    "transaction": {"hash": HASH},
                }))
                .await;
        };
        let (response, ()) = tokio::join!(submit, validate);

        let response = response.unwrap();
        assert_eq!(response.state, "validated");
    }

    #[tokio::test]
    async fn max_fee_below_network_fee_refuses_without_submitting() {
        let (connection, handle) = mock_connection(|id, command, _| match command {
            "server_info" => Some(ok_response(
                id,
                json!({"info": {
                    "validated_ledger": {"base_fee_xdv": 0.00001},
                    "load_factor": 256.0,
                }}),
            )),
            other => panic!("unexpected command {other}"),
        });
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let mut request = submit_request();
        request.max_fee = Some("0.000015".to_string());
        let err = service.submit(ALICE, request, false).await.unwrap_err();
        match err {
            RestError::Transaction { code, .. } => {
                assert_eq!(code.as_deref(), Some("restMAX_FEE_EXCEEDED"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The fee check fired before any submit command went upstream.
        assert!(!handle.sent_commands().iter().any(|c| c == "submit"));
    }

    #[tokio::test]
    async fn max_fee_above_network_fee_submits_with_the_computed_fee() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let mut request = submit_request();
        // 1 XDV ceiling, well above the 10-drop network fee.
        request.max_fee = Some("1".to_string());
        let response = service.submit(ALICE, request, false).await.unwrap();
        assert_eq!(response.state, "pending");

        let submit = handle.last_sent("submit").unwrap();
        assert_eq!(submit["tx_json"]["Fee"], "10");
    }

    #[tokio::test]
    async fn duplicate_identifier_never_reaches_the_node() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        service.submit(ALICE, submit_request(), false).await.unwrap();
        let err = service.submit(ALICE, submit_request(), false).await.unwrap_err();
        assert!(matches!(err, RestError::Duplicate(_)));

        let submits = handle
            .sent_commands()
            .iter()
            .filter(|c| c.as_str() == "submit")
            .count();
        assert_eq!(submits, 1);
    }

    #[tokio::test]
    async fn immediate_rejection_is_terminal() {
        let (connection, _handle) = mock_connection(|id, command, _| match command {
            "server_info" => Some(ok_response(
                id,
                json!({"info": {
                    "validated_ledger": {"base_fee_xdv": 0.00001},
                    "load_factor": 1.0,
                }}),
            )),
            "submit" => Some(ok_response(
                id,
                json!({
                    "engine_result": "temBAD_AMOUNT",
                    "engine_result_message": "Malformed: Bad amount.",
                    "tx_json": {"hash": HASH},
                }),
            )),
            other => panic!("unexpected command {other}"),
        });
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let err = service.submit(ALICE, submit_request(), false).await.unwrap_err();
        match err {
            RestError::Transaction { code, .. } => {
                assert_eq!(code.as_deref(), Some("temBAD_AMOUNT"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_identifier_can_be_retried() {
        let submitted = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let submitted_in = Arc::clone(&submitted);
        let (connection, _handle) = mock_connection(move |id, command, _| match command {
            "server_info" => Some(ok_response(
                id,
                json!({"info": {
                    "validated_ledger": {"base_fee_xdv": 0.00001},
                    "load_factor": 1.0,
                }}),
            )),
            "submit" => {
                let attempt =
                    submitted_in.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if attempt == 0 {
                    Some(ok_response(
                        id,
                        json!({
                            "engine_result": "telINSUF_FEE_P",
                            "engine_result_message": "Fee insufficient.",
                            "tx_json": {"hash": HASH},
                        }),
                    ))
                } else {
                    Some(ok_response(
                        id,
                        json!({
                            "engine_result": "tesSUCCESS",
                            "engine_result_message": "The transaction was applied.",
                            "tx_json": {"hash": HASH},
                        }),
                    ))
                }
            }
            "tx" => Some(ok_response(id, json!({"validated": false}))),
            other => panic!("unexpected command {other}"),
        });
        ready(&connection);
        let (service, _router) = service_for(&connection);

        assert!(service.submit(ALICE, submit_request(), false).await.is_err());
        let response = service.submit(ALICE, submit_request(), false).await.unwrap();
        assert_eq!(response.state, "pending");
    }

    #[tokio::test]
    async fn failed_wait_keeps_the_ledger_index() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let submit = service.submit(ALICE, submit_request(), true);
        let validate = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle
                .emit(json!({
                    "type": "transaction",
                    "validated": true,
                    "engine_result": "tecPATH_DRY",
                    "engine_result_message": "Path could not send partial amount.",
                    "ledger_index": 101,
                    "transaction": {"hash": HASH},
                }))
                .await;
        };
        let (result, ()) = tokio::join!(submit, validate);
        assert!(result.is_err());

        let record = service
            .store
            .get(ALICE, "payment-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, SubmissionState::Failed);
        assert_eq!(record.ledger_index, Some(101));
    }

    #[tokio::test]
    async fn listing_orders_payments_by_ledger() {
        const EARLY: &str = "0000442A6D4CBB935D66E1DA7309A5FC71C7143ED4049053EC14E3875B0CF9BF";
        let (connection, _handle) = mock_connection(move |id, command, params| {
            assert_eq!(command, "account_tx");
            assert_eq!(params["account"], ALICE);
            Some(ok_response(
                id,
                json!({"transactions": [
                    {
                        "tx": {
                            "TransactionType": "Payment",
                            "Account": ALICE,
                            "Destination": BOB,
                            "Amount": "2000000",
                            "hash": HASH,
                            "ledger_index": 7,
                        },
                        "meta": {"TransactionIndex": 2, "TransactionResult": "tecPATH_DRY"},
                        "validated": true,
                    },
                    {
                        "tx": {
                            "TransactionType": "Payment",
                            "Account": ALICE,
                            "Destination": BOB,
                            "Amount": "1000000",
                            "hash": EARLY,
                            "ledger_index": 5,
                        },
                        "meta": {"TransactionIndex": 0, "TransactionResult": "tesSUCCESS"},
                        "validated": true,
                    },
                    {
                        "tx": {
                            "TransactionType": "OfferCreate",
                            "Account": ALICE,
                            "hash": "AB".repeat(32),
                            "ledger_index": 6,
                        },
                        "meta": {"TransactionIndex": 1, "TransactionResult": "tesSUCCESS"},
                        "validated": true,
                    },
                ]}),
            ))
        });
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let entries = service.list(ALICE, false).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].hash, EARLY);
        assert_eq!(entries[0].state, "validated");
        assert_eq!(entries[1].hash, HASH);
        assert_eq!(entries[1].state, "failed");
        assert_eq!(entries[1].ledger, Some(7));

        let validated_only = service.list(ALICE, true).await.unwrap();
        assert_eq!(validated_only.len(), 1);
        assert_eq!(validated_only[0].hash, EARLY);
    }

    #[tokio::test]
    async fn expiry_past_the_horizon_fails_the_wait() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let submit = service.submit(ALICE, submit_request(), true);
        let expire = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            // LastLedgerSequence is 108; ledger 109 closes without the
            // transaction.
            handle
                .emit(json!({"type": "ledgerClosed", "ledger_index": 109}))
                .await;
        };
        let (result, ()) = tokio::join!(submit, expire);

        match result.unwrap_err() {
            RestError::Transaction { code, .. } => {
                assert_eq!(code.as_deref(), Some("tejMaxLedger"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_rejects_mismatched_source_account() {
        let (connection, handle) = mock_connection(upstream_responder);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let err = service.submit(BOB, submit_request(), false).await.unwrap_err();
        assert!(matches!(err, RestError::InvalidRequest(_)));
        assert!(handle.sent_commands().is_empty());
    }

    #[tokio::test]
    async fn get_by_hash_formats_the_payment() {
        let (connection, _handle) = mock_connection(move |id, command, params| {
            assert_eq!(command, "tx");
            assert_eq!(params["transaction"], HASH);
            Some(ok_response(
                id,
                json!({
                    "TransactionType": "Payment",
                    "Account": ALICE,
                    "Destination": BOB,
                    "Amount": "1000000",
                    "DestinationTag": 99,
                    "Flags": 131072u32,
                    "validated": true,
                    "ledger_index": 101,
                    "meta": {"TransactionResult": "tesSUCCESS"},
                }),
            ))
        });
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let status = service.get(ALICE, HASH).await.unwrap();
        assert_eq!(status.state, "validated");
        assert_eq!(status.ledger, Some(101));
        assert_eq!(status.payment.destination_amount, Amount::native("1"));
        assert_eq!(status.payment.destination_tag, "99");
        assert!(status.payment.partial_payment);
    }

    #[tokio::test]
    async fn get_unknown_resource_id_is_not_found() {
        let (connection, _handle) = mock_connection(|_, _, _| None);
        ready(&connection);
        let (service, _router) = service_for(&connection);

        let err = service.get(ALICE, "no-such-payment").await.unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));
    }
}
