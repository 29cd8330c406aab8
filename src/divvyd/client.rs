//! Typed commands over the multiplexed divvyd connection.

use crate::divvyd::connection::NodeConnection;
use crate::divvyd::errors::{LedgerError, LedgerResult};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Preliminary result of a `submit` command.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub hash: String,
    pub engine_result: String,
    pub engine_result_message: String,
}

#[derive(Clone)]
pub struct NodeClient {
    connection: Arc<NodeConnection>,
    request_timeout: Duration,
}

impl NodeClient {
    pub fn new(connection: Arc<NodeConnection>, request_timeout: Duration) -> Self {
        Self {
            connection,
            request_timeout,
        }
    }

    pub fn connection(&self) -> &Arc<NodeConnection> {
        &self.connection
    }

    /// Subscribe to the ledger and transaction streams and seed the current
    /// ledger index from the response.
    pub async fn subscribe_streams(&self) -> LedgerResult<()> {
        let result = self
            .request("subscribe", json!({"streams": ["ledger", "transactions"]}))
            .await?;
        if let Some(ledger_index) = result.get("ledger_index").and_then(|v| v.as_u64()) {
            self.connection.update_state(|state| {
                state.current_ledger_index = Some(ledger_index);
                state.last_ledger_close = Some(std::time::Instant::now());
            });
            info!(ledger_index, "subscribed to divvyd streams");
        } else {
            debug!("subscribe response carried no ledger_index");
        }
        Ok(())
    }

    pub async fn ping(&self) -> LedgerResult<()> {
        self.request("ping", json!({})).await.map(|_| ())
    }

    pub async fn server_info(&self) -> LedgerResult<JsonValue> {
        let result = self.request("server_info", json!({})).await?;
        result
            .get("info")
            .cloned()
            .ok_or_else(|| LedgerError::protocol("server_info response missing info"))
    }

    pub async fn account_info(&self, account: &str) -> LedgerResult<JsonValue> {
        let result = self
            .request(
                "account_info",
                json!({"account": account, "ledger_index": "validated"}),
            )
            .await?;
        result
            .get("account_data")
            .cloned()
            .ok_or_else(|| LedgerError::protocol("account_info response missing account_data"))
    }

    pub async fn account_lines(
        &self,
        account: &str,
        peer: Option<&str>,
    ) -> LedgerResult<Vec<JsonValue>> {
        let mut params = json!({"account": account, "ledger_index": "validated"});
        if let Some(peer) = peer {
            params["peer"] = json!(peer);
        }
        let result = self.request("account_lines", params).await?;
        Ok(result
            .get("lines")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn account_offers(&self, account: &str) -> LedgerResult<Vec<JsonValue>> {
        let result = self
            .request("account_offers", json!({"account": account}))
            .await?;
        Ok(result
            .get("offers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn book_offers(
        &self,
        taker_gets: JsonValue,
        taker_pays: JsonValue,
    ) -> LedgerResult<Vec<JsonValue>> {
        let result = self
            .request(
                "book_offers",
                json!({"taker_gets": taker_gets, "taker_pays": taker_pays}),
            )
            .await?;
        Ok(result
            .get("offers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn path_find(
        &self,
        source_account: &str,
        destination_account: &str,
        destination_amount: JsonValue,
        source_currencies: Option<JsonValue>,
    ) -> LedgerResult<Vec<JsonValue>> {
        let mut params = json!({
            "source_account": source_account,
            "destination_account": destination_account,
            "destination_amount": destination_amount,
        });
        if let Some(currencies) = source_currencies {
            params["source_currencies"] = currencies;
        }
        let result = self.request("divvy_path_find", params).await?;
        Ok(result
            .get("alternatives")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn tx(&self, hash: &str) -> LedgerResult<JsonValue> {
        self.request("tx", json!({"transaction": hash})).await
    }

    /// Validated transactions touching an account, over the whole ledger
    /// range the node holds. Each entry comes back as the transaction with
    /// its metadata and validated flag inlined, the same shape `tx` returns.
    pub async fn account_tx(&self, account: &str) -> LedgerResult<Vec<JsonValue>> {
        let result = self
            .request(
                "account_tx",
                json!({
                    "account": account,
                    "ledger_index_min": -1,
                    "ledger_index_max": -1,
                    "binary": false,
                    "limit": 200,
                }),
            )
            .await?;
        let entries = result
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut transactions = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(JsonValue::Object(mut tx)) = entry.get("tx").cloned() else {
                continue;
            };
            if let Some(meta) = entry.get("meta") {
                tx.insert("meta".to_string(), meta.clone());
            }
            if let Some(validated) = entry.get("validated") {
                tx.insert("validated".to_string(), validated.clone());
            }
            transactions.push(JsonValue::Object(tx));
        }
        Ok(transactions)
    }

    /// Sign-and-submit a transaction. The secret never leaves the submit
    /// command; signing itself happens on the node.
    pub async fn submit(&self, tx_json: JsonValue, secret: &str) -> LedgerResult<SubmitOutcome> {
        let result = self
            .request("submit", json!({"tx_json": tx_json, "secret": secret}))
            .await?;

        let engine_result = result
            .get("engine_result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::protocol("submit response missing engine_result"))?
            .to_string();
        let engine_result_message = result
            .get("engine_result_message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let hash = result
            .pointer("/tx_json/hash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LedgerError::protocol("submit response missing transaction hash"))?
            .to_string();

        debug!(%hash, %engine_result, "divvyd accepted submit command");
        Ok(SubmitOutcome {
            hash,
            engine_result,
            engine_result_message,
        })
    }

    async fn request(&self, command: &str, params: JsonValue) -> LedgerResult<JsonValue> {
        self.connection
            .request(command, params, self.request_timeout)
            .await
    }
}
