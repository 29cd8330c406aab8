//! Payment submission, retrieval and path-finding endpoints.

use crate::api::accounts::validate_account;
use crate::api::AppState;
use crate::divvyd::amount::{parse_amount_query, to_wire_amount};
use crate::divvyd::types::{is_valid_address, is_valid_currency, Amount, Payment};
use crate::error::{RestError, RestResult};
use crate::services::payments::{AccountPaymentEntry, PaymentStatus, SubmitPaymentResponse};
use crate::services::SubmitPaymentRequest;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// With `validated=true` the response waits for final validation.
    #[serde(default)]
    pub validated: bool,
}

/// POST /v1/accounts/{account}/payments
pub async fn submit_payment(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<SubmitQuery>,
    Json(request): Json<SubmitPaymentRequest>,
) -> RestResult<(StatusCode, Json<SubmitPaymentResponse>)> {
    validate_account(&account)?;
    let response = state
        .payments
        .submit(&account, request, query.validated)
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    /// With `exclude_failed=true` only payments that made it into a ledger
    /// with `tesSUCCESS` are returned.
    #[serde(default)]
    pub exclude_failed: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountPaymentsResponse {
    pub success: bool,
    pub payments: Vec<AccountPaymentEntry>,
}

/// GET /v1/accounts/{account}/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<ListPaymentsQuery>,
) -> RestResult<Json<AccountPaymentsResponse>> {
    validate_account(&account)?;
    let payments = state.payments.list(&account, query.exclude_failed).await?;
    Ok(Json(AccountPaymentsResponse {
        success: true,
        payments,
    }))
}

/// GET /v1/accounts/{account}/payments/{identifier}
///
/// The identifier is a transaction hash or a client resource id.
pub async fn get_payment(
    State(state): State<AppState>,
    Path((account, identifier)): Path<(String, String)>,
) -> RestResult<Json<PaymentStatus>> {
    validate_account(&account)?;
    let status = state.payments.get(&account, &identifier).await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct PathfindQuery {
    /// Comma-separated `currency+counterparty` entries restricting which
    /// source currencies to consider.
    pub source_currencies: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PathfindResponse {
    pub success: bool,
    pub payments: Vec<Payment>,
}

/// GET /v1/accounts/{account}/payments/paths/{destination}/{destination_amount}
///
/// Each alternative comes back as a ready-to-submit payment whose paths are
/// JSON-encoded, so it can be posted back unchanged.
pub async fn find_paths(
    State(state): State<AppState>,
    Path((account, destination, destination_amount)): Path<(String, String, String)>,
    Query(query): Query<PathfindQuery>,
) -> RestResult<Json<PathfindResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    validate_account(&account)?;
    if !is_valid_address(&destination) {
        return Err(RestError::invalid_request(
            "Invalid parameter: destination_account. Must be a valid Divvy address",
        ));
    }

    let amount = destination_amount_from_path(&destination, &destination_amount)?;
    let wire_amount = serde_json::to_value(to_wire_amount(&amount)?)
        .map_err(|e| RestError::internal(e.to_string()))?;
    let source_currencies = source_currencies_param(query.source_currencies.as_deref())?;

    let alternatives = state
        .client
        .path_find(&account, &destination, wire_amount, source_currencies)
        .await?;

    let mut payments = Vec::with_capacity(alternatives.len());
    for alternative in &alternatives {
        payments.push(payment_from_alternative(
            &account,
            &destination,
            &amount,
            alternative,
        )?);
    }

    Ok(Json(PathfindResponse {
        success: true,
        payments,
    }))
}

fn destination_amount_from_path(destination: &str, raw: &str) -> RestResult<Amount> {
    let parsed = parse_amount_query(raw);
    let value = parsed.value.filter(|v| !v.is_empty()).ok_or_else(|| {
        RestError::invalid_request(
            "Invalid parameter: destination_amount. Must be in the form \
             value+currency+counterparty",
        )
    })?;
    if !is_valid_currency(&parsed.currency) {
        return Err(RestError::invalid_request(
            "Invalid parameter: destination_amount. Invalid currency code",
        ));
    }
    let currency = parsed.currency.to_uppercase();
    let issuer = if parsed.counterparty.is_empty() {
        // An issued amount without a counterparty means "any issuer the
        // destination accepts".
        if currency == crate::divvyd::types::NATIVE_CURRENCY {
            String::new()
        } else {
            destination.to_string()
        }
    } else if is_valid_address(&parsed.counterparty) {
        parsed.counterparty
    } else {
        return Err(RestError::invalid_request(
            "Invalid parameter: destination_amount. Invalid counterparty address",
        ));
    };
    Ok(Amount {
        currency,
        value,
        issuer,
    })
}

fn source_currencies_param(raw: Option<&str>) -> RestResult<Option<JsonValue>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut entries = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = parse_amount_query(entry);
        if parsed.value.is_some() || !is_valid_currency(&parsed.currency) {
            return Err(RestError::invalid_request(
                "Invalid parameter: source_currencies. Must be a comma-separated list of \
                 currency+counterparty entries",
            ));
        }
        let mut spec = json!({"currency": parsed.currency.to_uppercase()});
        if !parsed.counterparty.is_empty() {
            if !is_valid_address(&parsed.counterparty) {
                return Err(RestError::invalid_request(
                    "Invalid parameter: source_currencies. Invalid counterparty address",
                ));
            }
            spec["issuer"] = json!(parsed.counterparty);
        }
        entries.push(spec);
    }
    if entries.is_empty() {
        return Err(RestError::invalid_request(
            "Invalid parameter: source_currencies. Must not be empty",
        ));
    }
    Ok(Some(JsonValue::Array(entries)))
}

fn payment_from_alternative(
    account: &str,
    destination: &str,
    destination_amount: &Amount,
    alternative: &JsonValue,
) -> RestResult<Payment> {
    let source_amount = alternative
        .get("source_amount")
        .ok_or_else(|| RestError::internal("path alternative missing source_amount"))?;
    let paths = alternative
        .get("paths_computed")
        .cloned()
        .unwrap_or_else(|| json!([]));

    Ok(Payment {
        source_account: account.to_string(),
        destination_account: destination.to_string(),
        source_amount: Some(crate::divvyd::amount::from_wire_amount(source_amount)?),
        source_slippage: None,
        destination_amount: destination_amount.clone(),
        source_tag: String::new(),
        destination_tag: String::new(),
        invoice_id: String::new(),
        // JSON-encoded so the payment can round-trip through a submission
        // body unchanged.
        paths: Some(JsonValue::String(paths.to_string())),
        memos: None,
        partial_payment: false,
        no_direct_divvy: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOB: &str = "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ";

    #[test]
    fn destination_amount_requires_a_value() {
        assert!(destination_amount_from_path(BOB, "USD+rX").is_err());
        assert!(destination_amount_from_path(BOB, "").is_err());
    }

    #[test]
    fn destination_amount_native() {
        let amount = destination_amount_from_path(BOB, "429+XDV").unwrap();
        assert_eq!(amount, Amount::native("429"));
    }

    #[test]
    fn destination_amount_issued_defaults_issuer_to_destination() {
        let amount = destination_amount_from_path(BOB, "10.5+usd").unwrap();
        assert_eq!(amount, Amount::issued("10.5", "USD", BOB));
    }

    #[test]
    fn source_currencies_parse() {
        let parsed = source_currencies_param(Some(&format!("USD+{BOB}, xdv"))).unwrap().unwrap();
        assert_eq!(
            parsed,
            json!([
                {"currency": "USD", "issuer": BOB},
                {"currency": "XDV"},
            ])
        );

        assert!(source_currencies_param(Some("")).is_err());
        assert!(source_currencies_param(Some("10+USD")).is_err());
        assert!(source_currencies_param(None).unwrap().is_none());
    }

    #[test]
    fn alternative_becomes_a_submittable_payment() {
        let alternative = json!({
            "source_amount": "1000000",
            "paths_computed": [[{"currency": "USD", "issuer": BOB}]],
        });
        let destination_amount = Amount::issued("10", "USD", BOB);
        let payment = payment_from_alternative(
            "rKXCummUHnenhYudNb9UoJ4mGBR75vFcgz",
            BOB,
            &destination_amount,
            &alternative,
        )
        .unwrap();

        assert_eq!(payment.source_amount, Some(Amount::native("1")));
        // Paths survive as a JSON string the assembler will re-parse.
        let paths = payment.paths.unwrap();
        let encoded = paths.as_str().unwrap();
        assert_eq!(
            serde_json::from_str::<JsonValue>(encoded).unwrap(),
            json!([[{"currency": "USD", "issuer": BOB}]])
        );
    }
}
