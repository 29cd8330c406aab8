//! Account balances and trust lines.

use crate::api::AppState;
use crate::divvyd::amount::drops_to_xdv;
use crate::divvyd::types::{is_valid_address, is_valid_currency, NATIVE_CURRENCY};
use crate::error::{RestError, RestResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Deserialize)]
pub struct BalancesQuery {
    pub currency: Option<String>,
    pub counterparty: Option<String>,
}

/// One balance in the REST shape: the peer side of a trust line is named
/// `counterparty`, and the native balance has an empty one.
#[derive(Debug, Serialize, PartialEq)]
pub struct Balance {
    pub value: String,
    pub currency: String,
    pub counterparty: String,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub success: bool,
    pub balances: Vec<Balance>,
}

/// GET /v1/accounts/{account}/balances
pub async fn balances(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<BalancesQuery>,
) -> RestResult<Json<BalancesResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    validate_account(&account)?;
    let currency_filter = validate_currency_filter(query.currency.as_deref())?;
    let counterparty_filter = match query.counterparty.as_deref() {
        Some(counterparty) if !is_valid_address(counterparty) => {
            return Err(RestError::invalid_request(
                "Invalid parameter: counterparty. Must be a valid Divvy address",
            ))
        }
        other => other,
    };

    let mut balances = Vec::new();

    // The native balance lives on the account root, not on a trust line, so
    // it only appears for unfiltered or XDV-filtered queries.
    let include_native = counterparty_filter.is_none()
        && currency_filter.map_or(true, |c| c == NATIVE_CURRENCY);
    if include_native {
        let account_data = state.client.account_info(&account).await?;
        let drops = account_data
            .get("Balance")
            .and_then(|v| v.as_str())
            .unwrap_or("0");
        balances.push(Balance {
            value: drops_to_xdv(drops)?,
            currency: NATIVE_CURRENCY.to_string(),
            counterparty: String::new(),
        });
    }

    if currency_filter != Some(NATIVE_CURRENCY) {
        let lines = state
            .client
            .account_lines(&account, counterparty_filter)
            .await?;
        for line in &lines {
            let currency = line_str(line, "currency");
            if let Some(filter) = currency_filter {
                if currency != filter {
                    continue;
                }
            }
            balances.push(Balance {
                value: line_str(line, "balance"),
                currency,
                counterparty: line_str(line, "account"),
            });
        }
    }

    Ok(Json(BalancesResponse {
        success: true,
        balances,
    }))
}

#[derive(Debug, Serialize)]
pub struct Trustline {
    pub account: String,
    pub counterparty: String,
    pub currency: String,
    pub limit: String,
    pub reciprocated_limit: String,
    pub balance: String,
    pub no_divvy: bool,
}

#[derive(Debug, Serialize)]
pub struct TrustlinesResponse {
    pub success: bool,
    pub trustlines: Vec<Trustline>,
}

/// GET /v1/accounts/{account}/trustlines
pub async fn trustlines(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<BalancesQuery>,
) -> RestResult<Json<TrustlinesResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    validate_account(&account)?;
    let currency_filter = validate_currency_filter(query.currency.as_deref())?;
    if let Some(counterparty) = query.counterparty.as_deref() {
        if !is_valid_address(counterparty) {
            return Err(RestError::invalid_request(
                "Invalid parameter: counterparty. Must be a valid Divvy address",
            ));
        }
    }

    let lines = state
        .client
        .account_lines(&account, query.counterparty.as_deref())
        .await?;
    let trustlines = lines
        .iter()
        .filter(|line| {
            currency_filter.map_or(true, |filter| line_str(line, "currency") == filter)
        })
        .map(|line| Trustline {
            account: account.clone(),
            counterparty: line_str(line, "account"),
            currency: line_str(line, "currency"),
            limit: line_str(line, "limit"),
            reciprocated_limit: line_str(line, "limit_peer"),
            balance: line_str(line, "balance"),
            no_divvy: line.get("no_divvy").and_then(|v| v.as_bool()).unwrap_or(false),
        })
        .collect();

    Ok(Json(TrustlinesResponse {
        success: true,
        trustlines,
    }))
}

pub(crate) fn validate_account(account: &str) -> RestResult<()> {
    if is_valid_address(account) {
        Ok(())
    } else {
        Err(RestError::invalid_request(
            "Invalid parameter: account. Must be a valid Divvy address",
        ))
    }
}

fn validate_currency_filter(currency: Option<&str>) -> RestResult<Option<&str>> {
    match currency {
        Some(currency) if !is_valid_currency(currency) => Err(RestError::invalid_request(
            "Invalid parameter: currency. Must be a valid currency code",
        )),
        other => Ok(other),
    }
}

fn line_str(line: &JsonValue, field: &str) -> String {
    line.get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
