//! Open orders and order books.

use crate::api::accounts::validate_account;
use crate::api::AppState;
use crate::divvyd::amount::{from_wire_amount, parse_amount_query};
use crate::divvyd::types::{is_valid_address, is_valid_currency, Amount, NATIVE_CURRENCY};
use crate::error::{RestError, RestResult};
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

const OFFER_FLAG_SELL: u64 = 0x0002_0000;
const OFFER_FLAG_PASSIVE: u64 = 0x0001_0000;

#[derive(Debug, Serialize)]
pub struct Order {
    /// "buy" if the offer holder is buying the taker-gets side.
    #[serde(rename = "type")]
    pub order_type: String,
    pub sequence: u64,
    pub taker_gets: Amount,
    pub taker_pays: Amount,
    pub passive: bool,
}

#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    pub success: bool,
    pub orders: Vec<Order>,
}

/// GET /v1/accounts/{account}/orders
pub async fn account_orders(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> RestResult<Json<OrdersResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    validate_account(&account)?;

    let offers = state.client.account_offers(&account).await?;
    let mut orders = Vec::with_capacity(offers.len());
    for offer in &offers {
        let flags = offer.get("flags").and_then(|v| v.as_u64()).unwrap_or(0);
        orders.push(Order {
            order_type: if flags & OFFER_FLAG_SELL != 0 {
                "sell".to_string()
            } else {
                "buy".to_string()
            },
            sequence: offer.get("seq").and_then(|v| v.as_u64()).unwrap_or(0),
            taker_gets: wire_field(offer, "taker_gets")?,
            taker_pays: wire_field(offer, "taker_pays")?,
            passive: flags & OFFER_FLAG_PASSIVE != 0,
        });
    }

    Ok(Json(OrdersResponse {
        success: true,
        orders,
    }))
}

#[derive(Debug, Serialize)]
pub struct BookEntry {
    pub account: String,
    pub taker_gets: Amount,
    pub taker_pays: Amount,
}

#[derive(Debug, Serialize)]
pub struct OrderbookResponse {
    pub success: bool,
    pub order_book: String,
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
}

/// GET /v1/orderbook/{base}/{counter}
///
/// Base and counter use the compact `currency+counterparty` notation. Bids
/// are offers paying base for counter, asks the reverse.
pub async fn orderbook(
    State(state): State<AppState>,
    Path((base, counter)): Path<(String, String)>,
) -> RestResult<Json<OrderbookResponse>> {
    state.monitor.ensure_ready().map_err(RestError::from)?;
    let base_spec = book_currency("base", &base)?;
    let counter_spec = book_currency("counter", &counter)?;

    let bids = state
        .client
        .book_offers(base_spec.clone(), counter_spec.clone())
        .await?;
    let asks = state.client.book_offers(counter_spec, base_spec).await?;

    Ok(Json(OrderbookResponse {
        success: true,
        order_book: format!(
            "{}/{}",
            base.to_uppercase().replace('+', "/"),
            counter.to_uppercase().replace('+', "/")
        ),
        bids: book_entries(&bids)?,
        asks: book_entries(&asks)?,
    }))
}

/// Parse one side of a book from the compact notation into a `book_offers`
/// currency spec. The native currency takes no issuer; issued currencies
/// require one.
fn book_currency(side: &str, raw: &str) -> RestResult<JsonValue> {
    let parsed = parse_amount_query(raw);
    if parsed.value.is_some() || !is_valid_currency(&parsed.currency) {
        return Err(RestError::invalid_request(format!(
            "Invalid parameter: {side}. Must be a currency in the form currency+counterparty",
        )));
    }
    let currency = parsed.currency.to_uppercase();
    if currency == NATIVE_CURRENCY {
        if !parsed.counterparty.is_empty() {
            return Err(RestError::invalid_request(format!(
                "Invalid parameter: {side}. XDV takes no counterparty",
            )));
        }
        return Ok(json!({"currency": currency}));
    }
    if !is_valid_address(&parsed.counterparty) {
        return Err(RestError::invalid_request(format!(
            "Invalid parameter: {side}. Issued currencies require a counterparty address",
        )));
    }
    Ok(json!({"currency": currency, "issuer": parsed.counterparty}))
}

fn book_entries(offers: &[JsonValue]) -> RestResult<Vec<BookEntry>> {
    offers
        .iter()
        .map(|offer| {
            Ok(BookEntry {
                account: offer
                    .get("Account")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                taker_gets: wire_field(offer, "TakerGets")?,
                taker_pays: wire_field(offer, "TakerPays")?,
            })
        })
        .collect()
}

fn wire_field(value: &JsonValue, field: &str) -> RestResult<Amount> {
    let wire = value
        .get(field)
        .ok_or_else(|| RestError::internal(format!("offer missing {field}")))?;
    Ok(from_wire_amount(wire)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_currency_native_takes_no_issuer() {
        let spec = book_currency("base", "XDV").unwrap();
        assert_eq!(spec, json!({"currency": "XDV"}));

        assert!(book_currency("base", "XDV+rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ").is_err());
    }

    #[test]
    fn book_currency_issued_requires_issuer() {
        let spec = book_currency("counter", "usd+rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ").unwrap();
        assert_eq!(
            spec,
            json!({"currency": "USD", "issuer": "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ"})
        );

        assert!(book_currency("counter", "USD").is_err());
        assert!(book_currency("counter", "USD+not-an-address").is_err());
    }

    #[test]
    fn book_currency_rejects_amounts() {
        assert!(book_currency("base", "10+USD+rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ").is_err());
    }
}
