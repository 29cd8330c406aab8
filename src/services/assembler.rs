//! Assembly of a flattened REST payment into a divvyd Payment transaction.
//!
//! Currency codes are uppercased before anything else looks at them, so the
//! native currency is native in any spelling and the blank-issuer default
//! only ever applies to issued currencies.

use crate::divvyd::amount::to_wire_amount;
use crate::divvyd::types::{
    Amount, MemoEntry, MemoFields, Payment, PaymentTransaction, NATIVE_CURRENCY,
    TF_NO_DIVVY_DIRECT, TF_PARTIAL_PAYMENT,
};
use crate::error::RestError;
use bigdecimal::BigDecimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Build the `tx_json` for a payment. Fee and LastLedgerSequence are left
/// unset; submission fills them in against the live ledger.
pub fn assemble_payment(payment: &Payment) -> Result<PaymentTransaction, RestError> {
    let mut payment = payment.clone();

    if let Some(source_amount) = payment.source_amount.as_mut() {
        source_amount.currency = source_amount.currency.to_uppercase();
    }
    payment.destination_amount.currency = payment.destination_amount.currency.to_uppercase();

    // Blank issuers on issued currencies default to the adjacent account.
    if let Some(source_amount) = payment.source_amount.as_mut() {
        if source_amount.issuer.is_empty() && source_amount.currency != NATIVE_CURRENCY {
            source_amount.issuer = payment.source_account.clone();
        }
    }
    if payment.destination_amount.issuer.is_empty()
        && payment.destination_amount.currency != NATIVE_CURRENCY
    {
        payment.destination_amount.issuer = payment.destination_account.clone();
    }

    let amount = to_wire_amount(&payment.destination_amount)?;
    let mut tx = PaymentTransaction::new(
        payment.source_account.clone(),
        payment.destination_account.clone(),
        amount,
    );

    if !payment.invoice_id.is_empty() {
        tx.invoice_id = Some(payment.invoice_id.clone());
    }
    if !payment.source_tag.is_empty() {
        tx.source_tag = Some(parse_tag("source_tag", &payment.source_tag)?);
    }
    if !payment.destination_tag.is_empty() {
        tx.destination_tag = Some(parse_tag("destination_tag", &payment.destination_tag)?);
    }

    tx.send_max = send_max(&payment)?;
    tx.paths = parsed_paths(&payment)?;
    tx.memos = wire_memos(&payment)?;

    let mut flags = 0u32;
    if payment.partial_payment {
        flags |= TF_PARTIAL_PAYMENT;
    }
    if payment.no_direct_divvy {
        flags |= TF_NO_DIVVY_DIRECT;
    }
    if flags != 0 {
        tx.flags = Some(flags);
    }

    Ok(tx)
}

fn parse_tag(field: &str, raw: &str) -> Result<u32, RestError> {
    raw.parse::<u32>()
        .map_err(|_| RestError::invalid_request(format!("Invalid parameter: {field}")))
}

/// SendMax is the source amount plus slippage. It is omitted entirely for
/// direct XDV-to-XDV payments, where the destination amount alone fixes the
/// cost.
fn send_max(payment: &Payment) -> Result<Option<crate::divvyd::types::WireAmount>, RestError> {
    let Some(source_amount) = payment.source_amount.as_ref() else {
        return Ok(None);
    };
    if source_amount.currency == NATIVE_CURRENCY
        && payment.destination_amount.currency == NATIVE_CURRENCY
    {
        return Ok(None);
    }

    let value = BigDecimal::from_str(source_amount.value.trim()).map_err(|_| {
        RestError::invalid_request("Invalid parameter: source_amount. Must be a valid amount")
    })?;
    let slippage = match payment.source_slippage.as_deref() {
        Some(raw) => BigDecimal::from_str(raw.trim()).map_err(|_| {
            RestError::invalid_request("Invalid parameter: source_slippage. Must be a number")
        })?,
        None => BigDecimal::from(0),
    };
    let total = Amount {
        currency: source_amount.currency.clone(),
        value: (value + slippage).normalized().to_string(),
        issuer: source_amount.issuer.clone(),
    };
    Ok(Some(to_wire_amount(&total)?))
}

/// Paths arrive either pre-parsed or as a JSON-encoded string; both forms end
/// up as the parsed array.
fn parsed_paths(payment: &Payment) -> Result<Option<JsonValue>, RestError> {
    match payment.paths.as_ref() {
        None => Ok(None),
        Some(JsonValue::String(encoded)) => serde_json::from_str(encoded)
            .map(Some)
            .map_err(|_| RestError::invalid_request("Invalid parameter: paths. Must be a valid JSON string or object")),
        Some(other) => Ok(Some(other.clone())),
    }
}

fn wire_memos(payment: &Payment) -> Result<Option<Vec<MemoEntry>>, RestError> {
    let Some(memos) = payment.memos.as_ref() else {
        return Ok(None);
    };
    let entries = memos.as_array().ok_or_else(|| {
        RestError::invalid_request("Invalid parameter: memos. Must be an array with memo objects")
    })?;
    if entries.is_empty() {
        return Err(RestError::invalid_request(
            "Invalid parameter: memos. Must contain at least one memo object",
        ));
    }

    let mut wire = Vec::with_capacity(entries.len());
    for entry in entries {
        let memo_data = entry
            .get("MemoData")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                RestError::invalid_request("Invalid parameter: MemoData. Must be a string")
            })?;
        let memo_type = match entry.get("MemoType") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(hex::encode_upper(s.as_bytes())),
            Some(_) => {
                return Err(RestError::invalid_request(
                    "Invalid parameter: MemoType. Must be a string",
                ))
            }
        };
        wire.push(MemoEntry {
            memo: MemoFields {
                memo_type,
                memo_data: hex::encode_upper(memo_data.as_bytes()),
            },
        });
    }
    Ok(Some(wire))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::divvyd::types::{Amount, WireAmount};
    use serde_json::json;

    const ALICE: &str = "rKXCummUHnenhYudNb9UoJ4mGBR75vFcgz";
    const BOB: &str = "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ";

    fn native_payment() -> Payment {
        Payment {
            source_account: ALICE.to_string(),
            destination_account: BOB.to_string(),
            destination_amount: Amount::native("1"),
            ..Payment::default()
        }
    }

    #[test]
    fn direct_native_payment_has_no_send_max() {
        let mut payment = native_payment();
        payment.source_amount = Some(Amount::native("1"));

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.amount, WireAmount::Drops("1000000".to_string()));
        assert!(tx.send_max.is_none());
        assert!(tx.flags.is_none());
    }

    #[test]
    fn blank_issuer_defaults_to_adjacent_account() {
        let mut payment = native_payment();
        payment.destination_amount = Amount {
            currency: "USD".to_string(),
            value: "5".to_string(),
            issuer: String::new(),
        };

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(
            tx.amount,
            WireAmount::Issued {
                value: "5".to_string(),
                currency: "USD".to_string(),
                issuer: BOB.to_string(),
            }
        );
    }

    #[test]
    fn currency_codes_are_uppercased() {
        let mut payment = native_payment();
        payment.destination_amount = Amount::issued("5", "usd", BOB);

        let tx = assemble_payment(&payment).unwrap();
        match tx.amount {
            WireAmount::Issued { currency, .. } => assert_eq!(currency, "USD"),
            other => panic!("unexpected amount: {other:?}"),
        }
    }

    #[test]
    fn lowercase_xdv_is_native() {
        let mut payment = native_payment();
        payment.destination_amount = Amount {
            currency: "xdv".to_string(),
            value: "5".to_string(),
            issuer: String::new(),
        };

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.amount, WireAmount::Drops("5000000".to_string()));
    }

    #[test]
    fn native_amount_with_counterparty_stays_drops() {
        let mut payment = native_payment();
        payment.destination_amount = Amount::issued("1", "XDV", BOB);

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.amount, WireAmount::Drops("1000000".to_string()));
    }

    #[test]
    fn invalid_currency_code_is_rejected() {
        let mut payment = native_payment();
        payment.destination_amount = Amount::issued("5", "NOTACURRENCY", BOB);

        assert!(matches!(
            assemble_payment(&payment).unwrap_err(),
            RestError::InvalidRequest(_)
        ));
    }

    #[test]
    fn send_max_adds_slippage() {
        let mut payment = native_payment();
        payment.destination_amount = Amount::issued("5", "USD", BOB);
        payment.source_amount = Some(Amount::native("2"));
        payment.source_slippage = Some("0.5".to_string());

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.send_max, Some(WireAmount::Drops("2500000".to_string())));
    }

    #[test]
    fn tags_parse_as_u32() {
        let mut payment = native_payment();
        payment.source_tag = "123".to_string();
        payment.destination_tag = "4294967295".to_string();

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.source_tag, Some(123));
        assert_eq!(tx.destination_tag, Some(u32::MAX));

        payment.destination_tag = "not-a-tag".to_string();
        assert!(matches!(
            assemble_payment(&payment).unwrap_err(),
            RestError::InvalidRequest(_)
        ));
    }

    #[test]
    fn memos_hex_encode_type_and_data() {
        let mut payment = native_payment();
        payment.memos = Some(json!([{"MemoType": "client", "MemoData": "hi"}]));

        let tx = assemble_payment(&payment).unwrap();
        let memos = tx.memos.unwrap();
        assert_eq!(memos[0].memo.memo_type.as_deref(), Some("636C69656E74"));
        assert_eq!(memos[0].memo.memo_data, "6869");
    }

    #[test]
    fn memos_require_string_data() {
        let mut payment = native_payment();
        payment.memos = Some(json!([{"MemoData": 42}]));
        assert!(assemble_payment(&payment).is_err());

        payment.memos = Some(json!([]));
        assert!(assemble_payment(&payment).is_err());

        payment.memos = Some(json!({"MemoData": "hi"}));
        assert!(assemble_payment(&payment).is_err());
    }

    #[test]
    fn flags_combine() {
        let mut payment = native_payment();
        payment.destination_amount = Amount::issued("5", "USD", BOB);
        payment.partial_payment = true;
        payment.no_direct_divvy = true;

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.flags, Some(TF_PARTIAL_PAYMENT | TF_NO_DIVVY_DIRECT));
    }

    #[test]
    fn string_paths_are_parsed() {
        let mut payment = native_payment();
        payment.paths = Some(json!(r#"[[{"currency":"USD"}]]"#));

        let tx = assemble_payment(&payment).unwrap();
        assert_eq!(tx.paths, Some(json!([[{"currency": "USD"}]])));

        payment.paths = Some(json!("{not json"));
        assert!(matches!(
            assemble_payment(&payment).unwrap_err(),
            RestError::InvalidRequest(_)
        ));
    }
}
