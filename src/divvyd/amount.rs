//! Conversions between the REST amount representation and the divvyd wire
//! representation, plus the compact query-string amount notation.
//!
//! All arithmetic is exact decimal arithmetic. Native-currency conversion
//! rounds toward zero so we never send more than the caller authorized.

use crate::divvyd::types::{is_valid_currency, Amount, WireAmount, NATIVE_CURRENCY};
use bigdecimal::{BigDecimal, RoundingMode};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;

/// Drops per XDV.
pub const DROPS_PER_XDV: u64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount: {0}")]
pub struct InvalidAmountError(pub String);

fn parse_decimal(value: &str) -> Result<BigDecimal, InvalidAmountError> {
    BigDecimal::from_str(value.trim())
        .map_err(|_| InvalidAmountError(format!("'{}' is not a decimal number", value)))
}

/// Convert an XDV decimal string to an integer drop string, rounding toward
/// zero.
pub fn xdv_to_drops(xdv: &str) -> Result<String, InvalidAmountError> {
    let value = parse_decimal(xdv)?;
    let drops = (value * BigDecimal::from(DROPS_PER_XDV)).with_scale_round(0, RoundingMode::Down);
    Ok(drops.to_string())
}

/// Convert an integer drop string to an XDV decimal string. The division by
/// a power of ten is exact.
pub fn drops_to_xdv(drops: &str) -> Result<String, InvalidAmountError> {
    let value = parse_decimal(drops)?;
    let xdv = value / BigDecimal::from(DROPS_PER_XDV);
    Ok(xdv.normalized().to_string())
}

/// Convert a REST amount to the divvyd wire representation. The native
/// currency always travels as a drop string; a counterparty on a native
/// amount is ignored, since XDV is not held on trust lines.
pub fn to_wire_amount(amount: &Amount) -> Result<WireAmount, InvalidAmountError> {
    if amount.currency == NATIVE_CURRENCY {
        return Ok(WireAmount::Drops(xdv_to_drops(&amount.value)?));
    }
    if !is_valid_currency(&amount.currency) {
        return Err(InvalidAmountError(format!(
            "'{}' is not a valid currency code",
            amount.currency
        )));
    }
    Ok(WireAmount::Issued {
        value: amount.value.clone(),
        currency: amount.currency.clone(),
        issuer: amount.issuer.clone(),
    })
}

/// Convert a divvyd amount (drop string or issued-amount object) back to the
/// REST representation.
pub fn from_wire_amount(wire: &JsonValue) -> Result<Amount, InvalidAmountError> {
    match wire {
        JsonValue::String(drops) => Ok(Amount::native(drops_to_xdv(drops)?)),
        JsonValue::Object(fields) => Ok(Amount {
            currency: fields
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            value: fields
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            issuer: fields
                .get("issuer")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        other => Err(InvalidAmountError(format!(
            "unrecognized wire amount: {}",
            other
        ))),
    }
}

/// An amount parsed from the compact `value+currency+counterparty` query
/// notation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAmountQuery {
    pub value: Option<String>,
    pub currency: String,
    pub counterparty: String,
}

/// Parse the compact query-string amount notation.
///
/// Segments are split on `+`. If the first segment parses as a number the
/// segments are `[value, currency, counterparty]`, otherwise
/// `[currency, counterparty]`. Missing segments default to empty strings, so
/// a bare numeric string yields a value with no currency.
pub fn parse_amount_query(query: &str) -> ParsedAmountQuery {
    let segments: Vec<&str> = query.split('+').collect();
    let first = segments.first().copied().unwrap_or_default();

    if first.is_empty() || first.parse::<f64>().is_ok() {
        ParsedAmountQuery {
            value: Some(first.to_string()),
            currency: segments.get(1).copied().unwrap_or_default().to_string(),
            counterparty: segments.get(2).copied().unwrap_or_default().to_string(),
        }
    } else {
        ParsedAmountQuery {
            value: None,
            currency: first.to_string(),
            counterparty: segments.get(1).copied().unwrap_or_default().to_string(),
        }
    }
}

fn field_as_i64(value: Option<&JsonValue>) -> i64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Order two divvyd transactions by ledger index, then by the position the
/// transaction took within its ledger. Tolerates string-encoded numbers,
/// which divvyd emits in some responses.
pub fn compare_by_ledger_order(first: &JsonValue, second: &JsonValue) -> Ordering {
    let first_ledger = field_as_i64(first.get("ledger_index"));
    let second_ledger = field_as_i64(second.get("ledger_index"));
    if first_ledger != second_ledger {
        return first_ledger.cmp(&second_ledger);
    }

    let first_index = field_as_i64(first.pointer("/meta/TransactionIndex"));
    let second_index = field_as_i64(second.pointer("/meta/TransactionIndex"));
    first_index.cmp(&second_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn xdv_to_drops_floors() {
        assert_eq!(xdv_to_drops("1").unwrap(), "1000000");
        assert_eq!(xdv_to_drops("0.1").unwrap(), "100000");
        // Below drop resolution rounds toward zero, never up.
        assert_eq!(xdv_to_drops("0.0000019").unwrap(), "1");
        assert_eq!(xdv_to_drops("0.0000001").unwrap(), "0");
    }

    #[test]
    fn drops_to_xdv_is_exact() {
        assert_eq!(drops_to_xdv("1000000").unwrap(), "1");
        assert_eq!(drops_to_xdv("1").unwrap(), "0.000001");
        assert_eq!(drops_to_xdv("1500000").unwrap(), "1.5");
    }

    #[test]
    fn native_round_trip() {
        for value in ["429", "0.5", "123.456789", "1"] {
            let drops = xdv_to_drops(value).unwrap();
            assert_eq!(drops_to_xdv(&drops).unwrap(), value);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(xdv_to_drops("not-a-number").is_err());
        assert!(drops_to_xdv("").is_err());
    }

    #[test]
    fn wire_amount_native_uses_drops() {
        let wire = to_wire_amount(&Amount::native("429")).unwrap();
        assert_eq!(wire, WireAmount::Drops("429000000".to_string()));
    }

    #[test]
    fn wire_amount_native_ignores_counterparty() {
        let amount = Amount::issued("1", "XDV", "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ");
        let wire = to_wire_amount(&amount).unwrap();
        assert_eq!(wire, WireAmount::Drops("1000000".to_string()));
    }

    #[test]
    fn wire_amount_validates_currency_codes() {
        let bad = Amount::issued("5", "NOTACURRENCY", "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ");
        assert!(to_wire_amount(&bad).is_err());

        // 40-character hex codes are the other legal form.
        let hex = Amount::issued(
            "5",
            "0158415500000000C1F76FF6ECB0BAC600000000",
            "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ",
        );
        assert!(to_wire_amount(&hex).is_ok());
    }

    #[test]
    fn wire_amount_issued_passes_value_through() {
        let amount = Amount::issued("10.25", "USD", "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ");
        let wire = to_wire_amount(&amount).unwrap();
        assert_eq!(
            wire,
            WireAmount::Issued {
                value: "10.25".to_string(),
                currency: "USD".to_string(),
                issuer: "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ".to_string(),
            }
        );
    }

    #[test]
    fn from_wire_amount_drops() {
        let amount = from_wire_amount(&json!("429000000")).unwrap();
        assert_eq!(amount, Amount::native("429"));
    }

    #[test]
    fn parse_query_with_value() {
        assert_eq!(
            parse_amount_query("429+XDV"),
            ParsedAmountQuery {
                value: Some("429".to_string()),
                currency: "XDV".to_string(),
                counterparty: String::new(),
            }
        );
    }

    #[test]
    fn parse_query_currency_only() {
        assert_eq!(
            parse_amount_query("XDV"),
            ParsedAmountQuery {
                value: None,
                currency: "XDV".to_string(),
                counterparty: String::new(),
            }
        );
    }

    #[test]
    fn parse_query_bare_number() {
        assert_eq!(
            parse_amount_query("123"),
            ParsedAmountQuery {
                value: Some("123".to_string()),
                currency: String::new(),
                counterparty: String::new(),
            }
        );
    }

    #[test]
    fn parse_query_full_triple() {
        let parsed = parse_amount_query("10.5+USD+rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ");
        assert_eq!(parsed.value.as_deref(), Some("10.5"));
        assert_eq!(parsed.currency, "USD");
        assert_eq!(parsed.counterparty, "rLs3Tvn1ZJcEhUu4nMvrtBnyzzhXFVF7eQ");
    }

    #[test]
    fn ledger_order_across_ledgers() {
        let a = json!({"ledger_index": 1, "meta": {"TransactionIndex": 5}});
        let b = json!({"ledger_index": "2", "meta": {"TransactionIndex": 0}});
        assert_eq!(compare_by_ledger_order(&a, &b), Ordering::Less);
        assert_eq!(compare_by_ledger_order(&b, &a), Ordering::Greater);
    }

    #[test]
    fn ledger_order_within_ledger() {
        let a = json!({"ledger_index": 7, "meta": {"TransactionIndex": "2"}});
        let b = json!({"ledger_index": 7, "meta": {"TransactionIndex": 9}});
        assert_eq!(compare_by_ledger_order(&a, &b), Ordering::Less);
        assert_eq!(compare_by_ledger_order(&a, &a), Ordering::Equal);
    }
}
