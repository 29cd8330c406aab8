use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

/// Native currency code for the Divvy network.
pub const NATIVE_CURRENCY: &str = "XDV";

/// Protocol flag bits for Payment transactions.
pub const TF_PARTIAL_PAYMENT: u32 = 0x0002_0000;
pub const TF_NO_DIVVY_DIRECT: u32 = 0x0001_0000;

/// A currency amount in the flattened REST representation.
///
/// The native currency always carries an empty issuer. Values are kept as
/// decimal strings end to end so no precision is lost between the caller and
/// the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, alias = "counterparty")]
    pub issuer: String,
}

impl Amount {
    pub fn native(value: impl Into<String>) -> Self {
        Self {
            currency: NATIVE_CURRENCY.to_string(),
            value: value.into(),
            issuer: String::new(),
        }
    }

    pub fn issued(
        value: impl Into<String>,
        currency: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            currency: currency.into(),
            value: value.into(),
            issuer: issuer.into(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.currency == NATIVE_CURRENCY
    }
}

/// A currency amount in the divvyd wire representation: native amounts are
/// integer drop strings, issued amounts are value/currency/issuer objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireAmount {
    Drops(String),
    Issued {
        value: String,
        currency: String,
        issuer: String,
    },
}

/// A payment in the flattened REST representation, exactly as callers send it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default)]
    pub source_account: String,
    #[serde(default)]
    pub destination_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_slippage: Option<String>,
    #[serde(default)]
    pub destination_amount: Amount,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub invoice_id: String,
    /// Either a pre-parsed path set or a JSON-encoded string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<JsonValue>,
    /// Validated by the assembler: a non-empty list of
    /// `{MemoType?, MemoData}` string pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memos: Option<JsonValue>,
    #[serde(default)]
    pub partial_payment: bool,
    #[serde(default)]
    pub no_direct_divvy: bool,
}

/// One memo on the wire. Type and data are hex-encoded per ledger convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoEntry {
    #[serde(rename = "Memo")]
    pub memo: MemoFields,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoFields {
    #[serde(rename = "MemoType", skip_serializing_if = "Option::is_none")]
    pub memo_type: Option<String>,
    #[serde(rename = "MemoData")]
    pub memo_data: String,
}

/// An assembled Payment transaction in divvyd `tx_json` form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentTransaction {
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Account")]
    pub account: String,
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "Amount")]
    pub amount: WireAmount,
    #[serde(rename = "InvoiceID", skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(rename = "SourceTag", skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<u32>,
    #[serde(rename = "DestinationTag", skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
    #[serde(rename = "SendMax", skip_serializing_if = "Option::is_none")]
    pub send_max: Option<WireAmount>,
    #[serde(rename = "Paths", skip_serializing_if = "Option::is_none")]
    pub paths: Option<JsonValue>,
    #[serde(rename = "Memos", skip_serializing_if = "Option::is_none")]
    pub memos: Option<Vec<MemoEntry>>,
    #[serde(rename = "Flags", skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(rename = "Fee", skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    #[serde(rename = "LastLedgerSequence", skip_serializing_if = "Option::is_none")]
    pub last_ledger_sequence: Option<u64>,
}

impl PaymentTransaction {
    pub fn new(account: String, destination: String, amount: WireAmount) -> Self {
        Self {
            transaction_type: "Payment".to_string(),
            account,
            destination,
            amount,
            invoice_id: None,
            source_tag: None,
            destination_tag: None,
            send_max: None,
            paths: None,
            memos: None,
            flags: None,
            fee: None,
            last_ledger_sequence: None,
        }
    }
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^r[1-9A-HJ-NP-Za-km-z]{24,34}$").unwrap())
}

fn hash256_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Fa-f0-9]{64}$").unwrap())
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9]{3}|[A-Fa-f0-9]{40})$").unwrap())
}

pub fn is_valid_address(address: &str) -> bool {
    address_re().is_match(address)
}

pub fn is_valid_hash256(hash: &str) -> bool {
    hash256_re().is_match(hash)
}

/// Currency codes are either three alphanumeric characters or a 40-character
/// hex blob.
pub fn is_valid_currency(currency: &str) -> bool {
    currency_re().is_match(currency)
}

/// A client resource id must be non-empty printable ASCII and must not look
/// like a transaction hash, since both share the payment lookup path.
pub fn is_valid_client_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().all(|b| (0x20..0x7f).contains(&b))
        && !is_valid_hash256(id)
}
