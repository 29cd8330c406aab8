//! Error taxonomy for the gateway.
//!
//! Every failure surfaced to a caller is one of a small set of kinds, matched
//! exhaustively at the HTTP boundary. The response envelope is
//! `{success: false, error_type, error?, message?}` with `error_type` one of
//! `invalid_request`, `connection`, `transaction`, `server`.

use crate::database::DatabaseError;
use crate::divvyd::amount::InvalidAmountError;
use crate::divvyd::LedgerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type RestResult<T> = Result<T, RestError>;

#[derive(Debug, Error)]
pub enum RestError {
    /// Malformed or missing caller input. Never retried.
    #[error("{0}")]
    InvalidRequest(String),

    /// The requested resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The upstream node is unreachable or not ready. Transient.
    #[error("{0}")]
    Network(String),

    /// The ledger rejected the transaction. Terminal for this attempt.
    #[error("{message}")]
    Transaction {
        code: Option<String>,
        message: String,
    },

    /// A transaction already exists under this client resource id.
    #[error("{0}")]
    Duplicate(String),

    /// A wait expired with the outcome still unknown. The caller should poll
    /// the transaction rather than resubmit blindly.
    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Internal(String),
}

impl RestError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn transaction(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Transaction {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::NotFound(_) => "invalid_request",
            Self::Network(_) | Self::Timeout(_) => "connection",
            Self::Transaction { .. } => "transaction",
            Self::Duplicate(_) | Self::Database(_) | Self::Internal(_) => "server",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transaction { .. }
            | Self::Duplicate(_)
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code, where one exists.
    pub fn error_code(&self) -> Option<String> {
        match self {
            Self::InvalidRequest(_) => Some("restINVALID_PARAMETER".to_string()),
            Self::NotFound(_) => Some("restNOT_FOUND".to_string()),
            Self::Duplicate(_) => Some("restDUPLICATE_TRANSACTION".to_string()),
            Self::Transaction { code, .. } => code.clone(),
            _ => None,
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error_type": self.error_type(),
            "message": self.to_string(),
        });
        if let Some(code) = self.error_code() {
            body["error"] = json!(code);
        }
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<LedgerError> for RestError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotReady => {
                Self::Network("Cannot connect to divvyd. No active ledger connection".to_string())
            }
            LedgerError::Disconnected { message } => Self::Network(message),
            LedgerError::Timeout { seconds } => {
                Self::Timeout(format!("divvyd request timed out after {seconds} seconds"))
            }
            LedgerError::Node { code, message } => match code.as_str() {
                "actNotFound" => Self::NotFound("Account not found".to_string()),
                "txnNotFound" => Self::NotFound("Transaction not found".to_string()),
                "invalidParams" | "srcActMalformed" | "dstActMalformed" | "srcCurMalformed"
                | "dstAmtMalformed" => Self::InvalidRequest(message),
                _ => Self::Network(format!("divvyd error {code}: {message}")),
            },
            LedgerError::Submission {
                engine_result,
                message,
            } => Self::Transaction {
                code: Some(engine_result),
                message,
            },
            LedgerError::Protocol { message } => Self::Internal(message),
        }
    }
}

impl From<DatabaseError> for RestError {
    fn from(err: DatabaseError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<InvalidAmountError> for RestError {
    fn from(err: InvalidAmountError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
