use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by the upstream divvyd connection layer.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Cannot connect to divvyd")]
    NotReady,

    #[error("Disconnected from divvyd: {message}")]
    Disconnected { message: String },

    #[error("divvyd request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Command-level error reported by divvyd (e.g. `actNotFound`).
    #[error("divvyd error {code}: {message}")]
    Node { code: String, message: String },

    /// Preliminary engine result that terminally rejects a transaction.
    #[error("Transaction failed: {engine_result}: {message}")]
    Submission {
        engine_result: String,
        message: String,
    },

    /// The node sent something we could not make sense of.
    #[error("Unexpected divvyd payload: {message}")]
    Protocol { message: String },
}

impl LedgerError {
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn node(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn submission(engine_result: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Submission {
            engine_result: engine_result.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
