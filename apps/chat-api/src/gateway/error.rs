//! Failure taxonomy for connection and command handling.

use thiserror::Error;

use crate::store::StoreError;

use super::events::ErrorCode;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Handshake rejected; the connection never becomes active.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The frame could not be decoded. Logged and dropped.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The command was understood but refused. Reported to the sender only.
    #[error("{message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Socket read or write failure. The connection is torn down.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Reason code for the error frame sent back to the originating
    /// connection, or `None` when nothing should be sent.
    pub fn reason_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            Self::StoreUnavailable(_) => Some(ErrorCode::InternalError),
            Self::Unauthenticated(_) | Self::Malformed(_) | Self::Transport(_) => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_command_failures_produce_reason_codes() {
        let muted = GatewayError::rejected(ErrorCode::Muted, "you are muted");
        assert_eq!(muted.reason_code(), Some(ErrorCode::Muted));
        assert_eq!(muted.to_string(), "you are muted");

        let store = GatewayError::from(StoreError::Timeout);
        assert_eq!(store.reason_code(), Some(ErrorCode::InternalError));

        assert_eq!(GatewayError::Malformed("eof".into()).reason_code(), None);
        assert_eq!(GatewayError::Transport("reset".into()).reason_code(), None);
    }
}
