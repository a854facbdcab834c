//! Error taxonomy for the agent bridge.
//!
//! Every public entry point returns a `BridgeResult`; transport-level
//! failures never panic the host.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error categories for [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorKind {
    /// Agent executable not found at any candidate path. Never auto-retried.
    Discovery,
    /// The OS refused to spawn the agent process.
    Launch,
    /// Pipe closed or EOF mid-exchange.
    Transport,
    /// Malformed response, or protocol version mismatch during handshake.
    Protocol,
    /// Application error reported by the agent (surfaced verbatim).
    Rpc,
    /// User-initiated cancellation. Partial output is preserved.
    Canceled,
    /// The session has been disposed and accepts no further calls.
    Unavailable,
}

impl fmt::Display for BridgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeErrorKind::Discovery => write!(f, "discovery"),
            BridgeErrorKind::Launch => write!(f, "launch"),
            BridgeErrorKind::Transport => write!(f, "transport"),
            BridgeErrorKind::Protocol => write!(f, "protocol"),
            BridgeErrorKind::Rpc => write!(f, "rpc"),
            BridgeErrorKind::Canceled => write!(f, "canceled"),
            BridgeErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Structured bridge error with kind and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeError {
    /// Error category
    pub kind: BridgeErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw response line)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// JSON-RPC error code, when the agent reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl BridgeError {
    /// Creates a bridge error without details.
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            code: None,
        }
    }

    /// Creates a bridge error with details.
    pub fn with_details(
        kind: BridgeErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details.into()),
            code: None,
        }
    }

    /// Creates an agent-reported error carrying a JSON-RPC error code.
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: BridgeErrorKind::Rpc,
            message: message.into(),
            details: None,
            code: Some(code),
        }
    }

    /// Creates a transport error from an I/O failure.
    pub fn transport(context: &str, err: &std::io::Error) -> Self {
        Self::with_details(BridgeErrorKind::Transport, context, err.to_string())
    }

    /// Creates a cancellation marker error.
    pub fn canceled() -> Self {
        Self::new(BridgeErrorKind::Canceled, "task canceled")
    }

    /// Returns true if this error represents user cancellation.
    pub fn is_canceled(&self) -> bool {
        self.kind == BridgeErrorKind::Canceled
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BridgeError {}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
