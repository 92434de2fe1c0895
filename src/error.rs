use crate::user_operation::UserOperationHash;
use serde_json::Value;
use std::{fmt, time::Duration};

/// JSON-RPC error object as reported by the bundler.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// ERC-4337 validation codes, plus execution revert and invalid params.
    ///
    /// These mean "the operation itself was rejected"; resending it unchanged
    /// will not help.
    pub fn is_validation(&self) -> bool {
        matches!(self.code, -32507..=-32500 | -32521 | -32602)
    }

    /// Bundlers report a resubmitted operation with a free-form message and
    /// no dedicated code.
    pub fn is_duplicate(&self) -> bool {
        let msg = self.message.to_ascii_lowercase();
        msg.contains("already known")
            || msg.contains("duplicate")
            || msg.contains("already in mempool")
            || msg.contains("already in pool")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ": {data}")?;
        }
        Ok(())
    }
}

/// Failure of a single JSON-RPC round trip.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to bundler failed: {0}")]
    Connection(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("RPC error: {0}")]
    Rpc(RpcError),
}

impl TransportError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    #[error(transparent)]
    Transport(TransportError),

    /// The bundler rejected the operation content.
    #[error("user operation rejected: {0}")]
    Validation(RpcError),

    #[error("user operation {hash} already known to the bundler")]
    Duplicate { hash: UserOperationHash },

    #[error("timed out after {elapsed:?} waiting for receipt of {hash}")]
    Timeout {
        hash: UserOperationHash,
        elapsed: Duration,
    },

    #[error("user operation {0} not found")]
    NotFound(UserOperationHash),

    /// Local failure; nothing was sent.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("bundler returned hash {remote}, locally computed {local}")]
    HashMismatch {
        local: UserOperationHash,
        remote: UserOperationHash,
    },

    #[error("signing failed: {0}")]
    Signer(String),
}

impl BundlerError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Whether repeating the same call may succeed. A timeout means the wait
    /// can be retried, never the submission. RPC errors that reach this as
    /// `Transport` are bundler-side faults; validation codes were already
    /// turned into `Validation` and are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<TransportError> for BundlerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rpc(rpc) if rpc.is_validation() => Self::Validation(rpc),
            other => Self::Transport(other),
        }
    }
}

pub type Result<T, E = BundlerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i64, message: &str) -> RpcError {
        RpcError {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn validation_codes_are_classified() {
        for code in [-32500, -32501, -32502, -32507, -32521, -32602] {
            let err: BundlerError = TransportError::Rpc(rpc(code, "rejected")).into();
            assert!(matches!(err, BundlerError::Validation(_)), "code {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn other_rpc_codes_stay_transport_and_retryable() {
        for code in [-32603, -32000] {
            let err: BundlerError = TransportError::Rpc(rpc(code, "internal error")).into();
            assert!(
                matches!(err, BundlerError::Transport(TransportError::Rpc(_))),
                "code {code}"
            );
            assert!(err.is_retryable(), "code {code}");
        }
        let rejected: BundlerError = TransportError::Rpc(rpc(-32500, "AA21")).into();
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn retryability() {
        assert!(BundlerError::Transport(TransportError::malformed("x")).is_retryable());
        assert!(BundlerError::Timeout {
            hash: UserOperationHash::zero(),
            elapsed: Duration::from_millis(5),
        }
        .is_retryable());
        assert!(!BundlerError::precondition("missing signature").is_retryable());
        assert!(!BundlerError::NotFound(UserOperationHash::zero()).is_retryable());
    }

    #[test]
    fn duplicate_messages() {
        assert!(rpc(-32602, "user operation already known").is_duplicate());
        assert!(rpc(-32000, "Duplicate user operation").is_duplicate());
        assert!(!rpc(-32602, "invalid signature").is_duplicate());
    }
}
