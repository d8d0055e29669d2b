//! Error types surfaced by the crypto session and the clipboard.

use thiserror::Error;

use crate::crypto::session::SessionState;
use crate::crypto::Operation;

/// Failure of a clipboard backend.
#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard operation failed: {0}")]
    Backend(String),
    #[error("no async runtime to run the clear timer")]
    NoRuntime,
}

/// Errors reported by [`CryptoSession`](crate::crypto::session::CryptoSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The call is not allowed in the current state, e.g. a second request
    /// while one is still outstanding.
    #[error("not allowed while the session is {state:?}")]
    InvalidState { state: SessionState },

    /// The crypto service rejected the request. Never retried.
    #[error("crypto service error {code}: {message}")]
    Service { code: i32, message: String },

    /// The service answered with a payload that does not fit the operation.
    #[error("crypto service answered {operation:?} with an unexpected payload")]
    UnexpectedPayload { operation: Operation },

    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}
