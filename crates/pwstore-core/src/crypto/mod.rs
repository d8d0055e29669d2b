//! Boundary to the external OpenPGP service.
//!
//! The service is opaque: a [`CryptoRequest`] goes in and exactly one
//! [`ServiceResponse`] comes back. When the service needs the user (a
//! passphrase prompt, a key chooser) it hands out a [`Continuation`] that the
//! caller passes back unmodified once the interaction is over.

pub mod session;

use std::fmt;

use async_trait::async_trait;

/// Operations understood by the crypto service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Decrypt a ciphertext and verify its signature, if any.
    DecryptVerify,
    /// Ask the user to choose the keys entries are encrypted to.
    GetKeyIds,
}

/// A 64-bit OpenPGP key id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub u64);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Opaque resume token issued by the service.
#[derive(Clone, PartialEq, Eq)]
pub struct Continuation(Vec<u8>);

impl Continuation {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Continuation({} bytes)", self.0.len())
    }
}

/// A single request to the crypto service.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoRequest {
    operation: Operation,
    payload: Option<Vec<u8>>,
    continuation: Option<Continuation>,
}

impl CryptoRequest {
    pub fn decrypt_verify(ciphertext: Vec<u8>) -> Self {
        Self {
            operation: Operation::DecryptVerify,
            payload: Some(ciphertext),
            continuation: None,
        }
    }

    pub fn get_key_ids() -> Self {
        Self {
            operation: Operation::GetKeyIds,
            payload: None,
            continuation: None,
        }
    }

    /// The same request, resumed with the result of a user interaction.
    pub fn with_continuation(self, continuation: Continuation) -> Self {
        Self {
            continuation: Some(continuation),
            ..self
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }
}

impl fmt::Debug for CryptoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoRequest")
            .field("operation", &self.operation)
            .field("payload_len", &self.payload.as_ref().map(Vec::len))
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// Data returned by a successful request.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    Plaintext(Vec<u8>),
    KeyIds(Vec<KeyId>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext(bytes) => write!(f, "Plaintext({} bytes)", bytes.len()),
            Self::KeyIds(ids) => f.debug_tuple("KeyIds").field(ids).finish(),
        }
    }
}

/// The three possible answers of the crypto service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceResponse {
    Success(Payload),
    NeedsUserInteraction(Continuation),
    Error { code: i32, message: String },
}

/// An OpenPGP-capable service.
#[async_trait]
pub trait CryptoService: Send + Sync {
    async fn execute(&self, request: CryptoRequest) -> ServiceResponse;
}

/// Result of an out-of-band user interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// The user completed the flow; resume with this continuation.
    Resumed(Continuation),
    Cancelled,
}

/// Runs the interaction the service asked for.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn interact(&self, continuation: Continuation) -> InteractionOutcome;
}
