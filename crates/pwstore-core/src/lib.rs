//! Core of pwstore.
//!
//! This crate provides the password entry codec, the session driving the
//! external OpenPGP service, the clipboard clear timer and the preferences
//! shared by the frontends.

pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod paths;
pub mod store;

pub use clipboard::{Clipboard, ClipboardTimer};
pub use config::{ClipboardTimeout, Preferences};
pub use crypto::session::{Completion, CryptoSession, SessionOutcome, SessionSettings, SessionState, Step};
pub use crypto::{
    Continuation, CryptoRequest, CryptoService, InteractionHandler, InteractionOutcome, KeyId,
    Operation, Payload, ServiceResponse,
};
pub use entry::{ExtraLine, PasswordEntry, UsernameToggle};
pub use error::{ClipboardError, SessionError};
pub use store::{EntryLocation, PasswordStore};
