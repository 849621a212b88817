//! Error types for the recruit-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DrainError`] — **Fatal**: the run cannot make progress at all
//!   (store unreachable, a statement or commit failed, provider not
//!   configured). Returned as `Err(DrainError)` from
//!   [`crate::drain::drain`]; entries not yet processed stay queued.
//!
//! * [`EntryError`] — **Non-fatal**: a single queue entry failed (image
//!   unreachable or not stageable, undecodable bytes, recognition call
//!   failed) but the run continues with the next entry. Stored inside
//!   [`crate::output::EntryOutcome`] and the entry is left queued for the
//!   next invocation.

use thiserror::Error;

/// All fatal errors returned by the recruit-ocr library.
///
/// Entry-level failures use [`EntryError`] and are stored in
/// [`crate::output::EntryOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DrainError {
    // ── Store errors ──────────────────────────────────────────────────────
    /// A connection, query, statement or transaction primitive failed.
    #[error("Store operation '{op}' failed: {detail}")]
    Store { op: &'static str, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DrainError {
    /// Wrap a store-side failure for the named operation.
    pub fn store(op: &'static str, err: impl std::fmt::Display) -> Self {
        DrainError::Store {
            op,
            detail: err.to_string(),
        }
    }

    /// True when the run stopped because the store failed.
    pub fn is_store(&self) -> bool {
        matches!(self, DrainError::Store { .. })
    }
}

/// A non-fatal error for a single queue entry.
///
/// The entry that produced it is left in the waiting list untouched, so the
/// next run picks it up again.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum EntryError {
    /// The image could not be downloaded or the response had no payload.
    #[error("Failed to fetch image '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// Staged bytes were missing, unreadable, or resizing/encoding failed.
    #[error("Failed to transform staged image '{id}': {detail}")]
    Transform { id: String, detail: String },

    /// The encoded image could not be converted to base64.
    #[error("Failed to encode image as base64: {0}")]
    Encoding(String),

    /// The recognition service call failed or returned no usable text.
    #[error("Text recognition failed: {detail}")]
    Recognition { detail: String },

    /// The queue entry carries no image location at all.
    #[error("Queue entry {entry} has no image location")]
    NoImageLocation { entry: i64 },

    /// The target record the text belongs to does not exist.
    #[error("Target record {target} does not exist; transaction rolled back")]
    TargetMissing { target: i64 },
}
