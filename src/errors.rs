//! Domain error types for voxlink.
//!
//! Typed errors at module boundaries; `anyhow` is used only at the binary
//! edge. Negotiation failures are fatal to the attempted call and surface to
//! the caller; protocol parse failures are logged and dropped where they
//! occur and never appear here.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Signaling errors
// ---------------------------------------------------------------------------

/// Errors from connection negotiation.
///
/// Each variant is fatal to the attempted session: the caller surfaces the
/// message and the controller returns to idle. There is no automatic retry.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The control plane refused or failed to mint a short-lived credential.
    #[error("credential request failed: {0}")]
    Credential(String),

    /// The SDP offer/answer exchange or peer-connection setup failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The requested capture device is unavailable or access was denied.
    #[error("audio capture unavailable: {0}")]
    MediaAccess(String),
}

impl SignalingError {
    /// Shorthand used throughout the signaling path.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        SignalingError::Negotiation(msg.to_string())
    }
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` was called while a prior session had not reached `closed`.
    #[error("a call is already in progress")]
    AlreadyActive,

    /// An operation that needs a live call found none.
    #[error("no active call")]
    NotActive,

    /// The control channel never reported open within the allowed window.
    #[error("control channel did not open: {0}")]
    ChannelNotOpen(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}
