//! Error types for the session core.
//!
//! Errors are categorized to support retry logic and proper error handling,
//! mirroring the taxonomy in [`crate::error`]'s design notes: transient
//! crypto conditions never surface, handshake timeouts drive endpoint
//! fan-out, and everything else past handshake completion is terminal.

use std::borrow::Cow;

use thiserror::Error;

/// Errors that can occur while driving a [`crate::session::Session`].
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    // ============ Transport Errors ============
    /// The gateway's non-blocking send reported a failure.
    #[error("transport send failed: {0}")]
    Transport(Cow<'static, str>),

    // ============ Handshake Errors ============
    /// The crypto engine reported a step failure that is not would-block,
    /// timeout, or success.
    #[error("handshake failed: {0}")]
    Handshake(Cow<'static, str>),

    /// The handshake against the current endpoint timed out.
    #[error("handshake timed out against current endpoint")]
    HandshakeTimeout,

    /// The candidate endpoint set was exhausted after repeated timeouts.
    #[error("candidate endpoints exhausted")]
    EndpointsExhausted,

    // ============ Verification Errors ============
    /// Certificate verification rejected the peer.
    #[error("certificate rejected: {0}")]
    CertificateRejected(#[from] crate::verify::CertificateError),

    // ============ Record Errors ============
    /// A fatal or warning alert was received from the peer.
    #[error("alert received from peer")]
    AlertReceived,

    /// The crypto engine reported end-of-session (peer shutdown).
    #[error("peer closed the session")]
    PeerClosed,

    /// More than the configured number of consecutive heartbeats went
    /// unanswered.
    #[error("missed {0} consecutive heartbeat pongs")]
    HeartbeatsMissed(u8),

    // ============ State Errors ============
    /// An operation was attempted on a session that has already begun
    /// terminating.
    #[error("session is terminating")]
    Terminating,

    /// Invalid internal state transition.
    #[error("invalid session state: {0}")]
    InvalidState(Cow<'static, str>),

    // ============ Underlying I/O ============
    /// Wrapped `std::io::Error` from the crypto engine or gateway.
    #[error("I/O error: {0}")]
    Io(String),
}

impl SessionError {
    /// Returns true if this error is transient and the caller may retry the
    /// operation (nothing in the public API currently returns these, but the
    /// predicate follows the corpus convention of exposing it regardless).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::HandshakeTimeout)
    }

    /// Returns true if this error is permanent: the session cannot recover
    /// and must be torn down via `terminate()`.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SessionError::CertificateRejected(_)
                | SessionError::AlertReceived
                | SessionError::PeerClosed
                | SessionError::HeartbeatsMissed(_)
                | SessionError::EndpointsExhausted
        )
    }

    /// Build a transport error from a static context string (zero allocation).
    #[must_use]
    pub const fn transport(context: &'static str) -> Self {
        SessionError::Transport(Cow::Borrowed(context))
    }

    /// Build a handshake error from a static context string (zero allocation).
    #[must_use]
    pub const fn handshake(context: &'static str) -> Self {
        SessionError::Handshake(Cow::Borrowed(context))
    }

    /// Build a handshake error from a dynamically-constructed message.
    #[must_use]
    pub fn handshake_owned(context: String) -> Self {
        SessionError::Handshake(Cow::Owned(context))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<snow::Error> for SessionError {
    fn from(err: snow::Error) -> Self {
        SessionError::Handshake(Cow::Owned(err.to_string()))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
