//! Error kinds visible to callers of the link layer.
//!
//! Frame-level anomalies (bad BCC1, a malformed escape sequence, an
//! unexpected address/control pair, a BCC2 mismatch) are never turned
//! into one of these — the receiver state machine and the session loop
//! absorb them locally (discard up to the next FLAG, send a REJ, or
//! simply ignore a frame addressed to the wrong phase) and only log at
//! `warn!`. Only the three kinds below ever escape a `Session` method.

/// Errors that can surface out of [`crate::session::Session`].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The serial device could not be opened, or vanished mid-session.
    #[error("serial device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A read or write on the serial device failed.
    #[error("serial device I/O error: {0}")]
    DeviceIO(String),

    /// No valid response arrived within `max_retransmissions + 1` attempts.
    #[error("operation timed out after {0} retransmissions")]
    TimeoutExceeded(u32),
}
