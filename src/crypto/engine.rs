//! The crypto engine contract (§4.2, §4.3, §4.4): a synchronous, step-driven
//! handshake and record API, bridged to the async gateway transport by
//! [`crate::session::Session`] rather than by the engine itself.
//!
//! Unlike the datagram-TLS library the specification describes, this
//! engine's "push" direction is not a callback: each step simply returns
//! the bytes (if any) that need to be transmitted, and the caller performs
//! the actual async `Gateway::send`. This keeps the engine itself fully
//! synchronous — matching how `snow::HandshakeState`/`TransportState` (the
//! library this engine is built on, see `noise_dtls.rs`) actually works —
//! while preserving the "pull once, would-block otherwise" contract on the
//! read side via [`crate::transport::PullBuffer`].

use std::time::Duration;

use crate::error::Result;
use crate::transport::PullBuffer;

/// Which side of the handshake this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake (client).
    Client,
    /// Accepts an incoming handshake (server).
    Server,
}

/// Outcome of one `handshake_step` call (§4.3).
pub enum HandshakeStep {
    /// No progress was possible this call (either nothing to read, or a
    /// flight was (re)transmitted and we're awaiting the peer's reply).
    /// `outgoing` carries bytes to transmit, if any were produced.
    /// `waiting_to_write` mirrors the DTLS library's "direction" flag used
    /// by the handshake driver to decide whether to re-arm the retry timer.
    WouldBlock {
        outgoing: Option<Vec<u8>>,
        waiting_to_write: bool,
    },
    /// The handshake has been outstanding past its hard deadline.
    TimedOut,
    /// The handshake completed on this call. `outgoing` carries any final
    /// handshake bytes that must still be sent.
    Complete { outgoing: Option<Vec<u8>> },
}

/// Outcome of one `record_recv` call (§4.4).
pub enum RecordStep {
    /// `n` decrypted bytes were written to the caller's scratch buffer.
    Data(usize),
    /// No complete record was available.
    WouldBlock,
    /// A heartbeat ping was received; caller should send a pong.
    HeartbeatPingReceived,
    /// A heartbeat pong was received; caller should reset `pings_missed`.
    HeartbeatPongReceived,
    /// An alert was received. `fatal` distinguishes fatal from warning
    /// alerts, though the session driver intentionally does not (§9, open
    /// question: alert severity on receive).
    Alert { fatal: bool },
    /// End of session (peer shutdown) or any other unrecoverable condition.
    Eof,
}

/// The crypto engine contract driven by [`crate::session::Session`].
///
/// All methods are synchronous; none perform I/O themselves. Transmission
/// of any bytes a method returns is the caller's responsibility (see the
/// module docs above).
pub trait CryptoEngine: Send {
    /// Which side of the handshake this engine plays.
    fn role(&self) -> Role;

    /// Whether the handshake has completed.
    fn is_handshake_complete(&self) -> bool;

    /// Raw certificate bytes presented by the peer, available once the
    /// peer's certificate message has been processed (before the overall
    /// handshake necessarily completes — the verification callback runs
    /// mid-handshake, as in real datagram-TLS libraries).
    fn peer_certificate(&self) -> Option<&[u8]>;

    /// Advance the handshake by one step, consuming from `pull` if a
    /// datagram is pending.
    fn handshake_step(&mut self, pull: &mut PullBuffer) -> Result<HandshakeStep>;

    /// Install the data MTU once the handshake completes (§4.3, §6: 1280
    /// bytes). Fragmentation above this size is the engine's responsibility.
    fn set_data_mtu(&mut self, mtu: usize);

    /// Encrypt `plaintext` for transmission, returning the ciphertext
    /// datagram(s) to send. Fragmented per the installed data MTU.
    fn record_send(&mut self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Decrypt one pending datagram from `pull` into `dst`.
    fn record_recv(&mut self, pull: &mut PullBuffer, dst: &mut [u8]) -> Result<RecordStep>;

    /// Build a heartbeat ping of `payload_len` bytes.
    fn heartbeat_ping(&mut self, payload_len: usize) -> Result<Vec<u8>>;

    /// Build a heartbeat pong in reply to a received ping.
    fn heartbeat_pong(&mut self) -> Result<Vec<u8>>;

    /// Build a bidirectional shutdown alert (best-effort; failures are
    /// ignored by the caller since the session is tearing down regardless).
    fn shutdown_alert(&mut self) -> Vec<u8>;

    /// The engine's current retransmit delay recommendation (§6: 500 ms
    /// default, doubling per retry up to the handshake deadline).
    fn retransmit_delay(&self) -> Duration;

    /// Whether the engine is currently "waiting to write": it has an
    /// outstanding flight the peer hasn't acknowledged and would retransmit
    /// if asked to step again with no new input. The handshake driver uses
    /// this to decide whether to re-arm the retry timer (§4.3, §9).
    fn waiting_to_write(&self) -> bool;
}
