//! The crypto engine abstraction driven by the session state machine.
//!
//! `engine` defines the trait capturing the would-block/timed-out/success
//! contract the handshake driver (§4.3) and record I/O (§4.4) are written
//! against. `noise_dtls` is the concrete engine built the way the teacher
//! builds its Noise_XX handshake (`snow::HandshakeState`/`TransportState`),
//! generalized to carry an OpenPGP certificate exchange and an
//! application-level heartbeat/alert framing layer.

pub mod engine;
pub mod noise_dtls;

pub use engine::{CryptoEngine, HandshakeStep, RecordStep, Role};
pub use noise_dtls::NoiseDtlsEngine;
