//! # tunnel-session
//!
//! The secure datagram session core of a peer-to-peer overlay gateway: one
//! [`Session`] per authenticated, datagram-oriented tunnel to a remote peer.
//!
//! This crate provides:
//! - **Session lifecycle**: server/client construction, candidate-endpoint
//!   fan-out on handshake timeout, and a reference-counted, self-owned
//!   destruction path with a deferred grace period.
//! - **Transport shim**: the single-datagram pull buffer bridging a
//!   synchronous, step-driven crypto engine to an async datagram transport.
//! - **Handshake driver**: retry cadence, hard deadline, and per-result
//!   branching (would-block / timed-out / success / error).
//! - **Record I/O**: serialized encrypt/decrypt, heartbeat and alert
//!   dispatch.
//! - **Liveness**: periodic heartbeat pings with a missed-pong counter.
//! - **Verification**: OpenPGP certificate parsing, keyring-backed trust,
//!   subkey matching, UID validity, and overlay-prefix derivation.
//!
//! ## Module structure
//!
//! - [`session`]: the `Session` state machine — lifecycle, handshake
//!   driving, record I/O, liveness.
//! - [`crypto`]: the synchronous crypto engine contract and its concrete
//!   Noise-based implementation.
//! - [`transport`]: the single-datagram pull buffer shim.
//! - [`verify`]: the certificate verification callback and prefix
//!   derivation.
//! - [`cert`]: OpenPGP certificate parsing and key-state queries.
//! - [`keyring`]: local keyring and keyserver collaborator interfaces.
//! - [`gateway`]: the external Gateway contract and an in-memory test
//!   double.
//! - [`config`]: verification policy and session timing configuration.
//! - [`timer`]: the rearmable, cancel-safe timer primitive.
//! - [`error`]: the crate's error taxonomy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cert;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod keyring;
pub mod session;
pub mod timer;
pub mod transport;
pub mod verify;

pub use cert::{CertError, Certificate, KeyState};
pub use config::{SessionTimeouts, VerificationPolicy};
pub use crypto::{CryptoEngine, HandshakeStep, NoiseDtlsEngine, RecordStep, Role};
pub use error::{Result, SessionError};
pub use gateway::{Credentials, Gateway, MemoryGateway, Prefix, RouteHandle};
pub use keyring::{Keyring, Keyserver, LocalKey, MemoryKeyring, NullKeyserver};
pub use session::{Session, SessionDeps};
pub use verify::{derive_prefix, CertAlert, CertificateError, VerificationOutcome};
