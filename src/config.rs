//! Session configuration.
//!
//! Two grouped, `Default`-derived configuration structs, following the
//! corpus convention of plumbing policy through construction rather than
//! reading ambient global state from inside the verification callback.

use std::path::PathBuf;
use std::time::Duration;

/// Policy controlling how peer certificates are verified (§4.6 of the
/// specification).
///
/// This is the per-gateway equivalent of the `import` / `keyserver` /
/// `validity` configuration keys consumed by the original verification
/// callback, plumbed explicitly instead of read from global config so that
/// a `Session` is fully testable in isolation.
#[derive(Debug, Clone, Default)]
pub struct VerificationPolicy {
    /// When set, the raw certificate bytes presented by the peer are
    /// imported into the local keyring before the fingerprint lookup.
    pub import: Option<PathBuf>,

    /// When set, an unresolved fingerprint is looked up against this
    /// keyserver before falling back to a local-lookup failure.
    pub keyserver: Option<String>,

    /// Minimum acceptable UID validity level (0 = unknown/none, 4 = ultimate).
    pub min_validity: u8,
}

/// Timing constants for the datagram-TLS-style handshake, heartbeat, and
/// deferred-destruction timers.
///
/// Mirrors the corpus's grouped `*Config` structs (e.g. `TransportConfig`)
/// with one field per named timeout and a `Default` matching the values
/// fixed by the specification.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// Handshake retransmit interval (§6: 500 ms).
    pub retransmit: Duration,

    /// Hard deadline from the first handshake retry to forced termination
    /// (§4.3: 10 s).
    pub handshake_deadline: Duration,

    /// Heartbeat ping cadence once the handshake has completed (§4.5: 30 s).
    pub heartbeat_interval: Duration,

    /// Grace period between `terminate()` and final destruction (§4.1: 3 s).
    pub destroy_grace: Duration,

    /// Number of consecutive missed pongs that triggers termination (§4.5: >3).
    pub missed_ping_limit: u8,

    /// Data MTU installed once the handshake completes (§4.3/§6: 1280 bytes).
    pub data_mtu: usize,

    /// Heartbeat ping payload size (§4.5: 256 bytes).
    pub heartbeat_payload_len: usize,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            retransmit: Duration::from_millis(500),
            handshake_deadline: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            destroy_grace: Duration::from_secs(3),
            missed_ping_limit: 3,
            data_mtu: 1280,
            heartbeat_payload_len: 256,
        }
    }
}
