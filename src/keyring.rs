//! Keyring/keyserver external collaborators (§1, §4.6 steps 3/5/6).
//!
//! Out of scope per the specification ("keyring/keyserver subsystem:
//! import/lookup of OpenPGP keys"); this module defines the interfaces the
//! verification path consumes, plus an in-memory test double.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cert::Certificate;

/// A key record as returned by a local keyring lookup: the certificate
/// itself plus the local trust-database flags that are not properties of
/// the certificate bytes (disabled/invalid are keyring-local annotations,
/// distinct from the certificate's own revocation/expiry state exposed by
/// [`Certificate`]).
pub struct LocalKey {
    /// The certificate as known to the local keyring. May differ from the
    /// peer-presented certificate (e.g. carry more UIDs or a revocation
    /// the peer didn't send) since it's the locally-trusted copy.
    pub certificate: Certificate,
    /// Locally disabled (operator action), independent of certificate
    /// content.
    pub disabled: bool,
    /// Locally marked invalid (e.g. failed an out-of-band integrity check).
    pub invalid: bool,
}

/// Local keyring: import and fingerprint lookup (§4.6 steps 3, 6).
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Import raw certificate bytes into the local keyring (step 3).
    async fn import(&self, raw: &[u8]);

    /// Look up a previously-imported (or otherwise known) key by its
    /// hex-encoded fingerprint (step 6). `None` means "not found" and is a
    /// hard reject with no alert, per the specification.
    async fn lookup(&self, fingerprint_hex: &str) -> Option<LocalKey>;
}

/// Keyserver: fetch-by-fingerprint (§4.6 step 5).
#[async_trait]
pub trait Keyserver: Send + Sync {
    /// Fetch a certificate by fingerprint from the keyserver named by
    /// `VerificationPolicy::keyserver`. Returns the raw certificate bytes
    /// if found.
    async fn fetch(&self, fingerprint_hex: &str) -> Option<Vec<u8>>;
}

/// In-memory keyring used by this crate's own tests. Keyed by hex
/// fingerprint; entries are installed directly by tests rather than via
/// `import`, except where exercising the import path itself.
#[derive(Default)]
pub struct MemoryKeyring {
    raw_by_fingerprint: Mutex<HashMap<String, Vec<u8>>>,
    flags: Mutex<HashMap<String, (bool, bool)>>,
}

impl MemoryKeyring {
    /// Create an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the keyring with a certificate and its local disabled/invalid
    /// flags, as if it had been imported out of band.
    pub fn seed(&self, raw: Vec<u8>, disabled: bool, invalid: bool) {
        if let Ok(cert) = Certificate::from_bytes(&raw) {
            let fp = cert.fingerprint_hex();
            self.raw_by_fingerprint.lock().unwrap().insert(fp.clone(), raw);
            self.flags.lock().unwrap().insert(fp, (disabled, invalid));
        }
    }
}

#[async_trait]
impl Keyring for MemoryKeyring {
    async fn import(&self, raw: &[u8]) {
        if let Ok(cert) = Certificate::from_bytes(raw) {
            let fp = cert.fingerprint_hex();
            self.raw_by_fingerprint
                .lock()
                .unwrap()
                .insert(fp.clone(), raw.to_vec());
            self.flags.lock().unwrap().entry(fp).or_insert((false, false));
        }
    }

    async fn lookup(&self, fingerprint_hex: &str) -> Option<LocalKey> {
        let raw = self.raw_by_fingerprint.lock().unwrap().get(fingerprint_hex)?.clone();
        let (disabled, invalid) = self
            .flags
            .lock()
            .unwrap()
            .get(fingerprint_hex)
            .copied()
            .unwrap_or((false, false));
        let certificate = Certificate::from_bytes(&raw).ok()?;
        Some(LocalKey {
            certificate,
            disabled,
            invalid,
        })
    }
}

/// Keyserver test double that never finds anything; used by tests that
/// exercise the local-lookup-miss path without a keyserver configured.
#[derive(Default)]
pub struct NullKeyserver;

#[async_trait]
impl Keyserver for NullKeyserver {
    async fn fetch(&self, _fingerprint_hex: &str) -> Option<Vec<u8>> {
        None
    }
}
