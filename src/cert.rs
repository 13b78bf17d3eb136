//! OpenPGP certificate parsing, fingerprints, and subkey/validity queries.
//!
//! Built on `sequoia-openpgp`, the OpenPGP implementation used elsewhere in
//! the retrieved corpus (see `other_examples/d892c89a_dirkz-sequoia`). This
//! module is the certificate-shaped counterpart to the teacher's
//! `wraith-crypto` key types: where the teacher's `NoiseKeypair` wraps a
//! raw X25519 keypair, `Certificate` wraps a parsed OpenPGP certificate and
//! exposes exactly the queries the verification callback (§4.6) needs.

use std::time::SystemTime;

use sequoia_openpgp as openpgp;
use openpgp::cert::Cert;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::types::RevocationStatus;
use openpgp::Fingerprint;

use thiserror::Error;

/// Errors parsing or inspecting an OpenPGP certificate.
#[derive(Debug, Error)]
pub enum CertError {
    /// The raw bytes did not parse as a valid OpenPGP certificate.
    #[error("malformed OpenPGP certificate: {0}")]
    Malformed(String),
}

/// Aliveness/trust state of a (sub)key, as seen through the standard policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Key is usable.
    Good,
    /// Key (or its binding signature) has expired.
    Expired,
    /// Key has been revoked (hard or soft).
    Revoked,
    /// Key is locally disabled, structurally invalid, or (for subkeys)
    /// lacks the authentication capability flag.
    Unusable,
}

/// A parsed OpenPGP certificate, plus the queries the verification callback
/// (§4.6) needs: fingerprint, subkey enumeration, and UID validity.
pub struct Certificate {
    cert: Cert,
    policy: StandardPolicy<'static>,
}

impl Certificate {
    /// Parse a certificate from its raw (binary or armored) representation.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CertError> {
        let cert = Cert::from_bytes(raw).map_err(|e| CertError::Malformed(e.to_string()))?;
        Ok(Self {
            cert,
            policy: StandardPolicy::new(),
        })
    }

    /// The certificate's primary-key fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.cert.fingerprint()
    }

    /// Hex-encoded fingerprint, lowercase, no separators (§4.6 step 4).
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.cert.fingerprint().as_bytes())
    }

    /// State of the primary key under the standard policy (§4.6 step 7).
    #[must_use]
    pub fn primary_key_state(&self) -> KeyState {
        let valid = match self.cert.with_policy(&self.policy, None) {
            Ok(v) => v,
            Err(_) => return KeyState::Unusable,
        };
        let expiration = valid.primary_key().key_expiration_time();
        revocation_or_expiry(valid.revocation_status(), expiration)
    }

    /// Subkeys as `(fingerprint_hex, KeyState, can_authenticate)` triples,
    /// for the subkey-match loop in §4.6 step 8.
    #[must_use]
    pub fn subkeys(&self) -> Vec<(String, KeyState, bool)> {
        let valid_cert = match self.cert.with_policy(&self.policy, None) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        valid_cert
            .keys()
            .subkeys()
            .map(|ka| {
                let fp_hex = hex::encode(ka.key().fingerprint().as_bytes());
                let can_auth = ka.for_authentication();
                let state = if !can_auth {
                    KeyState::Unusable
                } else {
                    revocation_or_expiry(ka.revocation_status(), ka.key_expiration_time())
                };
                (fp_hex, state, can_auth)
            })
            .collect()
    }

    /// Maximum validity level across all UIDs (§4.6 step 9).
    ///
    /// `sequoia-openpgp` deliberately implements no web-of-trust validity
    /// scale of its own (see its crate docs: trust models are left to
    /// higher layers). This maps each UID onto a 0-4 scale from its
    /// strongest surviving self-certification under the standard policy:
    /// 0 = no self-certification validates under the policy, 4 = at least
    /// one does. Intermediate levels are reserved for a future trust-signature
    /// walk and are not produced by this implementation.
    #[must_use]
    pub fn max_uid_validity(&self) -> u8 {
        let valid_cert = match self.cert.with_policy(&self.policy, None) {
            Ok(v) => v,
            Err(_) => return 0,
        };
        let any_valid_uid = valid_cert.userids().any(|ua| {
            ua.binding_signature().typ() == openpgp::types::SignatureType::PositiveCertification
                || ua.binding_signature().typ() == openpgp::types::SignatureType::GenericCertification
        });
        u8::from(any_valid_uid) * 4
    }
}

fn revocation_or_expiry(status: RevocationStatus<'_>, expiration: Option<SystemTime>) -> KeyState {
    match status {
        RevocationStatus::Revoked(_) => KeyState::Revoked,
        RevocationStatus::CouldBe(_) | RevocationStatus::NotAsFarAsWeKnow => {
            if expiration.is_some_and(|t| t <= SystemTime::now()) {
                KeyState::Expired
            } else {
                KeyState::Good
            }
        }
    }
}
