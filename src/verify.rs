//! The verification callback (§4.6): the certificate-acceptance gate run
//! mid-handshake, deciding whether a peer is who it claims to be and, if
//! so, deriving its overlay prefix.
//!
//! Grounded on the teacher's own certificate-checking path
//! (`wraith-crypto::noise` static-key verification) generalized from a bare
//! public-key comparison to the fuller OpenPGP chain described by the
//! specification: type check, import, fingerprint, keyserver fallback,
//! local lookup, key-state gate, subkey match, and UID validity — ending in
//! the same kind of prefix derivation the teacher derives peer identities
//! from.

use thiserror::Error;

use crate::cert::{Certificate, KeyState};
use crate::config::VerificationPolicy;
use crate::gateway::Prefix;
use crate::keyring::{Keyring, Keyserver};

/// One of the named alerts the specification sends before rejecting a
/// peer's certificate (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertAlert {
    /// The peer did not present an OpenPGP certificate (§4.6 step 1).
    UnsupportedCertificate,
    /// The peer's chain did not contain exactly one certificate (step 2).
    BadCertificate,
    /// The peer's key, or the matched subkey, is revoked (steps 7, 8).
    CertificateRevoked,
    /// The peer's key, or the matched subkey, has expired (steps 7, 8, 9).
    CertificateExpired,
    /// The matched subkey cannot authenticate or is otherwise unusable
    /// (step 8).
    CertificateUnknown,
}

impl CertAlert {
    /// A one-byte wire tag for the handshake-layer alert message. Sent in
    /// the clear, ahead of any transport-mode framing — real datagram-TLS
    /// alerts are handshake-layer, not application-layer, so this is
    /// distinct from the post-handshake record alert frames in
    /// `crypto::noise_dtls`.
    #[must_use]
    pub fn wire_tag(self) -> u8 {
        match self {
            Self::UnsupportedCertificate => 1,
            Self::BadCertificate => 2,
            Self::CertificateRevoked => 3,
            Self::CertificateExpired => 4,
            Self::CertificateUnknown => 5,
        }
    }
}

/// Why verification rejected a peer certificate (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("unsupported-certificate")]
    UnsupportedCertificate,
    #[error("bad-certificate")]
    BadCertificate,
    #[error("certificate-revoked")]
    CertificateRevoked,
    #[error("certificate-expired")]
    CertificateExpired,
    #[error("certificate-unknown")]
    CertificateUnknown,
    /// Fingerprint not found in the local keyring. Per step 6, this is a
    /// hard reject with **no** alert sent.
    #[error("certificate not found in local keyring")]
    NotFound,
}

impl CertificateError {
    /// The alert to send before rejecting, or `None` for the not-found case
    /// (step 6 is explicitly a silent reject).
    #[must_use]
    pub fn alert(&self) -> Option<CertAlert> {
        match self {
            Self::UnsupportedCertificate => Some(CertAlert::UnsupportedCertificate),
            Self::BadCertificate => Some(CertAlert::BadCertificate),
            Self::CertificateRevoked => Some(CertAlert::CertificateRevoked),
            Self::CertificateExpired => Some(CertAlert::CertificateExpired),
            Self::CertificateUnknown => Some(CertAlert::CertificateUnknown),
            Self::NotFound => None,
        }
    }
}

/// Successful verification result: the trusted local copy of the peer's
/// certificate plus its derived overlay identity.
pub struct VerificationOutcome {
    /// The locally-trusted copy of the peer's certificate (not necessarily
    /// byte-identical to what the peer presented).
    pub certificate: Certificate,
    /// Hex-encoded fingerprint of the presented certificate.
    pub fingerprint_hex: String,
    /// The peer's derived overlay prefix (step 10).
    pub prefix: Prefix,
}

/// Derive the 64-bit overlay prefix from a certificate fingerprint (§4.6
/// step 10, §6, §8 boundary scenario 5): bytes `[4, 12)` of the
/// fingerprint, with the leading byte overwritten by `0xFC`.
///
/// Equivalently, `0xFC || fingerprint[5..12)` (§8's round-trip property) —
/// byte 4 is discarded entirely, replaced by the fixed `0xFC` marker.
#[must_use]
pub fn derive_prefix(fingerprint: &[u8]) -> Option<Prefix> {
    let window = fingerprint.get(4..12)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(window);
    bytes[0] = 0xFC;
    Some(Prefix(u64::from_be_bytes(bytes)))
}

/// Run the certificate verification callback (§4.6, steps 1-11).
///
/// `cert_chain_len` is the number of certificates the peer presented
/// (step 2 requires exactly one); `raw_cert` is that certificate's raw
/// bytes; `advertised_subkey_hex` is the peer's advertised subkey id,
/// hex-encoded, whose last 16 hex characters must match a subkey's
/// fingerprint tail (step 8).
pub async fn verify_peer_certificate(
    is_openpgp: bool,
    cert_chain_len: usize,
    raw_cert: &[u8],
    advertised_subkey_hex: &str,
    policy: &VerificationPolicy,
    keyring: &dyn Keyring,
    keyserver: Option<&dyn Keyserver>,
) -> Result<VerificationOutcome, CertificateError> {
    // Step 1: certificate type.
    if !is_openpgp {
        return Err(CertificateError::UnsupportedCertificate);
    }

    // Step 2: exactly one certificate in the chain.
    if cert_chain_len != 1 {
        return Err(CertificateError::BadCertificate);
    }

    // Step 3: optional import of the presented bytes, ahead of lookup.
    if policy.import.is_some() {
        keyring.import(raw_cert).await;
    }

    // Step 4: parse and fingerprint.
    let presented = Certificate::from_bytes(raw_cert).map_err(|_| CertificateError::BadCertificate)?;
    let fingerprint_hex = presented.fingerprint_hex();

    // Step 5: optional keyserver fallback, importing whatever it returns.
    if policy.keyserver.is_some() {
        if let Some(ks) = keyserver {
            if let Some(fetched) = ks.fetch(&fingerprint_hex).await {
                keyring.import(&fetched).await;
            }
        }
    }

    // Step 6: local lookup. Not-found is a silent reject.
    let local = keyring
        .lookup(&fingerprint_hex)
        .await
        .ok_or(CertificateError::NotFound)?;

    // Step 7: key state gate on the primary key.
    if local.disabled || local.invalid || local.certificate.primary_key_state() == KeyState::Revoked
    {
        return Err(CertificateError::CertificateRevoked);
    }
    if local.certificate.primary_key_state() == KeyState::Expired {
        return Err(CertificateError::CertificateExpired);
    }

    // Step 8: subkey match against the peer's advertised subkey id.
    let tail = advertised_subkey_hex.to_ascii_lowercase();
    let matched = local
        .certificate
        .subkeys()
        .into_iter()
        .find(|(fp_hex, _, _)| fp_hex.ends_with(&tail));
    match matched {
        None => return Err(CertificateError::CertificateRevoked),
        Some((_, state, can_authenticate)) => {
            if !can_authenticate || state == KeyState::Unusable {
                return Err(CertificateError::CertificateUnknown);
            }
            match state {
                KeyState::Expired => return Err(CertificateError::CertificateExpired),
                KeyState::Revoked => return Err(CertificateError::CertificateRevoked),
                KeyState::Good | KeyState::Unusable => {}
            }
        }
    }

    // Step 9: UID validity floor.
    if local.certificate.max_uid_validity() < policy.min_validity {
        return Err(CertificateError::CertificateExpired);
    }

    // Step 10: prefix derivation.
    let prefix = derive_prefix(presented.fingerprint().as_bytes())
        .ok_or(CertificateError::BadCertificate)?;

    // Step 11 (registration) is the caller's responsibility (`Session`
    // holds the `Gateway` reference this callback does not).
    Ok(VerificationOutcome {
        certificate: local.certificate,
        fingerprint_hex,
        prefix,
    })
}
