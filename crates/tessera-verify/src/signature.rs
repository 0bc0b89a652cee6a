//! Signature verification for DSSE envelopes.
//!
//! ECDSA P-256 verification using `aws-lc-rs`, fully offline. Signatures
//! are checked over `PAE(payloadType, payload)`.

use aws_lc_rs::signature::{self, ECDSA_P256_SHA256_ASN1};
use tessera_craft::envelope::Envelope;
use tessera_craft::signer::{decode_p256_spki, keyid_for_spki, pem_to_der};

use crate::error::VerificationError;

/// A parsed P-256 verification key.
#[derive(Debug, Clone)]
pub struct PublicKey {
    spki_der: Vec<u8>,
    keyid: String,
}

impl PublicKey {
    /// Parse a PEM-encoded SPKI P-256 public key.
    pub fn from_pem(pem: &str) -> Result<Self, VerificationError> {
        let spki_der = pem_to_der(pem)
            .ok_or_else(|| VerificationError::InvalidSignature("invalid PEM public key".to_owned()))?;
        if decode_p256_spki(&spki_der).is_none() {
            return Err(VerificationError::InvalidSignature(
                "public key is not a P-256 SPKI".to_owned(),
            ));
        }
        let keyid = keyid_for_spki(&spki_der);
        Ok(Self { spki_der, keyid })
    }

    /// The `sha256:<hex>` identifier of this key.
    #[must_use]
    pub fn keyid(&self) -> &str {
        &self.keyid
    }

    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<(), VerificationError> {
        let raw_point = decode_p256_spki(&self.spki_der).ok_or_else(|| {
            VerificationError::InvalidSignature("public key is not a P-256 SPKI".to_owned())
        })?;
        signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, raw_point)
            .verify(message, sig)
            .map_err(|e| {
                VerificationError::InvalidSignature(format!("ECDSA verification failed: {e}"))
            })
    }
}

/// Verify that at least one envelope signature was made by `key`.
///
/// Returns the index of the first verifying signature. Signatures with a
/// `keyid` naming a different key are not tried.
pub fn verify_envelope(envelope: &Envelope, key: &PublicKey) -> Result<usize, VerificationError> {
    if envelope.signatures.is_empty() {
        return Err(VerificationError::InvalidSignature(
            "envelope carries no signatures".to_owned(),
        ));
    }

    let message = envelope.pae_bytes()?;
    let mut last_err = None;
    for (idx, sig) in envelope.signatures.iter().enumerate() {
        if sig.keyid.as_deref().is_some_and(|id| id != key.keyid()) {
            tracing::debug!(idx, keyid = ?sig.keyid, "skipping signature from another key");
            continue;
        }
        match sig.decode_sig() {
            Ok(bytes) => match key.verify(&message, &bytes) {
                Ok(()) => {
                    tracing::debug!(idx, keyid = key.keyid(), "signature verified");
                    return Ok(idx);
                }
                Err(e) => last_err = Some(e),
            },
            Err(e) => last_err = Some(e.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        VerificationError::InvalidSignature(format!("no signature from key {}", key.keyid()))
    }))
}
