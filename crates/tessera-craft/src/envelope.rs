//! DSSE (Dead Simple Signing Envelope) encoding.
//!
//! See: <https://github.com/secure-systems-lab/dsse/blob/master/envelope.md>
//!
//! Signatures cover `PAE(payloadType, payload)`, never the bare payload,
//! so a signature cannot be replayed under a different payload type.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::AttestationError;
use crate::statement::Statement;

/// A signed envelope as written to disk and handed to verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Base64-encoded payload bytes.
    pub payload: String,
    /// Media type of the payload.
    pub payload_type: String,
    /// One or more signatures over the PAE.
    pub signatures: Vec<EnvelopeSignature>,
}

/// One signature in an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Identifies the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    /// Base64-encoded signature bytes.
    pub sig: String,
}

impl EnvelopeSignature {
    /// Wrap raw signature bytes.
    #[must_use]
    pub fn new(keyid: Option<String>, sig: &[u8]) -> Self {
        Self {
            keyid,
            sig: STANDARD.encode(sig),
        }
    }

    /// Decode the signature bytes.
    pub fn decode_sig(&self) -> Result<Vec<u8>, AttestationError> {
        STANDARD
            .decode(&self.sig)
            .map_err(|e| AttestationError::InvalidEnvelope(format!("signature is not base64: {e}")))
    }
}

impl Envelope {
    /// Build an envelope around `payload` with the given signatures.
    #[must_use]
    pub fn new(payload_type: &str, payload: &[u8], signatures: Vec<EnvelopeSignature>) -> Self {
        Self {
            payload: STANDARD.encode(payload),
            payload_type: payload_type.to_owned(),
            signatures,
        }
    }

    /// Parse an envelope from JSON.
    pub fn from_json(json: &[u8]) -> Result<Self, AttestationError> {
        let envelope: Self = serde_json::from_slice(json)?;
        if envelope.payload_type.is_empty() {
            return Err(AttestationError::InvalidEnvelope(
                "empty payloadType".to_owned(),
            ));
        }
        Ok(envelope)
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String, AttestationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode the payload bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, AttestationError> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| AttestationError::InvalidEnvelope(format!("payload is not base64: {e}")))
    }

    /// The bytes every signature is computed over.
    pub fn pae_bytes(&self) -> Result<Vec<u8>, AttestationError> {
        Ok(pae(&self.payload_type, &self.decode_payload()?))
    }

    /// Decode the payload as an in-toto statement.
    ///
    /// # Errors
    ///
    /// [`AttestationError::InvalidEnvelope`] if the payload type is not
    /// in-toto or the payload is not base64; a JSON error if the payload is
    /// not a statement.
    pub fn statement(&self) -> Result<Statement, AttestationError> {
        if self.payload_type != Statement::PAYLOAD_TYPE {
            return Err(AttestationError::InvalidEnvelope(format!(
                "expected payloadType {}, got {}",
                Statement::PAYLOAD_TYPE,
                self.payload_type
            )));
        }
        Ok(serde_json::from_slice(&self.decode_payload()?)?)
    }
}

/// Compute the DSSE Pre-Authentication Encoding.
///
/// ```text
/// PAE(type, body) = "DSSEv1" SP LEN(type) SP type SP LEN(body) SP body
/// ```
///
/// `SP` is ASCII space and `LEN` the decimal byte length.
#[must_use]
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    );
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}
