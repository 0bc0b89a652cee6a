//! Signing backends for attestation statements.
//!
//! [`sign_statement`] validates and canonically serializes a statement,
//! then hands the bytes to an injected [`Signer`] which produces the DSSE
//! envelope. The only backend shipped here is [`LocalSigner`], an ECDSA
//! P-256 key on disk for air-gapped use; remote KMS or keyless backends
//! implement the same trait.
//!
//! Uses `aws-lc-rs` as the cryptographic provider.

use std::path::{Path, PathBuf};

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair};
use base64::Engine;
use sha2::{Digest as _, Sha256};

use crate::canonical;
use crate::envelope::{Envelope, EnvelopeSignature, pae};
use crate::error::AttestationError;
use crate::statement::Statement;

/// A backend that turns payload bytes into a signed envelope.
///
/// Note: `async fn` in traits is stable in Rust 2024, so no `async-trait`
/// crate is needed. Remote backends are expected to await network I/O
/// here; retry and timeout policy belong to the caller.
#[expect(async_fn_in_trait, reason = "internal trait, all impls are Send")]
pub trait Signer: Send + Sync {
    /// Sign `payload` and wrap it in an envelope of `payload_type`.
    async fn sign(&self, payload_type: &str, payload: &[u8])
    -> Result<Envelope, AttestationError>;

    /// A human-readable description of this signing backend.
    fn description(&self) -> &'static str;
}

/// Validate, canonically serialize and sign a statement.
///
/// # Errors
///
/// - [`AttestationError::InvalidStatement`] for an empty subject list or
///   predicate type; nothing is handed to the backend in that case.
/// - Whatever the backend returns, unchanged.
pub async fn sign_statement<S: Signer>(
    statement: &Statement,
    signer: &S,
) -> Result<Envelope, AttestationError> {
    if statement.subject.is_empty() {
        return Err(AttestationError::InvalidStatement(
            "statement has no subjects".to_owned(),
        ));
    }
    if statement.predicate_type.is_empty() {
        return Err(AttestationError::InvalidStatement(
            "statement has no predicate type".to_owned(),
        ));
    }

    let payload = canonical::to_canonical_bytes(statement)?;
    let envelope = signer.sign(Statement::PAYLOAD_TYPE, &payload).await?;
    tracing::info!(
        backend = signer.description(),
        predicate_type = %statement.predicate_type,
        subjects = statement.subject.len(),
        "signed attestation"
    );
    Ok(envelope)
}

/// Local ECDSA P-256 signer backed by `aws-lc-rs`.
///
/// Loads or generates a signing key stored as PKCS#8 DER on disk,
/// wrapped in PEM encoding. The key file is created with mode `0o600`
/// (owner-only read/write).
pub struct LocalSigner {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
    keyid: String,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("keyid", &self.keyid)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Load an existing key from `key_path`, or generate a new one if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AttestationError::KeyError`] if:
    /// - The key file exists but cannot be parsed as PKCS#8
    /// - The key file cannot be created or written
    pub fn load_or_generate(key_path: &Path) -> Result<Self, AttestationError> {
        if key_path.exists() {
            let pem = std::fs::read_to_string(key_path)
                .map_err(|e| AttestationError::KeyError(format!("failed to read key file: {e}")))?;
            let signer = Self::from_pem(&pem)?;
            tracing::info!(path = %key_path.display(), keyid = %signer.keyid, "loaded existing signing key");
            return Ok(signer);
        }

        let rng = SystemRandom::new();
        let pkcs8_doc = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| AttestationError::KeyError(format!("failed to generate key: {e}")))?;

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AttestationError::KeyError(format!(
                    "failed to create key directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pem = der_to_pem(pkcs8_doc.as_ref(), "PRIVATE KEY");
        std::fs::write(key_path, pem.as_bytes())
            .map_err(|e| AttestationError::KeyError(format!("failed to write key file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(key_path, perms).map_err(|e| {
                AttestationError::KeyError(format!("failed to set key file permissions: {e}"))
            })?;
        }

        let signer = Self::from_pem(&pem)?;
        tracing::info!(path = %key_path.display(), keyid = %signer.keyid, "generated new signing key");
        Ok(signer)
    }

    /// Parse a PEM-wrapped PKCS#8 P-256 private key.
    pub fn from_pem(pem: &str) -> Result<Self, AttestationError> {
        let der = pem_to_der(pem)
            .ok_or_else(|| AttestationError::KeyError("invalid PEM format".to_owned()))?;
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &der)
            .map_err(|e| AttestationError::KeyError(format!("failed to parse PKCS#8 key: {e}")))?;
        let keyid = keyid_for_spki(&encode_p256_spki(key_pair.public_key().as_ref()));
        Ok(Self {
            key_pair,
            rng: SystemRandom::new(),
            keyid,
        })
    }

    /// The `sha256:<hex>` identifier placed in every signature.
    #[must_use]
    pub fn keyid(&self) -> &str {
        &self.keyid
    }

    /// The public key as PEM-encoded SPKI.
    #[must_use]
    pub fn public_key_pem(&self) -> String {
        // aws-lc-rs public_key() returns the uncompressed EC point, which
        // must be wrapped in an SPKI structure for PEM.
        let spki_der = encode_p256_spki(self.key_pair.public_key().as_ref());
        der_to_pem(&spki_der, "PUBLIC KEY")
    }
}

impl Signer for LocalSigner {
    async fn sign(
        &self,
        payload_type: &str,
        payload: &[u8],
    ) -> Result<Envelope, AttestationError> {
        let sig = self
            .key_pair
            .sign(&self.rng, &pae(payload_type, payload))
            .map_err(|e| AttestationError::SigningFailed(format!("ECDSA sign failed: {e}")))?;

        Ok(Envelope::new(
            payload_type,
            payload,
            vec![EnvelopeSignature::new(
                Some(self.keyid.clone()),
                sig.as_ref(),
            )],
        ))
    }

    fn description(&self) -> &'static str {
        "local ECDSA P-256 (aws-lc)"
    }
}

/// Key identifier for an SPKI DER public key: `sha256:<hex>`.
#[must_use]
pub fn keyid_for_spki(spki_der: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(spki_der)))
}

/// Default key path: `<config dir>/tessera/keys/local.pem`.
#[must_use]
pub fn default_key_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "tessera", "tessera").map_or_else(
        || {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
            PathBuf::from(home).join(".config/tessera/keys/local.pem")
        },
        |dirs| dirs.config_dir().join("keys/local.pem"),
    )
}

// ── PEM helpers ──────────────────────────────────────────────────────

/// Wrap DER bytes in PEM with the given label.
#[must_use]
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    use std::fmt::Write;

    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    // base64 output is ASCII, so splitting on byte offsets is char-safe.
    let mut rest = b64.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(64));
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    let _ = writeln!(pem, "-----END {label}-----");
    pem
}

/// Extract DER bytes from a PEM string.
#[must_use]
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let mut b64 = String::new();
    let mut in_body = false;

    for line in pem.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            in_body = true;
            continue;
        }
        if trimmed.starts_with("-----END ") {
            break;
        }
        if in_body {
            b64.push_str(trimmed);
        }
    }

    if !in_body {
        return None;
    }
    base64::engine::general_purpose::STANDARD.decode(&b64).ok()
}

/// Fixed SPKI header for a P-256 uncompressed public key.
///
/// ```text
/// SEQUENCE {
///   SEQUENCE {
///     OID 1.2.840.10045.2.1  (id-ecPublicKey)
///     OID 1.2.840.10045.3.1.7 (prime256v1)
///   }
///   BIT STRING <public key>
/// }
/// ```
#[rustfmt::skip]
const P256_SPKI_HEADER: [u8; 26] = [
    0x30, 0x59,                                     // SEQUENCE (89 bytes total)
    0x30, 0x13,                                     // SEQUENCE (19 bytes)
    0x06, 0x07,                                     // OID (7 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01,     // 1.2.840.10045.2.1
    0x06, 0x08,                                     // OID (8 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // 1.2.840.10045.3.1.7
    0x03, 0x42, 0x00,                               // BIT STRING (66 bytes, 0 unused bits)
];

/// Encode a raw P-256 public key (uncompressed point, 65 bytes) as
/// `SubjectPublicKeyInfo` (SPKI) DER.
#[must_use]
pub fn encode_p256_spki(pub_key: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(P256_SPKI_HEADER.len() + pub_key.len());
    spki.extend_from_slice(&P256_SPKI_HEADER);
    spki.extend_from_slice(pub_key);
    spki
}

/// Strip the fixed P-256 SPKI header, returning the raw EC point.
///
/// Returns `None` if `spki_der` is not a P-256 SPKI.
#[must_use]
pub fn decode_p256_spki(spki_der: &[u8]) -> Option<&[u8]> {
    spki_der
        .strip_prefix(&P256_SPKI_HEADER[..])
        .filter(|point| point.len() == 65)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::ResourceDescriptor;

    /// Test backend that records nothing and must never be reached.
    struct Unreachable;

    impl Signer for Unreachable {
        async fn sign(&self, _: &str, _: &[u8]) -> Result<Envelope, AttestationError> {
            panic!("backend must not be called for invalid statements")
        }

        fn description(&self) -> &'static str {
            "unreachable"
        }
    }

    fn test_statement() -> Statement {
        Statement {
            statement_type: Statement::TYPE_V1.to_owned(),
            subject: vec![ResourceDescriptor::with_digest("test.txt", "sha256", "abc123")],
            predicate_type: "https://tessera.dev/attestation/v1".to_owned(),
            predicate: serde_json::json!({ "b": 1, "a": 2 }),
        }
    }

    #[test]
    fn generate_key_in_tempdir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let key_path = tmp.path().join("keys/local.pem");

        let signer = LocalSigner::load_or_generate(&key_path).expect("key gen should succeed");

        assert!(key_path.exists(), "key file should be created");
        assert_eq!(signer.description(), "local ECDSA P-256 (aws-lc)");
        assert!(signer.keyid().starts_with("sha256:"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&key_path).expect("metadata");
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn load_existing_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let key_path = tmp.path().join("local.pem");

        let signer1 = LocalSigner::load_or_generate(&key_path).expect("gen");
        let signer2 = LocalSigner::load_or_generate(&key_path).expect("load");

        assert_eq!(signer1.public_key_pem(), signer2.public_key_pem());
        assert_eq!(signer1.keyid(), signer2.keyid());
    }

    #[test]
    fn garbage_key_file_is_a_key_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let key_path = tmp.path().join("local.pem");
        std::fs::write(&key_path, "not a key").unwrap();
        assert!(matches!(
            LocalSigner::load_or_generate(&key_path),
            Err(AttestationError::KeyError(_))
        ));
    }

    #[tokio::test]
    async fn signature_covers_pae_of_canonical_payload() {
        use aws_lc_rs::signature::{self, ECDSA_P256_SHA256_ASN1};

        let tmp = tempfile::tempdir().expect("tempdir");
        let signer = LocalSigner::load_or_generate(&tmp.path().join("local.pem")).expect("gen");
        let statement = test_statement();

        let envelope = sign_statement(&statement, &signer)
            .await
            .expect("sign should succeed");

        let payload = envelope.decode_payload().unwrap();
        assert_eq!(payload, canonical::to_canonical_bytes(&statement).unwrap());
        assert_eq!(envelope.payload_type, Statement::PAYLOAD_TYPE);
        assert_eq!(envelope.signatures.len(), 1);
        assert_eq!(envelope.signatures[0].keyid.as_deref(), Some(signer.keyid()));

        let sig = envelope.signatures[0].decode_sig().unwrap();
        let public_key = signature::UnparsedPublicKey::new(
            &ECDSA_P256_SHA256_ASN1,
            signer.key_pair.public_key().as_ref(),
        );
        public_key
            .verify(&envelope.pae_bytes().unwrap(), &sig)
            .expect("signature verification should succeed");
        assert!(
            public_key.verify(&payload, &sig).is_err(),
            "bare payload must not verify"
        );
    }

    #[tokio::test]
    async fn empty_subject_is_rejected_before_signing() {
        let mut statement = test_statement();
        statement.subject.clear();
        assert!(matches!(
            sign_statement(&statement, &Unreachable).await,
            Err(AttestationError::InvalidStatement(_))
        ));
    }

    #[tokio::test]
    async fn empty_predicate_type_is_rejected_before_signing() {
        let mut statement = test_statement();
        statement.predicate_type.clear();
        assert!(matches!(
            sign_statement(&statement, &Unreachable).await,
            Err(AttestationError::InvalidStatement(_))
        ));
    }

    #[test]
    fn pem_round_trip() {
        let data = [7_u8; 100];
        let pem = der_to_pem(&data, "TEST");
        assert!(pem.lines().all(|l| l.len() <= 64 || l.starts_with("-----")));
        assert_eq!(pem_to_der(&pem).expect("should parse PEM"), data);
        assert!(pem_to_der("no armor").is_none());
    }

    #[test]
    fn spki_round_trip() {
        let point = [4_u8; 65];
        let spki = encode_p256_spki(&point);
        assert_eq!(decode_p256_spki(&spki), Some(&point[..]));
        assert!(decode_p256_spki(&spki[1..]).is_none());
    }

    #[test]
    fn default_key_path_is_sensible() {
        let path_str = default_key_path().display().to_string();
        assert!(path_str.contains("tessera"), "got {path_str}");
        assert!(path_str.ends_with("local.pem"), "got {path_str}");
    }
}
