//! Verification and inspection of signed tessera attestations.
//!
//! `tessera-verify` checks DSSE signatures, extracts the version-agnostic
//! predicate from either supported predicate schema, and compares the
//! attested output digests against files on disk.
//!
//! The verification pipeline has three phases:
//! 1. **Signature**: ECDSA P-256 over the DSSE pre-authentication encoding
//! 2. **Extraction**: strict decoding of the predicate into a
//!    [`tessera_craft::render::NormalizedPredicate`]
//! 3. **Digests**: SHA-256 of file-backed output subjects

pub mod digest;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod signature;
pub mod verify;

pub use error::VerificationError;
pub use extract::extract;
pub use signature::PublicKey;
pub use verify::{VerificationOutcome, VerificationReport, Verifier, VerifyConfig};
