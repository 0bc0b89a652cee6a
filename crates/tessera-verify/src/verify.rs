//! Top-level verification orchestrator.
//!
//! The `Verifier` coordinates signature verification, predicate
//! extraction and subject digest checking into a single
//! `VerificationReport`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tessera_craft::envelope::Envelope;
use tessera_craft::render::NormalizedPredicate;
use tessera_craft::statement::Statement;

use crate::digest;
use crate::error::VerificationError;
use crate::extract;
use crate::signature::{self, PublicKey};

/// Configuration for a verification run.
#[derive(Debug, Default)]
pub struct VerifyConfig {
    /// Key the envelope must be signed with. Without one the signature
    /// check is skipped.
    pub public_key: Option<PublicKey>,
    /// Base directory for resolving output file paths.
    pub check_files_base: Option<PathBuf>,
    /// Predicate type the envelope must declare.
    pub expected_predicate_type: Option<String>,
}

/// Outcome of a single verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum VerificationOutcome {
    /// The check passed.
    Pass(String),
    /// The check failed.
    Fail(String),
    /// The check was skipped (not enough information).
    Skip(String),
}

impl VerificationOutcome {
    /// Returns `true` if this outcome is a failure.
    #[must_use]
    pub const fn is_fail(&self) -> bool {
        matches!(self, Self::Fail(_))
    }

    /// Get the message for this outcome.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Pass(m) | Self::Fail(m) | Self::Skip(m) => m,
        }
    }
}

/// The result of a full verification run.
#[derive(Debug, Serialize)]
pub struct VerificationReport {
    /// Individual check outcomes.
    pub outcomes: Vec<VerificationOutcome>,
    /// The extracted predicate, when extraction succeeded.
    pub predicate: Option<NormalizedPredicate>,
    /// Overall pass/fail.
    pub passed: bool,
}

/// Orchestrates all verification checks.
#[derive(Debug)]
pub struct Verifier {
    config: VerifyConfig,
}

impl Verifier {
    /// Create a new verifier with the given configuration.
    #[must_use]
    pub const fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    /// Verify a signed envelope.
    #[must_use]
    pub fn verify(&self, envelope: &Envelope) -> VerificationReport {
        let mut outcomes = Vec::new();

        self.verify_signature(envelope, &mut outcomes);

        let statement = match envelope.statement() {
            Ok(s) => s,
            Err(e) => {
                outcomes.push(VerificationOutcome::Fail(format!(
                    "failed to decode statement: {e}"
                )));
                return VerificationReport {
                    outcomes,
                    predicate: None,
                    passed: false,
                };
            }
        };

        let predicate = match extract::extract_statement(&statement) {
            Ok(p) => {
                outcomes.push(VerificationOutcome::Pass(format!(
                    "predicate extracted ({} materials)",
                    p.materials.len()
                )));
                p
            }
            Err(e) => {
                outcomes.push(VerificationOutcome::Fail(e.to_string()));
                return VerificationReport {
                    outcomes,
                    predicate: None,
                    passed: false,
                };
            }
        };

        if let Some(expected) = &self.config.expected_predicate_type {
            if *expected == predicate.predicate_type {
                outcomes.push(VerificationOutcome::Pass(format!(
                    "predicate type is {expected}"
                )));
            } else {
                outcomes.push(VerificationOutcome::Fail(format!(
                    "predicate type is {}, expected {expected}",
                    predicate.predicate_type
                )));
            }
        }

        self.verify_digests(&statement, &predicate, &mut outcomes);

        let passed = !outcomes.iter().any(VerificationOutcome::is_fail);
        VerificationReport {
            outcomes,
            predicate: Some(predicate),
            passed,
        }
    }

    fn verify_signature(&self, envelope: &Envelope, outcomes: &mut Vec<VerificationOutcome>) {
        let Some(key) = &self.config.public_key else {
            outcomes.push(VerificationOutcome::Skip(
                "signature check skipped (no public key)".to_owned(),
            ));
            return;
        };

        match signature::verify_envelope(envelope, key) {
            Ok(_) => outcomes.push(VerificationOutcome::Pass(format!(
                "signature verified with key {}",
                key.keyid()
            ))),
            Err(e) => outcomes.push(VerificationOutcome::Fail(e.to_string())),
        }
    }

    fn verify_digests(
        &self,
        statement: &Statement,
        predicate: &NormalizedPredicate,
        outcomes: &mut Vec<VerificationOutcome>,
    ) {
        let Some(base_dir) = &self.config.check_files_base else {
            outcomes.push(VerificationOutcome::Skip(
                "file digest check skipped (no --base-dir)".to_owned(),
            ));
            return;
        };

        let results = digest::check_subjects(statement, predicate, base_dir);
        if results.is_empty() {
            outcomes.push(VerificationOutcome::Skip(
                "no file-backed outputs to check".to_owned(),
            ));
        }
        for (name, result) in results {
            match result {
                Ok(()) => outcomes.push(VerificationOutcome::Pass(format!(
                    "subject digest match: {name}"
                ))),
                Err(e) => outcomes.push(VerificationOutcome::Fail(format!("subject digest: {e}"))),
            }
        }
    }

    /// Load an envelope from a file and verify it.
    pub fn verify_file(&self, path: &Path) -> Result<VerificationReport, VerificationError> {
        let envelope = extract::read_envelope(path)?;
        Ok(self.verify(&envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tessera_craft::material::{ArtifactKind, CraftedMaterial, Material};
    use tessera_craft::render::{PredicateVersion, RenderOptions, render};
    use tessera_craft::signer::{LocalSigner, sign_statement};
    use tessera_craft::state::{CraftingState, InputSchema, WorkflowMeta};

    async fn signed(dir: &Path, version: PredicateVersion) -> (Envelope, PublicKey) {
        std::fs::write(dir.join("app"), b"binary").unwrap();
        let workflow = WorkflowMeta {
            name: "build".to_owned(),
            project: "acme".to_owned(),
            run_id: "run-1".to_owned(),
            ..WorkflowMeta::default()
        };
        let mut state = CraftingState::new(
            InputSchema::default(),
            workflow,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        );
        state
            .add_material(
                "bin",
                CraftedMaterial::new(Material::Artifact {
                    name: "app".to_owned(),
                    digest: Some(format!("sha256:{}", digest::sha256_bytes(b"binary"))),
                    is_subject: true,
                    content: None,
                    artifact_type: ArtifactKind::Artifact,
                }),
            )
            .unwrap();

        let signer = LocalSigner::load_or_generate(&dir.join("key.pem")).unwrap();
        let statement = render(&state, version, &RenderOptions::default()).unwrap();
        let envelope = sign_statement(&statement, &signer).await.unwrap();
        let key = PublicKey::from_pem(&signer.public_key_pem()).unwrap();
        (envelope, key)
    }

    #[tokio::test]
    async fn end_to_end_verify_pass() {
        let tmp = tempfile::tempdir().unwrap();
        for version in [PredicateVersion::V02, PredicateVersion::V1] {
            let (envelope, key) = signed(tmp.path(), version).await;
            let verifier = Verifier::new(VerifyConfig {
                public_key: Some(key),
                check_files_base: Some(tmp.path().to_path_buf()),
                expected_predicate_type: Some(version.predicate_type().to_owned()),
            });

            let report = verifier.verify(&envelope);
            assert!(report.passed, "{version}: {report:?}");
            assert!(
                report
                    .outcomes
                    .iter()
                    .all(|o| matches!(o, VerificationOutcome::Pass(_)))
            );
            assert_eq!(report.predicate.unwrap().materials[0].name, "bin");
        }
    }

    #[tokio::test]
    async fn missing_inputs_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let (envelope, _) = signed(tmp.path(), PredicateVersion::V1).await;
        let report = Verifier::new(VerifyConfig::default()).verify(&envelope);
        assert!(report.passed);
        assert_eq!(
            report
                .outcomes
                .iter()
                .filter(|o| matches!(o, VerificationOutcome::Skip(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn tampered_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (envelope, key) = signed(tmp.path(), PredicateVersion::V1).await;
        std::fs::write(tmp.path().join("app"), b"tampered").unwrap();

        let report = Verifier::new(VerifyConfig {
            public_key: Some(key),
            check_files_base: Some(tmp.path().to_path_buf()),
            ..VerifyConfig::default()
        })
        .verify(&envelope);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn wrong_predicate_type_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (envelope, _) = signed(tmp.path(), PredicateVersion::V02).await;
        let report = Verifier::new(VerifyConfig {
            expected_predicate_type: Some(PredicateVersion::V1.predicate_type().to_owned()),
            ..VerifyConfig::default()
        })
        .verify(&envelope);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn verify_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let (envelope, key) = signed(tmp.path(), PredicateVersion::V1).await;
        let path = tmp.path().join("attestation.json");
        std::fs::write(&path, envelope.to_json().unwrap()).unwrap();

        let report = Verifier::new(VerifyConfig {
            public_key: Some(key),
            ..VerifyConfig::default()
        })
        .verify_file(&path)
        .unwrap();
        assert!(report.passed);
    }

    #[test]
    fn outcome_serializes_with_status() {
        let json = serde_json::to_value(VerificationOutcome::Skip("x".to_owned())).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "skip", "message": "x" }));
    }
}
