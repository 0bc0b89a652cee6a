//! Predicate extraction from signed envelopes.
//!
//! Extraction never guesses: an unknown predicate type, a corrupt
//! payload or a garbled material descriptor is an error, so a
//! successfully extracted predicate is complete.

use std::path::Path;

use tessera_craft::envelope::Envelope;
use tessera_craft::render::{NormalizedPredicate, normalize_statement};
use tessera_craft::statement::Statement;

use crate::error::VerificationError;

/// Decode an envelope's statement and normalize its predicate.
///
/// Does not check signatures; see [`crate::signature::verify_envelope`].
///
/// # Errors
///
/// - [`VerificationError::Envelope`] if the payload is not a base64 in-toto
///   statement.
/// - [`VerificationError::Extraction`] for unsupported predicate types and
///   malformed predicates.
pub fn extract(envelope: &Envelope) -> Result<NormalizedPredicate, VerificationError> {
    let statement = envelope.statement()?;
    extract_statement(&statement)
}

/// Normalize an already decoded statement.
pub fn extract_statement(statement: &Statement) -> Result<NormalizedPredicate, VerificationError> {
    let predicate = normalize_statement(statement)?;
    tracing::debug!(
        predicate_type = %predicate.predicate_type,
        materials = predicate.materials.len(),
        "extracted predicate"
    );
    Ok(predicate)
}

/// Read an envelope from a JSON file.
pub fn read_envelope(path: &Path) -> Result<Envelope, VerificationError> {
    let data = std::fs::read(path)?;
    Ok(Envelope::from_json(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tessera_craft::error::PredicateError;
    use tessera_craft::material::{ArtifactKind, CraftedMaterial, Digest, Material, MaterialType};
    use tessera_craft::render::{PredicateVersion, RenderOptions, render};
    use tessera_craft::signer::{LocalSigner, sign_statement};
    use tessera_craft::state::{CraftingState, InputSchema, WorkflowMeta};

    fn bin_state() -> CraftingState {
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
                    name: "bin".to_owned(),
                    digest: Some("sha256:abc123".to_owned()),
                    is_subject: true,
                    content: None,
                    artifact_type: ArtifactKind::Artifact,
                }),
            )
            .unwrap();
        state
    }

    #[tokio::test]
    async fn end_to_end_bin_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = LocalSigner::load_or_generate(&tmp.path().join("k.pem")).unwrap();

        for version in [PredicateVersion::V02, PredicateVersion::V1] {
            let statement = render(&bin_state(), version, &RenderOptions::default()).unwrap();
            let envelope = sign_statement(&statement, &signer).await.unwrap();

            let predicate = extract(&envelope).unwrap();
            assert_eq!(predicate.predicate_type, version.predicate_type());
            assert_eq!(predicate.materials.len(), 1);
            let m = &predicate.materials[0];
            assert_eq!(m.name, "bin");
            assert_eq!(m.material_type, MaterialType::Artifact);
            assert_eq!(m.value, "bin");
            assert_eq!(m.digest, Some(Digest::sha256("abc123")));

            let digest_subjects = statement
                .subject
                .iter()
                .filter(|s| !s.digest.is_empty())
                .count();
            assert_eq!(digest_subjects, 2, "self digest plus `bin`");
        }
    }

    #[test]
    fn unsupported_predicate_type_is_fatal() {
        let mut statement =
            render(&bin_state(), PredicateVersion::V1, &RenderOptions::default()).unwrap();
        statement.predicate_type = "https://example.com/unknown".to_owned();
        let envelope = Envelope::new(
            Statement::PAYLOAD_TYPE,
            &serde_json::to_vec(&statement).unwrap(),
            vec![],
        );

        assert!(matches!(
            extract(&envelope),
            Err(VerificationError::Extraction(
                PredicateError::UnsupportedPredicateType(_)
            ))
        ));
    }

    #[test]
    fn garbage_payload_is_an_envelope_error() {
        let envelope = Envelope::new(Statement::PAYLOAD_TYPE, b"not json", vec![]);
        assert!(matches!(
            extract(&envelope),
            Err(VerificationError::Envelope(_))
        ));
    }

    #[test]
    fn read_envelope_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("att.json");
        let envelope = Envelope::new(Statement::PAYLOAD_TYPE, b"{}", vec![]);
        std::fs::write(&path, envelope.to_json().unwrap()).unwrap();
        assert_eq!(read_envelope(&path).unwrap(), envelope);
    }

    mod proptests {
        use super::*;
        use crate::signature::{PublicKey, verify_envelope};
        use proptest::prelude::*;

        fn arb_material() -> impl Strategy<Value = CraftedMaterial> {
            let digest = "[0-9a-f]{4,16}".prop_map(|h| format!("sha256:{h}"));
            prop_oneof![
                (
                    "[a-z]{1,8}\\.bin",
                    digest.clone(),
                    any::<bool>(),
                    prop::option::of(prop::collection::vec(any::<u8>(), 0..16)),
                )
                    .prop_map(|(name, digest, is_subject, content)| {
                        CraftedMaterial::new(Material::Artifact {
                            name,
                            digest: Some(digest),
                            is_subject,
                            content,
                            artifact_type: ArtifactKind::Artifact,
                        })
                    }),
                ("[a-z]{1,8}/[a-z]{1,8}", digest, any::<bool>()).prop_map(
                    |(name, digest, is_subject)| {
                        CraftedMaterial::new(Material::ContainerImage {
                            name,
                            digest,
                            is_subject,
                        })
                        .uploaded()
                    }
                ),
                ".{0,24}".prop_map(|value| CraftedMaterial::new(Material::StringFact { value })),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Signing then extracting yields the normalized material set,
            /// for both schemas.
            #[test]
            fn signed_round_trip_any_state(
                materials in prop::collection::btree_map("[a-z][a-z0-9-]{0,8}", arb_material(), 0..6),
            ) {
                let mut state = bin_state();
                state.attestation.materials.clear();
                for (name, material) in materials {
                    state.add_material(&name, material).unwrap();
                }
                let expected = state.normalized_materials().unwrap();

                let tmp = tempfile::tempdir().unwrap();
                let signer = LocalSigner::load_or_generate(&tmp.path().join("k.pem")).unwrap();
                let key = PublicKey::from_pem(&signer.public_key_pem()).unwrap();
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

                for version in [PredicateVersion::V02, PredicateVersion::V1] {
                    let statement = render(&state, version, &RenderOptions::default()).unwrap();
                    let envelope = runtime
                        .block_on(sign_statement(&statement, &signer))
                        .unwrap();
                    prop_assert!(verify_envelope(&envelope, &key).is_ok());

                    let mut got = extract(&envelope).unwrap().materials;
                    got.sort_by(|a, b| a.name.cmp(&b.name));
                    prop_assert_eq!(&got, &expected, "{}", version);
                }
            }
        }
    }
}
