//! SHA-256 digest verification for attestation subjects.

use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use tessera_craft::render::NormalizedPredicate;
use tessera_craft::statement::Statement;

use crate::error::VerificationError;

/// Compute the SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, VerificationError> {
    let data = std::fs::read(path)?;
    Ok(sha256_bytes(&data))
}

/// Compute the SHA-256 hex digest of a byte slice.
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that a file's digest matches the expected value.
pub fn check_file_digest(
    path: &Path,
    expected: &str,
    artifact_name: &str,
) -> Result<(), VerificationError> {
    let actual = sha256_file(path)?;
    if actual != expected {
        return Err(VerificationError::DigestMismatch {
            artifact: artifact_name.to_owned(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

/// Check every file-backed output material against the statement
/// subjects and the files under `base_dir`.
///
/// For each output material with a file name and a SHA-256 digest, the
/// subject of the same name must exist and carry the same digest, and
/// `base_dir/<file name>` must hash to it. A file name with any path
/// component is refused. Returns one result per checked
/// material, keyed by file name. Outputs digested with another algorithm
/// are not checked.
#[must_use]
pub fn check_subjects(
    statement: &Statement,
    predicate: &NormalizedPredicate,
    base_dir: &Path,
) -> Vec<(String, Result<(), VerificationError>)> {
    predicate
        .materials
        .iter()
        .filter(|m| m.is_output)
        .filter_map(|m| {
            let file = m.filename.as_deref()?;
            let digest = m.digest.as_ref().filter(|d| d.algorithm == "sha256")?;
            Some((file.to_owned(), check_subject(statement, file, &digest.hex, base_dir)))
        })
        .collect()
}

fn check_subject(
    statement: &Statement,
    file: &str,
    expected: &str,
    base_dir: &Path,
) -> Result<(), VerificationError> {
    let subject = statement
        .subject_named(file)
        .ok_or_else(|| VerificationError::MissingSubject(file.to_owned()))?;
    let listed = subject.digest.get("sha256").map_or("", String::as_str);
    if listed != expected {
        return Err(VerificationError::DigestMismatch {
            artifact: file.to_owned(),
            expected: expected.to_owned(),
            actual: listed.to_owned(),
        });
    }
    let mut components = Path::new(file).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(VerificationError::UnsafeFileName(file.to_owned())),
    }
    check_file_digest(&base_dir.join(file), expected, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tessera_craft::material::{ArtifactKind, CraftedMaterial, Material};
    use tessera_craft::render::{PredicateVersion, RenderOptions, normalize_statement, render};
    use tessera_craft::state::{CraftingState, InputSchema, WorkflowMeta};

    fn statement_for(files: &[(&str, &[u8], bool)]) -> Statement {
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
        for (name, content, is_subject) in files {
            state
                .add_material(
                    name,
                    CraftedMaterial::new(Material::Artifact {
                        name: (*name).to_owned(),
                        digest: Some(format!("sha256:{}", sha256_bytes(content))),
                        is_subject: *is_subject,
                        content: None,
                        artifact_type: ArtifactKind::Artifact,
                    }),
                )
                .unwrap();
        }
        render(&state, PredicateVersion::V1, &RenderOptions::default()).unwrap()
    }

    #[test]
    fn sha256_known_value() {
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_digest_mismatch() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(tmp.path(), b"hello").expect("write");
        assert!(matches!(
            check_file_digest(tmp.path(), "0000", "test.txt"),
            Err(VerificationError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn output_files_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"hello").expect("write");
        std::fs::write(dir.path().join("b.txt"), b"world").expect("write");

        let statement = statement_for(&[
            ("a.txt", &b"hello"[..], true),
            ("b.txt", &b"world"[..], true),
            ("c.txt", &b"not on disk"[..], false),
        ]);
        let predicate = normalize_statement(&statement).unwrap();

        let results = check_subjects(&statement, &predicate, dir.path());
        assert_eq!(results.len(), 2, "non-output c.txt is not checked");
        for (name, r) in &results {
            assert!(r.is_ok(), "{name}: {r:?}");
        }
    }

    #[test]
    fn modified_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"tampered").expect("write");

        let statement = statement_for(&[("a.txt", &b"hello"[..], true)]);
        let predicate = normalize_statement(&statement).unwrap();

        let results = check_subjects(&statement, &predicate, dir.path());
        assert!(matches!(
            results[0].1,
            Err(VerificationError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn path_like_file_names_are_refused() {
        let root = tempfile::tempdir().expect("tempdir");
        let base = root.path().join("base");
        std::fs::create_dir(&base).expect("mkdir");
        std::fs::write(root.path().join("secret"), b"hello").expect("write");
        let outside = root.path().join("secret").display().to_string();

        for name in ["../secret", outside.as_str(), "sub/secret"] {
            let statement = statement_for(&[(name, &b"hello"[..], true)]);
            let predicate = normalize_statement(&statement).unwrap();
            let results = check_subjects(&statement, &predicate, &base);
            assert!(
                matches!(results[0].1, Err(VerificationError::UnsafeFileName(_))),
                "{name}: {:?}",
                results[0].1
            );
        }
    }

    #[test]
    fn dropped_subject_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"hello").expect("write");

        let mut statement = statement_for(&[("a.txt", &b"hello"[..], true)]);
        let predicate = normalize_statement(&statement).unwrap();
        statement.subject.retain(|s| s.name.as_deref() != Some("a.txt"));

        let results = check_subjects(&statement, &predicate, dir.path());
        assert!(matches!(
            results[0].1,
            Err(VerificationError::MissingSubject(_))
        ));
    }
}
