//! Crafting state: the append-only accumulator for one workflow run.
//!
//! A [`CraftingState`] is created when a run starts crafting, gains one
//! material per crafting step, and is rendered into an attestation once
//! [`CraftingState::validate_complete`] passes. It is a plain value: the
//! only mutators are the methods below, and the whole struct serializes
//! canonically via [`CraftingState::to_blob`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::CraftError;
use crate::material::{CraftedMaterial, MaterialType, NormalizedMaterial};

/// The contract a run is crafted against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    /// Materials the run is expected to provide.
    #[serde(default)]
    pub expected_materials: Vec<ExpectedMaterial>,
    /// Environment variables to capture into the attestation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_allow_list: Vec<String>,
}

/// One material declared by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMaterial {
    /// Logical material name.
    pub name: String,
    /// Required type, if the contract pins one.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub material_type: Option<MaterialType>,
    /// Whether the run may complete without it.
    #[serde(default)]
    pub optional: bool,
}

impl InputSchema {
    /// Load a contract from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self, CraftError> {
        let invalid = |reason: String| CraftError::InvalidContract {
            path: path.display().to_string(),
            reason,
        };

        let data = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            toml::from_str(&data).map_err(|e| invalid(e.to_string()))
        } else {
            serde_json::from_str(&data).map_err(|e| invalid(e.to_string()))
        }
    }

    fn expected(&self, name: &str) -> Option<&ExpectedMaterial> {
        self.expected_materials.iter().find(|m| m.name == name)
    }
}

/// Identity of the workflow run being attested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMeta {
    /// Workflow name.
    pub name: String,
    /// Project the workflow belongs to.
    pub project: String,
    /// Owning team.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Run identifier; also the persistence key.
    pub run_id: String,
    /// Contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    /// Contract revision the run was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_revision: Option<u32>,
}

/// CI system the run executes on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerType {
    /// Unknown or local execution.
    #[default]
    Unspecified,
    /// GitHub Actions.
    GithubAction,
    /// GitLab CI.
    GitlabPipeline,
    /// Azure Pipelines.
    AzurePipeline,
    /// Jenkins.
    JenkinsJob,
    /// `CircleCI`.
    CircleciBuild,
    /// Dagger.
    DaggerPipeline,
}

impl RunnerType {
    /// Wire name of this runner type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::GithubAction => "GITHUB_ACTION",
            Self::GitlabPipeline => "GITLAB_PIPELINE",
            Self::AzurePipeline => "AZURE_PIPELINE",
            Self::JenkinsJob => "JENKINS_JOB",
            Self::CircleciBuild => "CIRCLECI_BUILD",
            Self::DaggerPipeline => "DAGGER_PIPELINE",
        }
    }

    /// Detect the runner from well-known CI environment variables.
    ///
    /// Returns the runner type and, where the CI exposes one, a link to
    /// the job.
    pub fn detect<F>(lookup: F) -> (Self, Option<String>)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("GITHUB_ACTIONS").is_some_and(|v| v == "true") {
            let url = match (
                lookup("GITHUB_SERVER_URL"),
                lookup("GITHUB_REPOSITORY"),
                lookup("GITHUB_RUN_ID"),
            ) {
                (Some(server), Some(repo), Some(run)) => {
                    Some(format!("{server}/{repo}/actions/runs/{run}"))
                }
                _ => None,
            };
            return (Self::GithubAction, url);
        }
        if lookup("GITLAB_CI").is_some() {
            return (Self::GitlabPipeline, lookup("CI_JOB_URL"));
        }
        if lookup("TF_BUILD").is_some() {
            return (Self::AzurePipeline, None);
        }
        if lookup("JENKINS_URL").is_some() {
            return (Self::JenkinsJob, lookup("BUILD_URL"));
        }
        if lookup("CIRCLECI").is_some() {
            return (Self::CircleciBuild, lookup("CIRCLE_BUILD_URL"));
        }
        if lookup("DAGGER_SESSION_PORT").is_some() {
            return (Self::DaggerPipeline, None);
        }
        (Self::Unspecified, None)
    }
}

impl std::fmt::Display for RunnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The commit checked out when crafting started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCommit {
    /// Full commit hash (hex SHA-1).
    pub hash: String,
    /// Author e-mail.
    pub author_email: String,
    /// Author name.
    pub author_name: String,
    /// Commit message.
    pub message: String,
    /// Commit date.
    pub date: DateTime<Utc>,
    /// `origin` remote URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

/// Everything collected about a run so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Workflow identity.
    pub workflow: WorkflowMeta,
    /// Materials keyed by logical name.
    #[serde(default)]
    pub materials: BTreeMap<String, CraftedMaterial>,
    /// Captured environment variables.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// CI system.
    #[serde(default)]
    pub runner_type: RunnerType,
    /// Link to the CI job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_url: Option<String>,
    /// When crafting started.
    pub initialized_at: DateTime<Utc>,
    /// HEAD commit, if crafting inside a git checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<GitCommit>,
    /// Run-level annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The mutable crafting state of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CraftingState {
    /// Contract the run is crafted against.
    pub input_schema: InputSchema,
    /// Collected evidence and run metadata.
    pub attestation: Attestation,
}

impl CraftingState {
    /// Start crafting a run.
    #[must_use]
    pub fn new(
        input_schema: InputSchema,
        workflow: WorkflowMeta,
        initialized_at: DateTime<Utc>,
    ) -> Self {
        Self {
            input_schema,
            attestation: Attestation {
                workflow,
                materials: BTreeMap::new(),
                env_vars: BTreeMap::new(),
                runner_type: RunnerType::Unspecified,
                runner_url: None,
                initialized_at,
                git_commit: None,
                annotations: BTreeMap::new(),
            },
        }
    }

    /// Record the CI runner.
    #[must_use]
    pub fn with_runner(mut self, runner_type: RunnerType, runner_url: Option<String>) -> Self {
        self.attestation.runner_type = runner_type;
        self.attestation.runner_url = runner_url;
        self
    }

    /// Record the HEAD commit.
    #[must_use]
    pub fn with_git_commit(mut self, commit: GitCommit) -> Self {
        self.attestation.git_commit = Some(commit);
        self
    }

    /// The run this state belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.attestation.workflow.run_id
    }

    /// Insert or replace the material stored under `name`.
    ///
    /// The last write for a name wins; there is no merging. Returns the
    /// replaced material, if any.
    ///
    /// # Errors
    ///
    /// - [`CraftError::MaterialTypeMismatch`] if the contract pins a
    ///   different type for `name`.
    /// - [`CraftError::ReservedAnnotation`] if a user annotation uses the
    ///   reserved namespace.
    pub fn add_material(
        &mut self,
        name: &str,
        material: CraftedMaterial,
    ) -> Result<Option<CraftedMaterial>, CraftError> {
        material.check_annotations(name)?;

        if let Some(expected_type) = self
            .input_schema
            .expected(name)
            .and_then(|m| m.material_type)
        {
            let actual = material.material.material_type();
            if actual != expected_type {
                return Err(CraftError::MaterialTypeMismatch {
                    name: name.to_owned(),
                    expected: expected_type.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        Ok(self
            .attestation
            .materials
            .insert(name.to_owned(), material))
    }

    /// Check that every non-optional expected material is present.
    ///
    /// # Errors
    ///
    /// Returns [`CraftError::MissingMaterials`] listing every missing
    /// name, sorted.
    pub fn validate_complete(&self) -> Result<(), CraftError> {
        let mut missing: Vec<String> = self
            .input_schema
            .expected_materials
            .iter()
            .filter(|m| !m.optional && !self.attestation.materials.contains_key(&m.name))
            .map(|m| m.name.clone())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        missing.sort();
        missing.dedup();
        Err(CraftError::MissingMaterials { missing })
    }

    /// Whether no material has been added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attestation.materials.is_empty()
    }

    /// Capture the contract's allow-listed environment variables.
    ///
    /// Present variables are recorded even when others are missing.
    ///
    /// # Errors
    ///
    /// Returns [`CraftError::MissingEnvVars`] listing every unset name.
    pub fn capture_env_vars<F>(&mut self, lookup: F) -> Result<(), CraftError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        for name in &self.input_schema.env_allow_list {
            match lookup(name) {
                Some(value) => {
                    self.attestation.env_vars.insert(name.clone(), value);
                }
                None => missing.push(name.clone()),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            missing.dedup();
            Err(CraftError::MissingEnvVars { missing })
        }
    }

    /// Normalize every material, in name order.
    pub fn normalized_materials(&self) -> Result<Vec<NormalizedMaterial>, CraftError> {
        self.attestation
            .materials
            .iter()
            .map(|(name, material)| material.normalize(name))
            .collect()
    }

    /// Canonical byte serialization, suitable for digesting and storage.
    pub fn to_blob(&self) -> Result<Vec<u8>, CraftError> {
        Ok(canonical::to_canonical_bytes(self)?)
    }

    /// Decode a blob written by [`CraftingState::to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::material::{ArtifactKind, Material};
    use chrono::TimeZone;

    pub(crate) fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn workflow() -> WorkflowMeta {
        WorkflowMeta {
            name: "build".to_owned(),
            project: "acme".to_owned(),
            run_id: "run-1".to_owned(),
            ..WorkflowMeta::default()
        }
    }

    fn schema() -> InputSchema {
        InputSchema {
            expected_materials: vec![
                ExpectedMaterial {
                    name: "sbom".to_owned(),
                    material_type: Some(MaterialType::SbomCyclonedxJson),
                    optional: false,
                },
                ExpectedMaterial {
                    name: "binary".to_owned(),
                    material_type: None,
                    optional: true,
                },
            ],
            env_allow_list: vec![],
        }
    }

    pub(crate) fn artifact(file: &str, digest: &str, is_subject: bool) -> CraftedMaterial {
        CraftedMaterial::new(Material::Artifact {
            name: file.to_owned(),
            digest: Some(digest.to_owned()),
            is_subject,
            content: None,
            artifact_type: ArtifactKind::Artifact,
        })
    }

    fn sbom() -> CraftedMaterial {
        CraftedMaterial::new(Material::Artifact {
            name: "sbom.cdx.json".to_owned(),
            digest: Some("sha256:01".to_owned()),
            is_subject: false,
            content: None,
            artifact_type: ArtifactKind::SbomCyclonedxJson,
        })
    }

    #[test]
    fn detects_github_runner_url() {
        let env = |k: &str| {
            match k {
                "GITHUB_ACTIONS" => Some("true"),
                "GITHUB_SERVER_URL" => Some("https://github.com"),
                "GITHUB_REPOSITORY" => Some("acme/app"),
                "GITHUB_RUN_ID" => Some("42"),
                _ => None,
            }
            .map(str::to_owned)
        };
        let (runner, url) = RunnerType::detect(env);
        assert_eq!(runner, RunnerType::GithubAction);
        assert_eq!(
            url.as_deref(),
            Some("https://github.com/acme/app/actions/runs/42")
        );
        assert_eq!(runner.to_string(), "GITHUB_ACTION");
    }

    #[test]
    fn no_ci_is_unspecified() {
        assert_eq!(RunnerType::detect(|_| None), (RunnerType::Unspecified, None));
    }

    #[test]
    fn completeness_lists_missing_required() {
        let state = CraftingState::new(schema(), workflow(), fixed_time());
        let err = state.validate_complete().unwrap_err();
        match err {
            CraftError::MissingMaterials { missing } => assert_eq!(missing, vec!["sbom"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn completeness_ignores_optional() {
        let mut state = CraftingState::new(schema(), workflow(), fixed_time());
        state.add_material("sbom", sbom()).unwrap();
        state.validate_complete().expect("optional binary may be absent");
    }

    #[test]
    fn missing_list_is_sorted() {
        let schema = InputSchema {
            expected_materials: ["zeta", "alpha", "mid"]
                .into_iter()
                .map(|n| ExpectedMaterial {
                    name: n.to_owned(),
                    material_type: None,
                    optional: false,
                })
                .collect(),
            env_allow_list: vec![],
        };
        let state = CraftingState::new(schema, workflow(), fixed_time());
        let err = state.validate_complete().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required materials: alpha, mid, zeta"
        );
    }

    #[test]
    fn add_material_last_write_wins() {
        let mut state = CraftingState::new(InputSchema::default(), workflow(), fixed_time());
        assert!(state.is_empty());

        let first = artifact("a", "sha256:01", false);
        let second = artifact("b", "sha256:02", true);
        assert!(state.add_material("bin", first.clone()).unwrap().is_none());
        let replaced = state.add_material("bin", second.clone()).unwrap();

        assert_eq!(replaced, Some(first));
        assert_eq!(state.attestation.materials.len(), 1);
        assert_eq!(state.attestation.materials["bin"], second);
        assert!(!state.is_empty());
    }

    #[test]
    fn add_material_enforces_contract_type() {
        let mut state = CraftingState::new(schema(), workflow(), fixed_time());
        let err = state
            .add_material("sbom", artifact("x", "sha256:01", false))
            .unwrap_err();
        assert!(matches!(err, CraftError::MaterialTypeMismatch { .. }));
        assert!(state.is_empty());
    }

    #[test]
    fn capture_env_vars_reports_all_missing() {
        let schema = InputSchema {
            expected_materials: vec![],
            env_allow_list: vec!["B".to_owned(), "PRESENT".to_owned(), "A".to_owned()],
        };
        let mut state = CraftingState::new(schema, workflow(), fixed_time());
        let err = state
            .capture_env_vars(|k| (k == "PRESENT").then(|| "yes".to_owned()))
            .unwrap_err();

        assert!(matches!(
            err,
            CraftError::MissingEnvVars { ref missing } if missing == &["A", "B"]
        ));
        assert_eq!(state.attestation.env_vars["PRESENT"], "yes");
    }

    #[test]
    fn blob_is_deterministic_and_decodes() {
        let mut state = CraftingState::new(schema(), workflow(), fixed_time());
        state.add_material("sbom", sbom()).unwrap();
        state
            .add_material("zz", artifact("z", "sha256:02", true))
            .unwrap();

        let a = state.to_blob().unwrap();
        let b = state.clone().to_blob().unwrap();
        assert_eq!(a, b);
        assert_eq!(CraftingState::from_blob(&a).unwrap(), state);
    }

    #[test]
    fn contract_loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.toml");
        std::fs::write(
            &path,
            r#"
env_allow_list = ["GITHUB_SHA"]

[[expected_materials]]
name = "sbom"
type = "SBOM_SPDX_JSON"

[[expected_materials]]
name = "notes"
optional = true
"#,
        )
        .unwrap();

        let schema = InputSchema::from_file(&path).unwrap();
        assert_eq!(schema.expected_materials.len(), 2);
        assert_eq!(
            schema.expected_materials[0].material_type,
            Some(MaterialType::SbomSpdxJson)
        );
        assert!(schema.expected_materials[1].optional);
        assert_eq!(schema.env_allow_list, vec!["GITHUB_SHA"]);
    }

    #[test]
    fn contract_load_error_names_path() {
        let err = InputSchema::from_file(Path::new("/nonexistent/contract.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/contract.json"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// `validate_complete` passes iff every required name is present,
            /// and otherwise reports exactly the missing required names.
            #[test]
            fn completeness_matches_set_difference(
                expected in prop::collection::btree_map("[a-e]", any::<bool>(), 0..5),
                present in prop::collection::btree_set("[a-e]", 0..5),
            ) {
                let schema = InputSchema {
                    expected_materials: expected
                        .iter()
                        .map(|(name, optional)| ExpectedMaterial {
                            name: name.clone(),
                            material_type: None,
                            optional: *optional,
                        })
                        .collect(),
                    env_allow_list: vec![],
                };
                let mut state = CraftingState::new(schema, workflow(), fixed_time());
                for name in &present {
                    state.add_material(name, artifact(name, "sha256:00", false)).unwrap();
                }

                let want: Vec<String> = expected
                    .iter()
                    .filter(|(name, optional)| !**optional && !present.contains(*name))
                    .map(|(name, _)| name.clone())
                    .collect();

                match state.validate_complete() {
                    Ok(()) => prop_assert!(want.is_empty()),
                    Err(CraftError::MissingMaterials { missing }) => prop_assert_eq!(missing, want),
                    Err(other) => prop_assert!(false, "unexpected error: {}", other),
                }
            }
        }
    }
}
