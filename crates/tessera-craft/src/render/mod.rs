//! Versioned provenance rendering and decoding.
//!
//! A completed [`CraftingState`] renders into an in-toto [`Statement`]
//! whose predicate follows one of two schemas, both supported forever:
//!
//! - [`v02`]: the legacy schema with a typed material list.
//! - [`v1`]: the current schema where materials are in-toto resource
//!   descriptors and tessera-specific facts ride in reserved annotations.
//!
//! The reverse direction goes through [`Predicate::decode`], which
//! dispatches on the predicate type string and yields the same
//! [`NormalizedPredicate`] regardless of the schema that produced it.

pub mod v02;
pub mod v1;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical;
use crate::error::{CraftError, PredicateError};
use crate::material::NormalizedMaterial;
use crate::state::{CraftingState, RunnerType, WorkflowMeta};
use crate::statement::{ResourceDescriptor, Statement};

/// Prefix of the subject carrying the digest of the whole attestation.
pub const WORKFLOW_SUBJECT_PREFIX: &str = "tessera.workflow.";

/// Name of the subject pinning the git HEAD commit.
pub const GIT_HEAD_SUBJECT: &str = "git.head";

/// Which predicate schema to render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateVersion {
    /// Legacy typed-material schema.
    #[serde(rename = "v0.2")]
    V02,
    /// Resource-descriptor schema.
    #[default]
    #[serde(rename = "v1")]
    V1,
}

impl PredicateVersion {
    /// The frozen predicate type URI of this version.
    #[must_use]
    pub const fn predicate_type(self) -> &'static str {
        match self {
            Self::V02 => v02::PREDICATE_TYPE,
            Self::V1 => v1::PREDICATE_TYPE,
        }
    }
}

impl fmt::Display for PredicateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V02 => "v0.2",
            Self::V1 => "v1",
        })
    }
}

impl FromStr for PredicateVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v0.2" | "0.2" => Ok(Self::V02),
            "v1" | "1" => Ok(Self::V1),
            other => Err(format!("unknown predicate version `{other}` (expected v0.2 or v1)")),
        }
    }
}

/// Caller-supplied inputs that are not part of the crafting state.
///
/// Nothing here is read from the clock; identical options and state give
/// byte-identical statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Identifies the producing tool.
    pub builder_id: String,
    /// When crafting finished.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            builder_id: crate::metadata::builder_id(),
            finished_at: None,
        }
    }
}

/// One predicate schema's rendering rules.
pub trait PredicateRenderer {
    /// in-toto statement type this schema is wrapped in.
    const STATEMENT_TYPE: &'static str;
    /// Frozen predicate type URI.
    const PREDICATE_TYPE: &'static str;

    /// The statement subjects.
    fn subject(state: &CraftingState) -> Result<Vec<ResourceDescriptor>, CraftError>;

    /// The predicate body.
    fn predicate(
        state: &CraftingState,
        options: &RenderOptions,
    ) -> Result<serde_json::Value, CraftError>;
}

/// Render `state` into an in-toto statement using `version`.
///
/// # Errors
///
/// [`CraftError::MalformedDigest`], [`CraftError::MissingDigest`] or
/// [`CraftError::ReservedAnnotation`] if any material cannot be represented;
/// malformed evidence blocks signing.
pub fn render(
    state: &CraftingState,
    version: PredicateVersion,
    options: &RenderOptions,
) -> Result<Statement, CraftError> {
    debug!(run_id = state.run_id(), %version, "rendering attestation");
    match version {
        PredicateVersion::V02 => render_with::<v02::RendererV02>(state, options),
        PredicateVersion::V1 => render_with::<v1::RendererV1>(state, options),
    }
}

fn render_with<R: PredicateRenderer>(
    state: &CraftingState,
    options: &RenderOptions,
) -> Result<Statement, CraftError> {
    Ok(Statement {
        statement_type: R::STATEMENT_TYPE.to_owned(),
        subject: R::subject(state)?,
        predicate_type: R::PREDICATE_TYPE.to_owned(),
        predicate: R::predicate(state, options)?,
    })
}

/// Subject carrying the SHA-256 of the canonical attestation.
pub(crate) fn workflow_subject(state: &CraftingState) -> Result<ResourceDescriptor, CraftError> {
    let digest = canonical::canonical_sha256(&state.attestation)?;
    Ok(ResourceDescriptor::with_digest(
        format!("{WORKFLOW_SUBJECT_PREFIX}{}", state.attestation.workflow.name),
        "sha256",
        &digest,
    ))
}

/// Identifies the producing tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    /// Builder identifier, e.g. `tessera/0.1.0`.
    pub id: String,
}

/// Workflow identity and timing shared by both schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Workflow name.
    pub name: String,
    /// Project name.
    pub project: String,
    /// Owning team.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Run identifier.
    pub workflow_run_id: String,
    /// Contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    /// Contract revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_revision: Option<u32>,
    /// When crafting started.
    pub initialized_at: DateTime<Utc>,
    /// When crafting finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    pub(crate) fn from_state(state: &CraftingState, options: &RenderOptions) -> Self {
        let w = &state.attestation.workflow;
        Self {
            name: w.name.clone(),
            project: w.project.clone(),
            team: w.team.clone(),
            organization: w.organization.clone(),
            workflow_run_id: w.run_id.clone(),
            contract_name: w.contract_name.clone(),
            contract_revision: w.contract_revision,
            initialized_at: state.attestation.initialized_at,
            finished_at: options.finished_at,
        }
    }

    pub(crate) fn workflow(&self) -> WorkflowMeta {
        WorkflowMeta {
            name: self.name.clone(),
            project: self.project.clone(),
            team: self.team.clone(),
            organization: self.organization.clone(),
            run_id: self.workflow_run_id.clone(),
            contract_name: self.contract_name.clone(),
            contract_revision: self.contract_revision,
        }
    }
}

/// A decoded predicate of either schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Legacy schema.
    V02(v02::ProvenanceV02),
    /// Resource-descriptor schema.
    V1(v1::ProvenanceV1),
}

/// Projection of a decoded predicate into the version-agnostic view.
pub trait ToNormalized {
    /// Normalize the predicate body.
    fn to_normalized(&self) -> Result<NormalizedPredicate, PredicateError>;
}

impl Predicate {
    /// Decode a statement's predicate, selecting the schema by predicate type.
    ///
    /// # Errors
    ///
    /// - [`PredicateError::UnsupportedPredicateType`] for unknown types;
    ///   there is no fallback decoder.
    /// - [`PredicateError::Malformed`] if the body does not match its schema.
    pub fn decode(statement: &Statement) -> Result<Self, PredicateError> {
        match statement.predicate_type.as_str() {
            v02::PREDICATE_TYPE => Ok(Self::V02(serde_json::from_value(
                statement.predicate.clone(),
            )?)),
            v1::PREDICATE_TYPE => Ok(Self::V1(serde_json::from_value(
                statement.predicate.clone(),
            )?)),
            other => Err(PredicateError::UnsupportedPredicateType(other.to_owned())),
        }
    }

    /// The schema this predicate was decoded with.
    #[must_use]
    pub const fn version(&self) -> PredicateVersion {
        match self {
            Self::V02(_) => PredicateVersion::V02,
            Self::V1(_) => PredicateVersion::V1,
        }
    }
}

impl ToNormalized for Predicate {
    fn to_normalized(&self) -> Result<NormalizedPredicate, PredicateError> {
        match self {
            Self::V02(p) => p.to_normalized(),
            Self::V1(p) => p.to_normalized(),
        }
    }
}

/// Version-agnostic view of an attestation predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedPredicate {
    /// Predicate type the statement declared.
    pub predicate_type: String,
    /// Build type URI.
    pub build_type: String,
    /// Builder identifier.
    pub builder_id: String,
    /// Workflow identity.
    pub workflow: WorkflowMeta,
    /// When crafting started.
    pub initialized_at: DateTime<Utc>,
    /// When crafting finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// CI system.
    pub runner_type: RunnerType,
    /// Link to the CI job.
    pub runner_url: Option<String>,
    /// Captured environment variables.
    pub env_vars: BTreeMap<String, String>,
    /// Run-level annotations.
    pub annotations: BTreeMap<String, String>,
    /// Every material, in name order.
    pub materials: Vec<NormalizedMaterial>,
    /// HEAD commit hash, when the statement pins one.
    pub git_commit: Option<String>,
}

impl NormalizedPredicate {
    /// Look up a material by logical name.
    #[must_use]
    pub fn material(&self, name: &str) -> Option<&NormalizedMaterial> {
        self.materials.iter().find(|m| m.name == name)
    }
}

/// Decode and normalize a statement in one step.
///
/// Subject-level facts (the git HEAD pin) are folded into the result.
pub fn normalize_statement(statement: &Statement) -> Result<NormalizedPredicate, PredicateError> {
    let mut normalized = Predicate::decode(statement)?.to_normalized()?;
    normalized.git_commit = statement
        .subject_named(GIT_HEAD_SUBJECT)
        .and_then(|s| s.digest.get("sha1"))
        .cloned();
    Ok(normalized)
}
