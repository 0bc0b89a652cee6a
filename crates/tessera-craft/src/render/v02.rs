//! Legacy predicate schema.
//!
//! Materials are a typed list; file-backed materials and images use an
//! SLSA-style `{uri, digest}` pair and strings use `stringVal`. The
//! schema is frozen: decoding stays lenient about absent digests because
//! producers of this version never guaranteed them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CraftError, PredicateError};
use crate::material::{Digest, MaterialType, NormalizedMaterial, content_b64};
use crate::state::{CraftingState, RunnerType};
use crate::statement::{ResourceDescriptor, Statement};

use super::{
    Builder, NormalizedPredicate, PredicateRenderer, RenderOptions, RunMetadata, ToNormalized,
    workflow_subject,
};

/// Predicate type URI of this schema.
pub const PREDICATE_TYPE: &str = "https://tessera.dev/attestation/v0.2";

/// Build type recorded in the predicate.
pub const BUILD_TYPE: &str = "https://tessera.dev/build/v0.2";

/// The legacy predicate body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV02 {
    /// Build type URI.
    pub build_type: String,
    /// Producing tool.
    pub builder: Builder,
    /// Workflow identity and timing.
    pub metadata: RunMetadata,
    /// CI system.
    #[serde(default)]
    pub runner_type: RunnerType,
    /// Link to the CI job.
    #[serde(rename = "runnerURL", default, skip_serializing_if = "Option::is_none")]
    pub runner_url: Option<String>,
    /// Captured environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Every material, in name order.
    #[serde(default)]
    pub materials: Vec<MaterialV02>,
    /// Run-level annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// One entry of the legacy material list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialV02 {
    /// Logical material name.
    pub name: String,
    /// Material type.
    #[serde(rename = "type")]
    pub material_type: MaterialType,
    /// Where the evidence is and what it hashes to.
    pub material: MaterialValueV02,
    /// User annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Whether the content was uploaded to content-addressable storage.
    #[serde(rename = "uploadedToCAS", default)]
    pub uploaded_to_cas: bool,
    /// Inline content.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "content_b64")]
    pub content: Option<Vec<u8>>,
    /// Whether the material is a statement subject.
    #[serde(default)]
    pub output: bool,
}

/// The value half of a legacy material entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialValueV02 {
    /// A resource identified by URI and digest.
    #[serde(rename = "slsa")]
    Slsa {
        /// File name or image reference.
        uri: String,
        /// Digests keyed by algorithm; empty when none was recorded.
        #[serde(default)]
        digest: BTreeMap<String, String>,
    },
    /// A free-form string.
    #[serde(rename = "stringVal")]
    StringVal(String),
}

impl MaterialV02 {
    fn from_normalized(m: NormalizedMaterial) -> Self {
        let material = if m.material_type == MaterialType::String {
            MaterialValueV02::StringVal(m.value)
        } else {
            MaterialValueV02::Slsa {
                uri: m.value,
                digest: m
                    .digest
                    .map(|d| BTreeMap::from([(d.algorithm, d.hex)]))
                    .unwrap_or_default(),
            }
        };

        Self {
            name: m.name,
            material_type: m.material_type,
            material,
            annotations: m.annotations,
            uploaded_to_cas: m.uploaded_to_cas,
            content: m.content,
            output: m.is_output,
        }
    }

    fn to_normalized(&self) -> Result<NormalizedMaterial, PredicateError> {
        let invalid = |reason: &str| PredicateError::InvalidMaterial {
            material: self.name.clone(),
            reason: reason.to_owned(),
        };

        let (value, digest) = match (&self.material, self.material_type) {
            (MaterialValueV02::StringVal(s), MaterialType::String) => (s.clone(), None),
            (MaterialValueV02::StringVal(_), _) => {
                return Err(invalid("only STRING materials may carry stringVal"));
            }
            (MaterialValueV02::Slsa { .. }, MaterialType::String) => {
                return Err(invalid("STRING material must carry stringVal"));
            }
            (MaterialValueV02::Slsa { uri, digest }, _) => {
                if digest.len() > 1 {
                    return Err(invalid("more than one digest"));
                }
                let digest = digest.iter().next().map(|(algorithm, hex)| Digest {
                    algorithm: algorithm.clone(),
                    hex: hex.clone(),
                });
                (uri.clone(), digest)
            }
        };

        let is_file = !matches!(
            self.material_type,
            MaterialType::String | MaterialType::ContainerImage
        );

        Ok(NormalizedMaterial {
            name: self.name.clone(),
            material_type: self.material_type,
            filename: is_file.then(|| value.clone()),
            value,
            digest,
            content: self.content.clone(),
            annotations: self.annotations.clone(),
            uploaded_to_cas: self.uploaded_to_cas,
            embedded_inline: self.content.is_some(),
            is_output: self.output,
        })
    }
}

/// Renders [`ProvenanceV02`] predicates.
#[derive(Debug, Clone, Copy)]
pub struct RendererV02;

impl PredicateRenderer for RendererV02 {
    const STATEMENT_TYPE: &'static str = Statement::TYPE_V01;
    const PREDICATE_TYPE: &'static str = PREDICATE_TYPE;

    /// The workflow digest plus every output material that has a digest.
    /// Outputs without one are skipped here but remain in the materials.
    fn subject(state: &CraftingState) -> Result<Vec<ResourceDescriptor>, CraftError> {
        let mut subject = vec![workflow_subject(state)?];
        for m in state.normalized_materials()? {
            if let (true, Some(digest)) = (m.is_output, &m.digest) {
                subject.push(ResourceDescriptor::with_digest(
                    m.value.clone(),
                    &digest.algorithm,
                    &digest.hex,
                ));
            }
        }
        Ok(subject)
    }

    fn predicate(
        state: &CraftingState,
        options: &RenderOptions,
    ) -> Result<serde_json::Value, CraftError> {
        let predicate = ProvenanceV02 {
            build_type: BUILD_TYPE.to_owned(),
            builder: Builder {
                id: options.builder_id.clone(),
            },
            metadata: RunMetadata::from_state(state, options),
            runner_type: state.attestation.runner_type,
            runner_url: state.attestation.runner_url.clone(),
            env: state.attestation.env_vars.clone(),
            materials: state
                .normalized_materials()?
                .into_iter()
                .map(MaterialV02::from_normalized)
                .collect(),
            annotations: state.attestation.annotations.clone(),
        };
        Ok(serde_json::to_value(predicate)?)
    }
}

impl ToNormalized for ProvenanceV02 {
    fn to_normalized(&self) -> Result<NormalizedPredicate, PredicateError> {
        let mut materials = self
            .materials
            .iter()
            .map(MaterialV02::to_normalized)
            .collect::<Result<Vec<_>, _>>()?;
        materials.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(NormalizedPredicate {
            predicate_type: PREDICATE_TYPE.to_owned(),
            build_type: self.build_type.clone(),
            builder_id: self.builder.id.clone(),
            workflow: self.metadata.workflow(),
            initialized_at: self.metadata.initialized_at,
            finished_at: self.metadata.finished_at,
            runner_type: self.runner_type,
            runner_url: self.runner_url.clone(),
            env_vars: self.env.clone(),
            annotations: self.annotations.clone(),
            materials,
            git_commit: None,
        })
    }
}
