//! Resource-descriptor predicate schema.
//!
//! Every material is an in-toto resource descriptor. Facts the descriptor
//! format has no field for travel as reserved `tessera.material.*`
//! annotations; boolean flags are the strings `"true"` or `"false"` and an
//! absent flag means false. Strings travel as descriptor content.
//!
//! Decoding is strict: a missing or malformed reserved annotation, or a
//! descriptor lacking a field its type requires, is an error. Nothing is
//! guessed.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CraftError, PredicateError};
use crate::material::{Digest, MaterialType, NormalizedMaterial, RESERVED_ANNOTATION_PREFIX};
use crate::state::{CraftingState, GitCommit, RunnerType};
use crate::statement::{ResourceDescriptor, Statement};

use super::{
    Builder, GIT_HEAD_SUBJECT, NormalizedPredicate, PredicateRenderer, RenderOptions, RunMetadata,
    ToNormalized, workflow_subject,
};

/// Predicate type URI of this schema.
pub const PREDICATE_TYPE: &str = "https://tessera.dev/attestation/v1";

/// Build type recorded in the predicate.
pub const BUILD_TYPE: &str = "https://tessera.dev/build/v1";

/// Logical material name.
pub const ANNOTATION_NAME: &str = "tessera.material.name";
/// Material type wire name.
pub const ANNOTATION_TYPE: &str = "tessera.material.type";
/// Content was uploaded to content-addressable storage.
pub const ANNOTATION_CAS: &str = "tessera.material.cas";
/// Content is embedded in the descriptor.
pub const ANNOTATION_INLINE: &str = "tessera.material.cas.inline";
/// Material is a statement subject.
pub const ANNOTATION_OUTPUT: &str = "tessera.material.output";

/// The resource-descriptor predicate body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceV1 {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_url: Option<String>,
    /// Captured environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Every material, in name order.
    #[serde(default)]
    pub materials: Vec<ResourceDescriptor>,
    /// Run-level annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn flag(descriptor: ResourceDescriptor, key: &str, set: bool) -> ResourceDescriptor {
    if set {
        descriptor.annotate(key, "true")
    } else {
        descriptor
    }
}

fn descriptor(m: NormalizedMaterial) -> Result<ResourceDescriptor, CraftError> {
    let mut d = if m.material_type == MaterialType::String {
        ResourceDescriptor {
            content: Some(m.value.into_bytes()),
            ..ResourceDescriptor::default()
        }
    } else {
        let digest = m.digest.ok_or_else(|| CraftError::MissingDigest {
            material: m.name.clone(),
        })?;
        ResourceDescriptor {
            content: m.content,
            ..ResourceDescriptor::with_digest(m.value, &digest.algorithm, &digest.hex)
        }
    };

    d = d
        .annotate(ANNOTATION_NAME, m.name)
        .annotate(ANNOTATION_TYPE, m.material_type.as_str());
    d = flag(d, ANNOTATION_CAS, m.uploaded_to_cas);
    d = flag(d, ANNOTATION_INLINE, m.embedded_inline);
    d = flag(d, ANNOTATION_OUTPUT, m.is_output);
    for (key, value) in m.annotations {
        d = d.annotate(key, value);
    }
    Ok(d)
}

fn git_head(commit: &GitCommit) -> ResourceDescriptor {
    let mut d = ResourceDescriptor::with_digest(GIT_HEAD_SUBJECT, "sha1", &commit.hash)
        .annotate("author.email", &commit.author_email)
        .annotate("author.name", &commit.author_name)
        .annotate(
            "date",
            commit.date.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .annotate("message", &commit.message);
    if let Some(remote) = &commit.remote_url {
        d = d.annotate("remote.url", remote);
    }
    d
}

/// Renders [`ProvenanceV1`] predicates.
#[derive(Debug, Clone, Copy)]
pub struct RendererV1;

impl PredicateRenderer for RendererV1 {
    const STATEMENT_TYPE: &'static str = Statement::TYPE_V1;
    const PREDICATE_TYPE: &'static str = PREDICATE_TYPE;

    /// Unlike v0.2, a digestless non-string material is an error rather than
    /// skipped, because a v1 descriptor without a digest cannot be decoded.
    fn subject(state: &CraftingState) -> Result<Vec<ResourceDescriptor>, CraftError> {
        let mut subject = vec![workflow_subject(state)?];
        if let Some(commit) = &state.attestation.git_commit {
            subject.push(git_head(commit));
        }

        for m in state.normalized_materials()? {
            if !m.is_output {
                continue;
            }
            let digest = m.digest.ok_or_else(|| CraftError::MissingDigest {
                material: m.name.clone(),
            })?;
            subject.push(
                ResourceDescriptor::with_digest(m.value, &digest.algorithm, &digest.hex)
                    .annotate(ANNOTATION_NAME, m.name)
                    .annotate(ANNOTATION_TYPE, m.material_type.as_str()),
            );
        }
        Ok(subject)
    }

    fn predicate(
        state: &CraftingState,
        options: &RenderOptions,
    ) -> Result<serde_json::Value, CraftError> {
        let predicate = ProvenanceV1 {
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
                .map(descriptor)
                .collect::<Result<_, _>>()?,
            annotations: state.attestation.annotations.clone(),
        };
        Ok(serde_json::to_value(predicate)?)
    }
}

/// Reserved facts and user annotations split out of a descriptor.
#[derive(Default)]
struct Annotations {
    name: Option<String>,
    material_type: Option<MaterialType>,
    uploaded_to_cas: bool,
    embedded_inline: bool,
    is_output: bool,
    user: BTreeMap<String, String>,
}

fn invalid_annotation(key: &str, value: &Value) -> PredicateError {
    PredicateError::InvalidAnnotation {
        key: key.to_owned(),
        value: value.to_string(),
    }
}

impl Annotations {
    fn parse(annotations: &serde_json::Map<String, Value>) -> Result<Self, PredicateError> {
        let mut out = Self::default();
        for (key, raw) in annotations {
            let Value::String(value) = raw else {
                return Err(invalid_annotation(key, raw));
            };
            let parse_flag = || match value.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(invalid_annotation(key, raw)),
            };

            match key.as_str() {
                ANNOTATION_NAME => out.name = Some(value.clone()),
                ANNOTATION_TYPE => {
                    out.material_type = Some(
                        MaterialType::ALL
                            .into_iter()
                            .find(|t| t.as_str() == value)
                            .ok_or_else(|| invalid_annotation(key, raw))?,
                    );
                }
                ANNOTATION_CAS => out.uploaded_to_cas = parse_flag()?,
                ANNOTATION_INLINE => out.embedded_inline = parse_flag()?,
                ANNOTATION_OUTPUT => out.is_output = parse_flag()?,
                k if k.starts_with(RESERVED_ANNOTATION_PREFIX) => {
                    return Err(invalid_annotation(key, raw));
                }
                _ => {
                    out.user.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(out)
    }
}

fn material(d: &ResourceDescriptor) -> Result<NormalizedMaterial, PredicateError> {
    let a = Annotations::parse(&d.annotations)?;
    let name = a.name.ok_or(PredicateError::MissingAnnotation {
        key: ANNOTATION_NAME,
    })?;
    let material_type = a.material_type.ok_or(PredicateError::MissingAnnotation {
        key: ANNOTATION_TYPE,
    })?;

    let missing = |field| PredicateError::MissingField {
        material: name.clone(),
        field,
    };
    let invalid = |reason: &str| PredicateError::InvalidMaterial {
        material: name.clone(),
        reason: reason.to_owned(),
    };

    let (value, digest, content) = if material_type == MaterialType::String {
        if !d.digest.is_empty() {
            return Err(invalid("STRING material must not carry a digest"));
        }
        if a.embedded_inline {
            return Err(invalid("STRING material cannot be embedded inline"));
        }
        let bytes = d.content.clone().ok_or_else(|| missing("content"))?;
        let value = String::from_utf8(bytes).map_err(|_| invalid("content is not UTF-8"))?;
        (value, None, None)
    } else {
        let value = d.name.clone().ok_or_else(|| missing("name"))?;
        let mut digests = d.digest.iter();
        let (algorithm, hex) = digests.next().ok_or_else(|| missing("digest"))?;
        if digests.next().is_some() {
            return Err(invalid("more than one digest"));
        }
        match (a.embedded_inline, &d.content) {
            (true, None) => return Err(missing("content")),
            (false, Some(_)) => return Err(invalid("content present without inline flag")),
            _ => {}
        }
        let digest = Digest {
            algorithm: algorithm.clone(),
            hex: hex.clone(),
        };
        (value, Some(digest), d.content.clone())
    };

    let is_file = !matches!(
        material_type,
        MaterialType::String | MaterialType::ContainerImage
    );

    Ok(NormalizedMaterial {
        filename: is_file.then(|| value.clone()),
        name,
        material_type,
        value,
        digest,
        content,
        annotations: a.user,
        uploaded_to_cas: a.uploaded_to_cas,
        embedded_inline: a.embedded_inline,
        is_output: a.is_output,
    })
}

impl ToNormalized for ProvenanceV1 {
    fn to_normalized(&self) -> Result<NormalizedPredicate, PredicateError> {
        let mut materials = self
            .materials
            .iter()
            .map(material)
            .collect::<Result<Vec<_>, _>>()?;
        materials.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = materials.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(PredicateError::InvalidMaterial {
                material: pair[0].name.clone(),
                reason: "duplicate material name".to_owned(),
            });
        }

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
