//! Material model and normalization.
//!
//! A [`Material`] is one piece of evidence collected during a workflow
//! run. Whatever its variant, it leaves the crafting pipeline through
//! [`CraftedMaterial::normalize`], which projects it into the single
//! version-agnostic [`NormalizedMaterial`] shape that renderers,
//! extractors and downstream consumers share.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CraftError;

/// Prefix of annotation keys owned by tessera itself.
pub const RESERVED_ANNOTATION_PREFIX: &str = "tessera.";

/// Every kind of material the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialType {
    /// Free-form textual fact.
    String,
    /// OCI container image reference.
    ContainerImage,
    /// Generic file artifact.
    Artifact,
    /// `CycloneDX` SBOM in JSON form.
    SbomCyclonedxJson,
    /// SPDX SBOM in JSON form.
    SbomSpdxJson,
    /// `JUnit` XML test report.
    JunitXml,
    /// `OpenVEX` document.
    Openvex,
    /// SARIF static analysis report.
    Sarif,
    /// Any other evidence file.
    Evidence,
}

impl MaterialType {
    /// All variants, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::String,
        Self::ContainerImage,
        Self::Artifact,
        Self::SbomCyclonedxJson,
        Self::SbomSpdxJson,
        Self::JunitXml,
        Self::Openvex,
        Self::Sarif,
        Self::Evidence,
    ];

    /// The wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::ContainerImage => "CONTAINER_IMAGE",
            Self::Artifact => "ARTIFACT",
            Self::SbomCyclonedxJson => "SBOM_CYCLONEDX_JSON",
            Self::SbomSpdxJson => "SBOM_SPDX_JSON",
            Self::JunitXml => "JUNIT_XML",
            Self::Openvex => "OPENVEX",
            Self::Sarif => "SARIF",
            Self::Evidence => "EVIDENCE",
        }
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown material type `{s}`"))
    }
}

/// File-backed material kinds, i.e. the subset of [`MaterialType`] an
/// [`Material::Artifact`] may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    /// Generic file artifact.
    #[default]
    Artifact,
    /// `CycloneDX` SBOM in JSON form.
    SbomCyclonedxJson,
    /// SPDX SBOM in JSON form.
    SbomSpdxJson,
    /// `JUnit` XML test report.
    JunitXml,
    /// `OpenVEX` document.
    Openvex,
    /// SARIF static analysis report.
    Sarif,
    /// Any other evidence file.
    Evidence,
}

impl From<ArtifactKind> for MaterialType {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Artifact => Self::Artifact,
            ArtifactKind::SbomCyclonedxJson => Self::SbomCyclonedxJson,
            ArtifactKind::SbomSpdxJson => Self::SbomSpdxJson,
            ArtifactKind::JunitXml => Self::JunitXml,
            ArtifactKind::Openvex => Self::Openvex,
            ArtifactKind::Sarif => Self::Sarif,
            ArtifactKind::Evidence => Self::Evidence,
        }
    }
}

impl TryFrom<MaterialType> for ArtifactKind {
    type Error = MaterialType;

    fn try_from(t: MaterialType) -> Result<Self, Self::Error> {
        match t {
            MaterialType::Artifact => Ok(Self::Artifact),
            MaterialType::SbomCyclonedxJson => Ok(Self::SbomCyclonedxJson),
            MaterialType::SbomSpdxJson => Ok(Self::SbomSpdxJson),
            MaterialType::JunitXml => Ok(Self::JunitXml),
            MaterialType::Openvex => Ok(Self::Openvex),
            MaterialType::Sarif => Ok(Self::Sarif),
            MaterialType::Evidence => Ok(Self::Evidence),
            other @ (MaterialType::String | MaterialType::ContainerImage) => Err(other),
        }
    }
}

/// A content digest split into algorithm and hex value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest {
    /// Hash algorithm name, e.g. `sha256`.
    pub algorithm: String,
    /// Hex-encoded digest value.
    pub hex: String,
}

impl Digest {
    /// Parse a `<algorithm>:<hex>` string.
    ///
    /// Returns `None` when the separator is missing or either side is empty.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (algorithm, hex) = s.split_once(':')?;
        if algorithm.is_empty() || hex.is_empty() {
            return None;
        }
        Some(Self {
            algorithm: algorithm.to_owned(),
            hex: hex.to_owned(),
        })
    }

    /// A SHA-256 digest from its hex value.
    #[must_use]
    pub fn sha256(hex: impl Into<String>) -> Self {
        Self {
            algorithm: "sha256".to_owned(),
            hex: hex.into(),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// One piece of evidence. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Material {
    /// A file produced or consumed by the run.
    Artifact {
        /// File name.
        name: String,
        /// `<algorithm>:<hex>` digest of the file content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        /// Whether the attestation is about this file.
        #[serde(default)]
        is_subject: bool,
        /// File content, when embedded inline.
        #[serde(default, skip_serializing_if = "Option::is_none", with = "content_b64")]
        content: Option<Vec<u8>>,
        /// What sort of file this is.
        #[serde(default)]
        artifact_type: ArtifactKind,
    },
    /// A container image.
    ContainerImage {
        /// Image reference without digest.
        name: String,
        /// `<algorithm>:<hex>` manifest digest.
        digest: String,
        /// Whether the attestation is about this image.
        #[serde(default)]
        is_subject: bool,
    },
    /// A free-form textual fact.
    StringFact {
        /// The fact itself.
        value: String,
    },
}

impl Material {
    /// The [`MaterialType`] this material normalizes to.
    #[must_use]
    pub fn material_type(&self) -> MaterialType {
        match self {
            Self::Artifact { artifact_type, .. } => (*artifact_type).into(),
            Self::ContainerImage { .. } => MaterialType::ContainerImage,
            Self::StringFact { .. } => MaterialType::String,
        }
    }

    /// Whether this material must appear among the statement subjects.
    #[must_use]
    pub const fn is_subject(&self) -> bool {
        match self {
            Self::Artifact { is_subject, .. } | Self::ContainerImage { is_subject, .. } => {
                *is_subject
            }
            Self::StringFact { .. } => false,
        }
    }
}

/// A material as recorded in the crafting state, with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CraftedMaterial {
    /// The evidence itself.
    pub material: Material,
    /// User annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Whether the content was uploaded to content-addressable storage.
    #[serde(default)]
    pub uploaded_to_cas: bool,
}

impl CraftedMaterial {
    /// Wrap a material with no annotations.
    #[must_use]
    pub const fn new(material: Material) -> Self {
        Self {
            material,
            annotations: BTreeMap::new(),
            uploaded_to_cas: false,
        }
    }

    /// Add a user annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Mark the content as uploaded to content-addressable storage.
    #[must_use]
    pub const fn uploaded(mut self) -> Self {
        self.uploaded_to_cas = true;
        self
    }

    /// Reject user annotations that collide with the reserved namespace.
    pub fn check_annotations(&self, name: &str) -> Result<(), CraftError> {
        match self
            .annotations
            .keys()
            .find(|k| k.starts_with(RESERVED_ANNOTATION_PREFIX))
        {
            Some(key) => Err(CraftError::ReservedAnnotation {
                material: name.to_owned(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Project this material into its canonical shape under logical `name`.
    ///
    /// # Errors
    ///
    /// - [`CraftError::MalformedDigest`] if a digest string lacks the
    ///   `<algorithm>:<hex>` form.
    /// - [`CraftError::ReservedAnnotation`] if a user annotation uses the
    ///   reserved namespace.
    pub fn normalize(&self, name: &str) -> Result<NormalizedMaterial, CraftError> {
        self.check_annotations(name)?;

        let parse = |raw: &str| {
            Digest::parse(raw).ok_or_else(|| CraftError::MalformedDigest {
                material: name.to_owned(),
                digest: raw.to_owned(),
            })
        };

        let mut normalized = NormalizedMaterial {
            name: name.to_owned(),
            material_type: self.material.material_type(),
            value: String::new(),
            digest: None,
            filename: None,
            content: None,
            annotations: self.annotations.clone(),
            uploaded_to_cas: self.uploaded_to_cas,
            embedded_inline: false,
            is_output: self.material.is_subject(),
        };

        match &self.material {
            Material::Artifact {
                name: file,
                digest,
                content,
                ..
            } => {
                normalized.value.clone_from(file);
                normalized.filename = Some(file.clone());
                normalized.digest = digest.as_deref().map(parse).transpose()?;
                normalized.content.clone_from(content);
                normalized.embedded_inline = content.is_some();
            }
            Material::ContainerImage { name: image, digest, .. } => {
                normalized.value.clone_from(image);
                normalized.digest = Some(parse(digest)?);
            }
            Material::StringFact { value } => {
                normalized.value.clone_from(value);
            }
        }

        Ok(normalized)
    }
}

/// Canonical, version-agnostic view of a material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMaterial {
    /// Logical material name (the key in the crafting state).
    pub name: String,
    /// Material type.
    #[serde(rename = "type")]
    pub material_type: MaterialType,
    /// File name, image reference, or the string value.
    pub value: String,
    /// Content digest; always absent for strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    /// File name for file-backed materials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Inline content bytes.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "content_b64")]
    pub content: Option<Vec<u8>>,
    /// User annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Whether the content lives in content-addressable storage.
    #[serde(default)]
    pub uploaded_to_cas: bool,
    /// Whether the content is embedded in the attestation.
    #[serde(default)]
    pub embedded_inline: bool,
    /// Whether this material is a statement subject.
    #[serde(default)]
    pub is_output: bool,
}

/// Serde adapter encoding optional bytes as standard base64.
pub(crate) mod content_b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option, reason = "signature imposed by serde `with`")]
    pub(crate) fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
