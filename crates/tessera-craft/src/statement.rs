//! in-toto attestation statements.
//!
//! See: <https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::material::content_b64;

/// An in-toto attestation statement.
///
/// The predicate is kept as raw JSON; its shape is selected by
/// [`Statement::predicate_type`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// [`Statement::TYPE_V01`] or [`Statement::TYPE_V1`].
    #[serde(rename = "_type")]
    pub statement_type: String,
    /// What the attestation is about.
    pub subject: Vec<ResourceDescriptor>,
    /// Discriminates the predicate schema.
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    /// The predicate body.
    pub predicate: serde_json::Value,
}

impl Statement {
    /// in-toto statement v0.1 type URI.
    pub const TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";
    /// in-toto statement v1 type URI.
    pub const TYPE_V1: &str = "https://in-toto.io/Statement/v1";
    /// DSSE payload type of a serialized statement.
    pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

    /// Find the subject with the given name.
    #[must_use]
    pub fn subject_named(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.subject
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }
}

/// An in-toto v1 resource descriptor.
///
/// See: <https://github.com/in-toto/attestation/blob/main/spec/v1/resource_descriptor.md>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resource URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Digests keyed by algorithm.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digest: BTreeMap<String, String>,
    /// Inline content, base64 encoded on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "content_b64")]
    pub content: Option<Vec<u8>>,
    /// Where the resource can be downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_location: Option<String>,
    /// Media type of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub annotations: serde_json::Map<String, serde_json::Value>,
}

impl ResourceDescriptor {
    /// A named descriptor with a single digest.
    #[must_use]
    pub fn with_digest(name: impl Into<String>, algorithm: &str, hex: &str) -> Self {
        Self {
            name: Some(name.into()),
            digest: BTreeMap::from([(algorithm.to_owned(), hex.to_owned())]),
            ..Self::default()
        }
    }

    /// Add a string annotation.
    #[must_use]
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }
}
