//! Error types for crafting, persistence, rendering and signing.

/// Errors raised while mutating or validating a crafting state.
#[derive(Debug, thiserror::Error)]
pub enum CraftError {
    /// One or more non-optional materials declared by the contract are absent.
    ///
    /// Carries the full, sorted list so callers can prompt once.
    #[error("missing required materials: {}", missing.join(", "))]
    MissingMaterials {
        /// Sorted names of the missing materials.
        missing: Vec<String>,
    },

    /// A digest string is not of the form `<algorithm>:<hex>`.
    #[error("material `{material}` has malformed digest `{digest}`")]
    MalformedDigest {
        /// Logical material name.
        material: String,
        /// The offending digest string.
        digest: String,
    },

    /// A material that must carry a digest has none.
    #[error("material `{material}` has no digest")]
    MissingDigest {
        /// Logical material name.
        material: String,
    },

    /// The contract declares a different type for this material name.
    #[error("material `{name}` must be of type {expected}, got {actual}")]
    MaterialTypeMismatch {
        /// Logical material name.
        name: String,
        /// Type declared by the contract.
        expected: String,
        /// Type of the material being added.
        actual: String,
    },

    /// A user annotation uses a key from the reserved `tessera.` namespace.
    #[error("material `{material}` uses reserved annotation key `{key}`")]
    ReservedAnnotation {
        /// Logical material name.
        material: String,
        /// The offending key.
        key: String,
    },

    /// Environment variables required by the contract are not set.
    #[error("missing required environment variables: {}", missing.join(", "))]
    MissingEnvVars {
        /// Sorted names of the unset variables.
        missing: Vec<String>,
    },

    /// A contract file could not be read or parsed.
    #[error("invalid contract `{path}`: {reason}")]
    InvalidContract {
        /// Path of the contract file.
        path: String,
        /// Parser or I/O failure.
        reason: String,
    },

    /// Reading the git checkout failed.
    #[error("git error: {0}")]
    Git(String),

    /// Failed to serialize the state.
    #[error("failed to serialize crafting state: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Errors from the optimistic-concurrency state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No state has been stored for this run.
    #[error("no crafting state stored for run `{run_id}`")]
    NotFound {
        /// The run that was looked up.
        run_id: String,
    },

    /// The stored blob changed since the caller read it.
    #[error("crafting state conflict: stored digest {stored_digest}, supplied {supplied_digest}")]
    Conflict {
        /// Digest of the blob currently in the store.
        stored_digest: String,
        /// Base digest the caller supplied.
        supplied_digest: String,
    },

    /// A state already exists and the caller did not ask to overwrite it.
    #[error("crafting state for run `{run_id}` already initialized")]
    AlreadyInitialized {
        /// The run that was initialized twice.
        run_id: String,
    },

    /// The run id cannot be used as a storage key.
    #[error("invalid run id `{0}`")]
    InvalidRunId(String),

    /// The stored blob does not decode as a crafting state.
    #[error("stored state for run `{run_id}` is corrupt: {source}")]
    Corrupt {
        /// The affected run.
        run_id: String,
        /// The decode failure.
        source: serde_json::Error,
    },

    /// A lock could not be acquired.
    #[error("failed to lock state for run `{run_id}`: {reason}")]
    Lock {
        /// The affected run.
        run_id: String,
        /// Why locking failed.
        reason: String,
    },

    /// The delta applied during an update failed.
    #[error(transparent)]
    Craft(#[from] CraftError),

    /// Underlying storage I/O failed.
    #[error("state store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from rendering and signing attestations.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// The crafting state cannot be rendered.
    #[error("cannot render attestation: {0}")]
    Render(#[from] CraftError),

    /// The statement is structurally unfit for signing.
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// A DSSE envelope is structurally broken.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Failed to serialize the attestation statement.
    #[error("failed to serialize attestation: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Signing backend failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Cryptographic key operation failed (load, generate, or parse).
    #[error("key error: {0}")]
    KeyError(String),

    /// I/O error during attestation operations.
    #[error("attestation I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from decoding a predicate back into normalized materials.
#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    /// No decoder is registered for this predicate type.
    #[error("unsupported predicate type `{0}`")]
    UnsupportedPredicateType(String),

    /// The predicate body does not match its declared schema.
    #[error("malformed predicate: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A reserved annotation is absent from a material descriptor.
    #[error("material descriptor is missing annotation `{key}`")]
    MissingAnnotation {
        /// The reserved annotation key.
        key: &'static str,
    },

    /// A reserved or user annotation has an unusable value.
    #[error("annotation `{key}` has invalid value: {value}")]
    InvalidAnnotation {
        /// The annotation key.
        key: String,
        /// The rejected value, rendered as JSON.
        value: String,
    },

    /// A descriptor lacks a field required for its material type.
    #[error("material `{material}` descriptor is missing {field}")]
    MissingField {
        /// Logical material name.
        material: String,
        /// Which field is absent.
        field: &'static str,
    },

    /// A digest or content field cannot be decoded.
    #[error("material `{material}`: {reason}")]
    InvalidMaterial {
        /// Logical material name.
        material: String,
        /// Decode failure.
        reason: String,
    },
}
