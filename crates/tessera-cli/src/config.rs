//! CLI configuration file.
//!
//! An optional TOML file, by default `<config dir>/tessera/config.toml`.
//! Every key may be overridden on the command line.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use tessera_craft::render::PredicateVersion;

/// Settings read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    /// Root directory of the crafting state store.
    pub(crate) state_dir: Option<PathBuf>,
    /// PKCS#8 PEM signing key.
    pub(crate) signing_key: Option<PathBuf>,
    /// Predicate schema to render on push.
    pub(crate) predicate_version: Option<PredicateVersion>,
    /// Builder identifier placed in attestations.
    pub(crate) builder_id: Option<String>,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "tessera", "tessera")
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit path must exist. The default path is optional; when it
    /// is absent every setting takes its default.
    pub(crate) fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match project_dirs() {
                Some(dirs) => {
                    let p = dirs.config_dir().join("config.toml");
                    if !p.exists() {
                        tracing::debug!(path = %p.display(), "no config file, using defaults");
                        return Ok(Self::default());
                    }
                    p
                }
                None => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Where crafting states are stored.
    pub(crate) fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            project_dirs().map_or_else(
                || PathBuf::from(".tessera/state"),
                |dirs| dirs.data_dir().join("state"),
            )
        })
    }

    /// The signing key path.
    pub(crate) fn signing_key(&self) -> PathBuf {
        self.signing_key
            .clone()
            .unwrap_or_else(tessera_craft::signer::default_key_path)
    }

    /// The predicate version to render.
    pub(crate) fn predicate_version(&self) -> PredicateVersion {
        self.predicate_version.unwrap_or_default()
    }

    /// The builder identifier.
    pub(crate) fn builder_id(&self) -> String {
        self.builder_id
            .clone()
            .unwrap_or_else(tessera_craft::metadata::builder_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_keys() {
        let config: Config = toml::from_str(
            r#"
            state_dir = "/tmp/state"
            signing_key = "/tmp/key.pem"
            predicate_version = "v0.2"
            builder_id = "ci/1"
            "#,
        )
        .unwrap();
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/state"));
        assert_eq!(config.signing_key(), PathBuf::from("/tmp/key.pem"));
        assert_eq!(config.predicate_version(), PredicateVersion::V02);
        assert_eq!(config.builder_id(), "ci/1");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.predicate_version(), PredicateVersion::V1);
        assert!(config.builder_id().starts_with("tessera/"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }
}
