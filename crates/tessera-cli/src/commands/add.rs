//! The `tessera add` subcommand.
//!
//! Records one material in a run's crafting state. Concurrent `add`
//! invocations against the same run are safe: the update is retried on
//! a compare-and-swap conflict.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr, eyre};
use tessera_craft::canonical::sha256_hex;
use tessera_craft::material::{ArtifactKind, CraftedMaterial, Material, MaterialType};

use crate::config::Config;

/// Arguments for `tessera add`.
#[derive(Args)]
#[command(group(
    clap::ArgGroup::new("value")
        .required(true)
        .args(["artifact", "image", "string"])
))]
pub struct AddArgs {
    /// Run identifier printed by `init`.
    #[arg(long)]
    pub run_id: String,

    /// Logical material name.
    #[arg(long)]
    pub name: String,

    /// Record a file.
    #[arg(long, value_name = "PATH")]
    pub artifact: Option<PathBuf>,

    /// Record a container image reference (requires --digest).
    #[arg(long, value_name = "REF", requires = "digest")]
    pub image: Option<String>,

    /// Record a free-form string.
    #[arg(long, value_name = "VALUE")]
    pub string: Option<String>,

    /// Image manifest digest, `<algorithm>:<hex>`.
    #[arg(long)]
    pub digest: Option<String>,

    /// Artifact kind, e.g. `SBOM_CYCLONEDX_JSON` (default `ARTIFACT`).
    #[arg(long, requires = "artifact")]
    pub kind: Option<MaterialType>,

    /// Mark the material as an output (a statement subject).
    #[arg(long)]
    pub output: bool,

    /// Embed the artifact content in the attestation.
    #[arg(long, requires = "artifact")]
    pub inline: bool,

    /// Record that the content was uploaded to content-addressable storage.
    #[arg(long)]
    pub uploaded: bool,

    /// Material annotation (repeatable).
    #[arg(long = "annotation", value_name = "KEY=VALUE")]
    pub annotations: Vec<String>,
}

fn build_material(args: &AddArgs) -> Result<Material> {
    if let Some(path) = &args.artifact {
        let content = std::fs::read(path)
            .wrap_err_with(|| format!("failed to read artifact {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("artifact path {} has no file name", path.display()))?;
        let artifact_type = match args.kind {
            Some(t) => ArtifactKind::try_from(t)
                .map_err(|t| eyre!("{t} is not a file-backed material type"))?,
            None => ArtifactKind::Artifact,
        };
        return Ok(Material::Artifact {
            name: file_name,
            digest: Some(format!("sha256:{}", sha256_hex(&content))),
            is_subject: args.output,
            content: args.inline.then_some(content),
            artifact_type,
        });
    }

    if let Some(image) = &args.image {
        let digest = args
            .digest
            .clone()
            .ok_or_else(|| eyre!("--image requires --digest"))?;
        return Ok(Material::ContainerImage {
            name: image.clone(),
            digest,
            is_subject: args.output,
        });
    }

    let value = args
        .string
        .clone()
        .ok_or_else(|| eyre!("one of --artifact, --image or --string is required"))?;
    if args.output {
        return Err(eyre!("string materials cannot be outputs"));
    }
    Ok(Material::StringFact { value })
}

/// Execute the add command.
pub fn execute(args: &AddArgs, config: &Config) -> Result<()> {
    let mut crafted = CraftedMaterial::new(build_material(args)?);
    crafted.annotations = super::parse_pairs(&args.annotations)?;
    if args.uploaded {
        crafted = crafted.uploaded();
    }

    let manager = super::state_manager(config)?;
    let (state, digest) = manager.update(&args.run_id, super::UPDATE_ATTEMPTS, |state| {
        state.add_material(&args.name, crafted.clone()).map(|_| ())
    })?;

    tracing::info!(
        run_id = state.run_id(),
        material = %args.name,
        digest = %digest,
        "material recorded"
    );
    eprintln!(
        "recorded `{}` ({} materials)",
        args.name,
        state.attestation.materials.len()
    );
    Ok(())
}
