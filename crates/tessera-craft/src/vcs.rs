//! Git HEAD capture for the crafting state.
//!
//! The commit pinned here becomes the `git.head` subject of v1
//! attestations.

use std::path::Path;

use chrono::DateTime;
use gix::discover;

use crate::error::CraftError;
use crate::state::GitCommit;

/// Capture the HEAD commit of the repository containing `project_dir`.
///
/// Reads everything through `gix`. The date is the commit time.
///
/// # Errors
///
/// Returns [`CraftError::Git`] if the directory is not inside a git
/// repository or the HEAD commit cannot be read.
pub fn capture(project_dir: &Path) -> Result<GitCommit, CraftError> {
    let repo = discover(project_dir)
        .map_err(|e| CraftError::Git(format!("failed to discover git repo: {e}")))?;

    let head = repo
        .head_commit()
        .map_err(|e| CraftError::Git(format!("failed to read HEAD commit: {e}")))?;
    let hash = head.id.to_hex().to_string();

    let remote_url = repo.find_remote("origin").ok().and_then(|remote| {
        remote
            .url(gix::remote::Direction::Fetch)
            .map(|url| url.to_bstring().to_string())
    });

    let author = head
        .author()
        .map_err(|e| CraftError::Git(format!("failed to decode commit author: {e}")))?;
    let author_email = author.email.to_string();
    let author_name = author.name.to_string();

    let message = head
        .message_raw()
        .map_err(|e| CraftError::Git(format!("failed to decode commit message: {e}")))?
        .to_string();

    let time = head
        .time()
        .map_err(|e| CraftError::Git(format!("failed to decode commit time: {e}")))?;
    let date = DateTime::from_timestamp(time.seconds, 0)
        .ok_or_else(|| CraftError::Git(format!("commit time {} out of range", time.seconds)))?;

    tracing::debug!(commit = %hash, "captured git HEAD");
    Ok(GitCommit {
        hash,
        author_email,
        author_name,
        message: message.trim_end().to_owned(),
        date,
        remote_url,
    })
}
