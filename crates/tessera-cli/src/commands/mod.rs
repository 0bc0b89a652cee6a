//! CLI subcommands.

use std::collections::BTreeMap;

use color_eyre::eyre::{Result, eyre};
use tessera_craft::store::{FileStore, StateManager};

use crate::config::Config;

#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod add;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod init;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod inspect;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod public_key;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod push;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod reset;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod status;
#[expect(
    unreachable_pub,
    reason = "subcommand items are only reachable from main"
)]
pub mod verify;

/// Attempts `add` makes before giving up on concurrent writers.
const UPDATE_ATTEMPTS: u32 = 5;

/// Open the file-backed state store named by the configuration.
fn state_manager(config: &Config) -> Result<StateManager<FileStore>> {
    let dir = config.state_dir();
    tracing::debug!(dir = %dir.display(), "opening state store");
    Ok(StateManager::new(FileStore::open(dir)?))
}

/// Parse repeated `key=value` arguments.
fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .ok_or_else(|| eyre!("expected KEY=VALUE, got `{pair}`"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        let parsed = parse_pairs(&["a=b=c".to_owned(), "x=".to_owned()]).unwrap();
        assert_eq!(parsed["a"], "b=c");
        assert_eq!(parsed["x"], "");
    }

    #[test]
    fn pairs_need_a_key() {
        assert!(parse_pairs(&["=v".to_owned()]).is_err());
        assert!(parse_pairs(&["novalue".to_owned()]).is_err());
    }
}
