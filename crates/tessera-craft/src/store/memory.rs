//! In-process state store.

use crate::canonical::sha256_hex;
use crate::error::StoreError;

use super::{RowLocks, StateStore, StoredState, compare_digest, lock_row};

/// A [`StateStore`] held in memory, with one lock per run.
///
/// Useful for tests and for embedding the crafting pipeline in a
/// long-running service that owns its own durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RowLocks<Option<Vec<u8>>>,
}

impl StateStore for MemoryStore {
    fn initialized(&self, run_id: &str) -> Result<bool, StoreError> {
        match self.rows.existing(run_id)? {
            Some(row) => {
                let stored = lock_row(&row, run_id)?.is_some();
                Ok(stored)
            }
            None => Ok(false),
        }
    }

    fn read(&self, run_id: &str) -> Result<StoredState, StoreError> {
        let not_found = || StoreError::NotFound {
            run_id: run_id.to_owned(),
        };
        let row = self.rows.existing(run_id)?.ok_or_else(not_found)?;
        let blob = lock_row(&row, run_id)?.clone().ok_or_else(not_found)?;
        Ok(StoredState::new(blob))
    }

    fn save(
        &self,
        run_id: &str,
        blob: &[u8],
        base_digest: Option<&str>,
    ) -> Result<String, StoreError> {
        let row = self.rows.row(run_id)?;
        let mut slot = lock_row(&row, run_id)?;
        compare_digest(run_id, slot.as_deref(), base_digest)?;
        *slot = Some(blob.to_vec());
        Ok(sha256_hex(blob))
    }

    fn reset(&self, run_id: &str) -> Result<(), StoreError> {
        let not_found = || StoreError::NotFound {
            run_id: run_id.to_owned(),
        };
        let row = self.rows.existing(run_id)?.ok_or_else(not_found)?;
        let previous = lock_row(&row, run_id)?.take();
        previous.map(|_| ()).ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn uninitialized_run() {
        let store = MemoryStore::default();
        assert!(!store.initialized("r").unwrap());
        assert!(matches!(store.read("r"), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.reset("r"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn cas_sequence() {
        let store = MemoryStore::default();
        let d0 = store.save("r", b"v0", None).unwrap();
        assert!(store.initialized("r").unwrap());

        let d1 = store.save("r", b"v1", Some(&d0)).unwrap();
        assert_eq!(d1, sha256_hex(b"v1"));

        let err = store.save("r", b"v2", Some(&d0)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { ref stored_digest, ref supplied_digest }
                if *stored_digest == d1 && *supplied_digest == d0
        ));
        assert_eq!(store.read("r").unwrap().blob(), b"v1");
    }

    #[test]
    fn base_digest_on_missing_run_is_not_found() {
        let store = MemoryStore::default();
        assert!(matches!(
            store.save("r", b"v", Some("abc")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn reset_is_distinct_from_never_initialized() {
        let store = MemoryStore::default();
        store.save("r", b"v", None).unwrap();
        store.reset("r").unwrap();
        assert!(!store.initialized("r").unwrap());
        store.save("r", b"again", None).unwrap();
        assert_eq!(store.read("r").unwrap().blob(), b"again");
    }

    #[test]
    fn concurrent_writers_from_same_base_one_wins() {
        let store = Arc::new(MemoryStore::default());
        let base = store.save("r", b"base", None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let base = base.clone();
                thread::spawn(move || {
                    store
                        .save("r", format!("writer-{i}").as_bytes(), Some(&base))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
