//! Durable crafting state with optimistic concurrency.
//!
//! A run's state crosses many process invocations (one per crafting
//! step), so it is persisted through a [`StateStore`]: a compare-and-swap
//! register keyed by run id. Writers pass the digest of the blob they
//! read; the store recomputes the digest of what it currently holds
//! under a per-run lock and rejects the write on mismatch. Callers
//! re-read, reapply and retry; the store never merges.

mod file;
mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::canonical::sha256_hex;
use crate::error::{CraftError, StoreError};
use crate::state::CraftingState;

/// A stored blob together with its digest.
///
/// The digest is always derived from the blob, never stored beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    blob: Vec<u8>,
    digest: String,
}

impl StoredState {
    /// Wrap a blob, computing its digest.
    #[must_use]
    pub fn new(blob: Vec<u8>) -> Self {
        let digest = sha256_hex(&blob);
        Self { blob, digest }
    }

    /// The raw blob.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// SHA-256 hex digest of the blob.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Consume into the blob.
    #[must_use]
    pub fn into_blob(self) -> Vec<u8> {
        self.blob
    }
}

/// A compare-and-swap register of crafting state blobs, keyed by run id.
pub trait StateStore: Send + Sync {
    /// Whether a blob is stored for `run_id`.
    fn initialized(&self, run_id: &str) -> Result<bool, StoreError>;

    /// Read the stored blob and its digest.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if nothing is stored.
    fn read(&self, run_id: &str) -> Result<StoredState, StoreError>;

    /// Store `blob`, returning its digest.
    ///
    /// With `base_digest == None` the write is unconditional. Otherwise the
    /// digest of the currently stored blob is recomputed under the run's
    /// lock and compared to `base_digest` before writing.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if the stored digest differs.
    /// - [`StoreError::NotFound`] if a base digest is given but nothing is stored.
    fn save(
        &self,
        run_id: &str,
        blob: &[u8],
        base_digest: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Remove the stored blob.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if nothing is stored.
    fn reset(&self, run_id: &str) -> Result<(), StoreError>;
}

/// Check the stored digest against the caller's base digest.
pub(crate) fn compare_digest(
    run_id: &str,
    current: Option<&[u8]>,
    base_digest: Option<&str>,
) -> Result<(), StoreError> {
    let Some(supplied) = base_digest else {
        return Ok(());
    };
    let Some(current) = current else {
        return Err(StoreError::NotFound {
            run_id: run_id.to_owned(),
        });
    };

    let stored = sha256_hex(current);
    if stored == supplied {
        Ok(())
    } else {
        warn!(run_id, stored = %stored, supplied, "crafting state digest mismatch");
        Err(StoreError::Conflict {
            stored_digest: stored,
            supplied_digest: supplied.to_owned(),
        })
    }
}

/// Registry of per-run locks.
///
/// Different runs never contend; the registry mutex is held only long
/// enough to look up or insert a row.
#[derive(Debug, Default)]
pub(crate) struct RowLocks<T> {
    rows: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> RowLocks<T> {
    pub(crate) fn row(&self, run_id: &str) -> Result<Arc<Mutex<T>>, StoreError> {
        let mut rows = self.rows.lock().map_err(|_| poisoned(run_id))?;
        Ok(Arc::clone(rows.entry(run_id.to_owned()).or_default()))
    }

    pub(crate) fn existing(&self, run_id: &str) -> Result<Option<Arc<Mutex<T>>>, StoreError> {
        let rows = self.rows.lock().map_err(|_| poisoned(run_id))?;
        Ok(rows.get(run_id).map(Arc::clone))
    }

    /// Drop the registry entry for `run_id`. Holders of the row keep it.
    pub(crate) fn forget(&self, run_id: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().map_err(|_| poisoned(run_id))?;
        rows.remove(run_id);
        Ok(())
    }
}

pub(crate) fn lock_row<'a, T>(
    row: &'a Mutex<T>,
    run_id: &str,
) -> Result<MutexGuard<'a, T>, StoreError> {
    row.lock().map_err(|_| poisoned(run_id))
}

fn poisoned(run_id: &str) -> StoreError {
    StoreError::Lock {
        run_id: run_id.to_owned(),
        reason: "lock poisoned by a panicked writer".to_owned(),
    }
}

/// Typed access to crafting states on top of a [`StateStore`].
#[derive(Debug)]
pub struct StateManager<S> {
    store: S,
}

impl<S: StateStore> StateManager<S> {
    /// Wrap a store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Persist a freshly created state.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyInitialized`] if the run already has state and
    /// `force` is false.
    pub fn init(&self, state: &CraftingState, force: bool) -> Result<String, StoreError> {
        let run_id = state.run_id();
        if !force && self.store.initialized(run_id)? {
            return Err(StoreError::AlreadyInitialized {
                run_id: run_id.to_owned(),
            });
        }

        let digest = self.store.save(run_id, &state.to_blob()?, None)?;
        info!(run_id, digest = %digest, "crafting state initialized");
        Ok(digest)
    }

    /// Load a run's state and the digest to use as the next base.
    pub fn load(&self, run_id: &str) -> Result<(CraftingState, String), StoreError> {
        let stored = self.store.read(run_id)?;
        let state = CraftingState::from_blob(stored.blob()).map_err(|source| {
            StoreError::Corrupt {
                run_id: run_id.to_owned(),
                source,
            }
        })?;
        debug!(run_id, digest = stored.digest(), "crafting state loaded");
        Ok((state, stored.digest().to_owned()))
    }

    /// Write `state` if the stored digest still equals `base_digest`.
    pub fn commit(
        &self,
        state: &CraftingState,
        base_digest: Option<&str>,
    ) -> Result<String, StoreError> {
        let run_id = state.run_id();
        let digest = self.store.save(run_id, &state.to_blob()?, base_digest)?;
        debug!(run_id, digest = %digest, "crafting state committed");
        Ok(digest)
    }

    /// Read-modify-write with retry on conflict.
    ///
    /// `delta` is reapplied to a freshly loaded state after every
    /// [`StoreError::Conflict`], at most `max_attempts` times in total.
    /// Errors returned by `delta` abort immediately.
    pub fn update<F>(
        &self,
        run_id: &str,
        max_attempts: u32,
        mut delta: F,
    ) -> Result<(CraftingState, String), StoreError>
    where
        F: FnMut(&mut CraftingState) -> Result<(), CraftError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (mut state, base) = self.load(run_id)?;
            delta(&mut state)?;

            match self.commit(&state, Some(&base)) {
                Ok(digest) => return Ok((state, digest)),
                Err(StoreError::Conflict { .. }) if attempt < max_attempts => {
                    debug!(run_id, attempt, "retrying crafting state update after conflict");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard a run's state.
    pub fn reset(&self, run_id: &str) -> Result<(), StoreError> {
        self.store.reset(run_id)?;
        info!(run_id, "crafting state reset");
        Ok(())
    }
}
