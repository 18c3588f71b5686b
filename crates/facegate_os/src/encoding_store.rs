#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use facegate_engines::face_match::FaceRegistrySnapshot;
use facegate_kernel_contracts::ContractViolation;

use crate::registry::{RegistrySource, RegistryUnavailable};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingStoreError {
    #[error("no registry snapshot has been loaded")]
    NeverLoaded,
    #[error(transparent)]
    Source(#[from] RegistryUnavailable),
    #[error("registry rows failed validation: {0}")]
    InvalidRegistry(#[from] ContractViolation),
}

/// Copy-on-refresh holder of the current registry snapshot.
///
/// Matches clone the `Arc` and keep using it while a refresh swaps in a new
/// generation, so no reader ever sees a partially loaded registry.
pub struct EncodingStore {
    source: Arc<dyn RegistrySource>,
    current: RwLock<Option<Arc<FaceRegistrySnapshot>>>,
    dirty: AtomicBool,
    next_generation: AtomicU64,
}

impl EncodingStore {
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            dirty: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Reloads from the source. Unchanged content keeps the current generation.
    pub fn refresh(&self) -> Result<Arc<FaceRegistrySnapshot>, EncodingStoreError> {
        self.dirty.store(false, Ordering::SeqCst);
        let faces = match self.source.enrolled_faces() {
            Ok(faces) => faces,
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        // The generation is assigned under the write lock below.
        let candidate = match FaceRegistrySnapshot::build(0, faces) {
            Ok(s) => s,
            Err(v) => {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(v.into());
            }
        };

        let mut current = self.current.write();
        if let Some(existing) = current.as_ref() {
            if existing.same_content(&candidate) {
                return Ok(existing.clone());
            }
        }
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(candidate.with_generation(generation));
        tracing::info!(
            generation = snapshot.generation(),
            entries = snapshot.len(),
            digest = %snapshot.content_digest_hex(),
            "registry snapshot loaded"
        );
        *current = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Marks the snapshot stale; the next `snapshot()` call reloads it.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Snapshot for one match. A stale store reloads first; if that reload
    /// fails the previous snapshot is still served.
    pub fn snapshot(&self) -> Result<Arc<FaceRegistrySnapshot>, EncodingStoreError> {
        if self.is_dirty() {
            match self.refresh() {
                Ok(s) => return Ok(s),
                Err(e) => {
                    tracing::warn!(error = %e, "registry reload failed; serving previous snapshot");
                }
            }
        }
        self.current
            .read()
            .clone()
            .ok_or(EncodingStoreError::NeverLoaded)
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.current.read().as_ref().map(|s| s.generation())
    }
}
