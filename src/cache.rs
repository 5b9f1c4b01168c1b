use crate::fold::Materialized;
use parking_lot::RwLock;
use std::sync::Arc;

/// The last materialization of a session.
///
/// Readers get a shared `Arc` and never see a half-updated value: an update
/// is a single pointer swap. The cache only moves forward; a slower reader
/// that finishes an older fold cannot replace a newer one.
#[derive(Debug, Default)]
pub struct MaterializationCache {
    current: RwLock<Option<Arc<Materialized>>>,
}

impl MaterializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached materialization, if any fold has run yet.
    pub fn load(&self) -> Option<Arc<Materialized>> {
        self.current.read().clone()
    }

    /// Raw position of the cached materialization, 0 when empty.
    pub fn position(&self) -> u64 {
        self.current.read().as_ref().map_or(0, |m| m.position)
    }

    /// Swap in `next` unless the cache already holds a later position.
    /// Returns whether the swap happened.
    pub fn store(&self, next: Arc<Materialized>) -> bool {
        let mut current = self.current.write();
        match current.as_ref() {
            Some(existing) if existing.position > next.position => false,
            _ => {
                *current = Some(next);
                true
            }
        }
    }

    /// Remove and return the cached value.
    ///
    /// Once every other holder has dropped its copy, the caller owns the
    /// value outright and can extend it in place before storing it back.
    pub fn take(&self) -> Option<Arc<Materialized>> {
        self.current.write().take()
    }

    /// Forget the cached value. The next read folds from a snapshot.
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}
