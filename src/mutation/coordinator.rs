// Mutation coordinator.
// Applies optimistic patches, calls the remote and then invalidates or rolls back.

use std::fmt;
use std::future::Future;

use tracing::{debug, info, warn};

use super::invalidation::{MutationKind, invalidations};
use super::optimistic::Patch;
use crate::cache::{CacheEntry, CacheStore, QueryKey};
use crate::error::Result;
use crate::query::QueryCoordinator;

/// Optimistic update computed against the store right before the remote call.
pub type OptimisticPatch = Box<dyn FnOnce(&CacheStore) -> Patch>;

/// Bookkeeping for one mutation in flight.
#[derive(Debug)]
pub struct MutationRecord {
    pub kind: MutationKind,
    /// Entries as they were before the patch touched them; `None` if absent.
    pub previous: Vec<(QueryKey, Option<CacheEntry>)>,
    pub optimistic_applied: bool,
    generation: u64,
}

impl MutationRecord {
    fn new(kind: MutationKind, generation: u64) -> Self {
        Self {
            kind,
            previous: Vec::new(),
            optimistic_applied: false,
            generation,
        }
    }

    fn apply(&mut self, store: &CacheStore, patch: Patch) {
        for (key, data) in patch {
            let current = store.get(&key);
            if !self.previous.iter().any(|(touched, _)| touched == &key) {
                self.previous.push((key.clone(), current.clone()));
            }
            store.set(key, current.unwrap_or_default().optimistic(data));
        }
        self.optimistic_applied = true;
    }

    /// Put every touched key back to its snapshot. Skipped when the cache
    /// was cleared since the mutation began. A snapshot taken mid-read is
    /// restored settled if that read has since finished.
    fn rollback(self, queries: &QueryCoordinator) {
        if !self.optimistic_applied {
            return;
        }
        let store = queries.store();
        if store.generation() != self.generation {
            debug!(mutation = self.kind.name(), "cache cleared, skipping rollback");
            return;
        }
        for (key, previous) in self.previous.into_iter().rev() {
            match previous {
                Some(entry) if queries.is_fetching(&key) => store.set(key, entry),
                Some(entry) => store.set(key, entry.settled()),
                None => {
                    store.remove(&key);
                }
            }
        }
    }
}

/// Runs writes against the remote and reconciles the cache afterwards.
#[derive(Clone)]
pub struct MutationCoordinator {
    queries: QueryCoordinator,
}

impl fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator").finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    pub fn new(queries: QueryCoordinator) -> Self {
        Self { queries }
    }

    pub fn queries(&self) -> &QueryCoordinator {
        &self.queries
    }

    /// Perform `kind`.
    ///
    /// The patch, when given, is applied before `remote` is polled. On
    /// success every key the mutation affects is invalidated and any
    /// subscribed ones are refetched before this returns. On failure the
    /// touched keys are restored exactly and the error is returned.
    /// Mutations are never retried.
    pub async fn mutate<T, F, Fut>(
        &self,
        kind: MutationKind,
        patch: Option<OptimisticPatch>,
        remote: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.queries.store();
        let mut record = MutationRecord::new(kind, store.generation());

        if let Some(patch) = patch {
            let writes = patch(store);
            record.apply(store, writes);
        }
        debug!(
            mutation = record.kind.name(),
            touched = record.previous.len(),
            "mutation started"
        );

        match remote().await {
            Ok(value) => {
                info!(mutation = record.kind.name(), "mutation succeeded");
                self.queries.invalidate(&invalidations(&record.kind)).await;
                Ok(value)
            }
            Err(err) => {
                warn!(mutation = record.kind.name(), error = %err, "mutation failed, rolling back");
                record.rollback(&self.queries);
                Err(err)
            }
        }
    }
}
