// Write side of the sync layer.
// Optimistic patches, remote writes and cache invalidation.

pub mod coordinator;
pub mod invalidation;
pub mod optimistic;

pub use coordinator::{MutationCoordinator, MutationRecord, OptimisticPatch};
pub use invalidation::{MutationKind, invalidations};
pub use optimistic::Patch;
