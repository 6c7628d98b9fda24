// Read side of the sync layer.
// Cached reads with single-flight fetching and page-indexed feeds.

pub mod coordinator;
pub mod paginator;

pub use coordinator::{QueryCoordinator, QueryOptions, QueryResult};
pub use paginator::Paginator;
