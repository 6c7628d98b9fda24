// feedsync library root.
// Client-side query and mutation synchronization for a social feed backed by a remote API.

pub mod cache;
pub mod config;
pub mod error;
pub mod mutation;
pub mod query;
pub mod remote;
pub mod session;
pub mod validation;

pub use cache::{CacheEntry, CacheStore, KeyPattern, QueryKey, QueryStatus, StaleTime};
pub use config::{ClientConfig, RetryPolicy};
pub use error::{ErrorInfo, ErrorKind, FeedError, Result, ValidationError};
pub use mutation::{MutationCoordinator, MutationKind};
pub use query::{Paginator, QueryCoordinator, QueryOptions, QueryResult};
pub use remote::{HttpBackend, InMemoryBackend, RemoteClient, SocialBackend};
pub use session::FeedSession;
