// Query coordinator.
// Runs reads through the cache with freshness checks, single-flight deduplication and retries.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture, Shared, join_all};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore, KeyPattern, QueryKey, QueryStatus, StaleTime};
use crate::config::RetryPolicy;
use crate::error::{ErrorInfo, ErrorKind, FeedError, Result};

/// Per-read options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// When false the read never touches the network.
    pub enabled: bool,
    pub stale_after: StaleTime,
    /// Retry remote failures with bounded exponential backoff.
    pub retry: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after: StaleTime::default(),
            retry: false,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_after(mut self, stale_after: StaleTime) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }
}

/// Typed snapshot of a cache entry handed back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<ErrorInfo>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryResult<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
        }
    }
}

impl<T: DeserializeOwned> QueryResult<T> {
    /// Decode an entry. Data that no longer matches `T` is reported as an error.
    pub fn from_entry(entry: Option<&CacheEntry>) -> Self {
        let Some(entry) = entry else {
            return Self::default();
        };

        let mut result = Self {
            status: entry.status(),
            data: None,
            error: entry.error().cloned(),
            fetched_at: entry.fetched_at(),
        };

        if let Some(raw) = entry.data() {
            match serde_json::from_value(raw.clone()) {
                Ok(data) => result.data = Some(data),
                Err(err) => {
                    result.status = QueryStatus::Error;
                    result.error = Some(ErrorInfo::new(
                        ErrorKind::RemoteFailure,
                        format!("cached data has unexpected shape: {}", err),
                    ));
                }
            }
        }
        result
    }
}

impl<T> QueryResult<T> {
    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

type ErasedLoader = Rc<dyn Fn() -> LocalBoxFuture<'static, std::result::Result<Value, ErrorInfo>>>;
type InFlight = Shared<LocalBoxFuture<'static, CacheEntry>>;

/// Last loader and options seen for a key, used for eager refetches.
#[derive(Clone)]
struct Registration {
    loader: ErasedLoader,
    options: QueryOptions,
}

#[derive(Default)]
struct CoordinatorState {
    in_flight: HashMap<QueryKey, InFlight>,
    registrations: HashMap<QueryKey, Registration>,
    /// Keys invalidated while their fetch was running.
    invalidated_in_flight: HashSet<QueryKey>,
}

/// Executes reads against loaders and keeps the cache store current.
#[derive(Clone)]
pub struct QueryCoordinator {
    store: CacheStore,
    retry: RetryPolicy,
    state: Rc<RefCell<CoordinatorState>>,
}

impl fmt::Debug for QueryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("QueryCoordinator")
            .field("store", &self.store)
            .field("in_flight", &state.in_flight.len())
            .field("registrations", &state.registrations.len())
            .finish()
    }
}

impl QueryCoordinator {
    pub fn new(store: CacheStore, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            state: Rc::new(RefCell::new(CoordinatorState::default())),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.state.borrow().in_flight.contains_key(key)
    }

    /// Read `key`, consulting the cache first.
    ///
    /// Disabled reads return the current entry untouched. Fresh successful
    /// entries are served without calling `loader`. Concurrent reads of the
    /// same key share one loader call and observe the same resolution.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        loader: F,
        options: QueryOptions,
    ) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        if !options.enabled {
            debug!(key = %key, "query disabled");
            return QueryResult::from_entry(self.store.get(&key).as_ref());
        }

        let registration = Registration {
            loader: erase(loader),
            options,
        };
        self.state
            .borrow_mut()
            .registrations
            .insert(key.clone(), registration.clone());

        if let Some(entry) = self.store.get(&key) {
            if entry.is_fresh(options.stale_after) {
                debug!(key = %key, "cache hit");
                return QueryResult::from_entry(Some(&entry));
            }
        }

        let entry = self.execute(key, registration).await;
        QueryResult::from_entry(Some(&entry))
    }

    /// Attach to the running fetch for `key`, or start one.
    fn execute(&self, key: QueryKey, registration: Registration) -> InFlight {
        let existing = self.state.borrow().in_flight.get(&key).cloned();
        if let Some(existing) = existing {
            debug!(key = %key, "attaching to in-flight query");
            return existing;
        }

        debug!(key = %key, "starting query");
        let previous = self.store.get(&key).unwrap_or_default();
        let task = run_loader(
            self.store.clone(),
            Rc::clone(&self.state),
            key.clone(),
            registration,
            self.retry,
            self.store.generation(),
        )
        .boxed_local()
        .shared();

        // Register before notifying so listeners that read again attach.
        self.state
            .borrow_mut()
            .in_flight
            .insert(key.clone(), task.clone());
        self.store.set(key, previous.loading());
        task
    }

    /// Mark every stored key matching `patterns` as stale and eagerly
    /// refetch the ones with an active subscriber and a known loader.
    ///
    /// Refetch failures are recorded in their entries, not returned.
    pub async fn invalidate(&self, patterns: &[KeyPattern]) {
        let keys = self.store.matching_keys(patterns);
        let mut refetches = Vec::new();

        for key in keys {
            if let Some(entry) = self.store.get(&key) {
                self.store.set(key.clone(), entry.invalidated());
            }
            debug!(key = %key, "invalidated");

            let registration = {
                let mut state = self.state.borrow_mut();
                if state.in_flight.contains_key(&key) {
                    state.invalidated_in_flight.insert(key.clone());
                }
                state.registrations.get(&key).cloned()
            };

            if self.store.subscriber_count(&key) > 0 {
                if let Some(registration) = registration {
                    refetches.push(self.execute(key, registration));
                }
            }
        }

        join_all(refetches).await;
    }

    /// Drop every entry, running fetch and registered loader. Fetches
    /// still running complete without writing to the store.
    pub fn clear(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.in_flight.clear();
            state.registrations.clear();
            state.invalidated_in_flight.clear();
        }
        self.store.clear();
    }
}

fn erase<T, F, Fut>(loader: F) -> ErasedLoader
where
    T: Serialize + 'static,
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    Rc::new(move || {
        let pending = loader();
        async move {
            let data = pending.await.map_err(|err| ErrorInfo::from(&err))?;
            serde_json::to_value(data).map_err(|err| ErrorInfo::from(FeedError::Json(err)))
        }
        .boxed_local()
    })
}

async fn run_loader(
    store: CacheStore,
    state: Rc<RefCell<CoordinatorState>>,
    key: QueryKey,
    registration: Registration,
    policy: RetryPolicy,
    generation: u64,
) -> CacheEntry {
    let mut failures = 0u32;
    let outcome = loop {
        match (registration.loader)().await {
            Ok(data) => break Ok(data),
            Err(error) => {
                failures += 1;
                if registration.options.retry
                    && error.kind.is_retryable()
                    && failures < policy.max_attempts
                {
                    let delay = policy.delay_for(failures);
                    debug!(key = %key, attempt = failures, ?delay, "retrying query");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                break Err(error);
            }
        }
    };

    // From here to the store write there is no await point.
    if store.generation() != generation {
        debug!(key = %key, "discarding result from a cleared session");
        return match outcome {
            Ok(data) => CacheEntry::success(data, registration.options.stale_after),
            Err(error) => CacheEntry::idle().failed(error),
        };
    }

    let invalidated = {
        let mut state = state.borrow_mut();
        state.in_flight.remove(&key);
        state.invalidated_in_flight.remove(&key)
    };

    let previous = store.get(&key).unwrap_or_default();
    let mut entry = match outcome {
        Ok(data) => CacheEntry::success(data, registration.options.stale_after),
        Err(error) => {
            warn!(key = %key, error = %error.message, "query failed");
            previous.failed(error)
        }
    };
    if invalidated {
        entry = entry.invalidated();
    }

    store.set(key, entry.clone());
    entry
}
