// Cache store for query results.
// Holds one entry per query key and notifies subscribers when an entry changes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ErrorInfo;

use super::key::{KeyPattern, QueryKey};

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// How long a successful result stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTime {
    /// Fresh while younger than the duration. Zero means always stale.
    After(Duration),
    /// Never goes stale once populated.
    Never,
}

impl Default for StaleTime {
    fn default() -> Self {
        StaleTime::After(Duration::ZERO)
    }
}

impl StaleTime {
    /// Check if data fetched at `fetched_at` has gone stale by `now`.
    pub fn is_expired(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            StaleTime::Never => false,
            StaleTime::After(ttl) => {
                let elapsed = now
                    .signed_duration_since(fetched_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed >= *ttl
            }
        }
    }
}

/// One cached read result.
///
/// Entries are only built through the constructors below, which keep the
/// invariants: `Success` always carries data and no error, `Error` always
/// carries an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    status: QueryStatus,
    data: Option<Value>,
    error: Option<ErrorInfo>,
    fetched_at: Option<DateTime<Utc>>,
    stale_after: StaleTime,
    invalidated: bool,
}

impl CacheEntry {
    pub fn idle() -> Self {
        Self::default()
    }

    /// A confirmed result from the remote.
    pub fn success(data: Value, stale_after: StaleTime) -> Self {
        Self {
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
            fetched_at: Some(Utc::now()),
            stale_after,
            invalidated: false,
        }
    }

    /// Same entry while a fetch is running. Previous data stays readable.
    pub fn loading(&self) -> Self {
        Self {
            status: QueryStatus::Loading,
            ..self.clone()
        }
    }

    /// Record a failed fetch. Previous data stays readable.
    pub fn failed(&self, error: ErrorInfo) -> Self {
        Self {
            status: QueryStatus::Error,
            error: Some(error),
            ..self.clone()
        }
    }

    /// Locally predicted value applied ahead of remote confirmation.
    pub fn optimistic(&self, data: Value) -> Self {
        Self {
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
            fetched_at: self.fetched_at.or_else(|| Some(Utc::now())),
            stale_after: self.stale_after,
            invalidated: self.invalidated,
        }
    }

    /// Mark as no longer authoritative; the next access refetches.
    pub fn invalidated(&self) -> Self {
        Self {
            invalidated: true,
            ..self.clone()
        }
    }

    /// The entry as it stands once no fetch is running: `Loading` falls back
    /// to the data or error it carried, marked invalidated so the next
    /// access refetches. Other states are returned unchanged.
    pub fn settled(&self) -> Self {
        if self.status != QueryStatus::Loading {
            return self.clone();
        }
        let status = if self.data.is_some() {
            QueryStatus::Success
        } else if self.error.is_some() {
            QueryStatus::Error
        } else {
            QueryStatus::Idle
        };
        Self {
            status,
            error: if status == QueryStatus::Success {
                None
            } else {
                self.error.clone()
            },
            invalidated: true,
            ..self.clone()
        }
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Decode the stored data into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn stale_after(&self) -> StaleTime {
        self.stale_after
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Check if this entry can be served without calling the loader.
    pub fn is_fresh(&self, stale_after: StaleTime) -> bool {
        if self.status != QueryStatus::Success || self.invalidated {
            return false;
        }
        match self.fetched_at {
            Some(fetched_at) => !stale_after.is_expired(fetched_at, Utc::now()),
            None => false,
        }
    }
}

type Listener = Rc<dyn Fn(&QueryKey, &CacheEntry)>;

#[derive(Default)]
struct StoreInner {
    entries: HashMap<QueryKey, CacheEntry>,
    listeners: HashMap<QueryKey, Vec<(u64, Listener)>>,
    next_listener_id: u64,
    generation: u64,
}

/// Keyed mapping from query key to cache entry, with per-key listeners.
///
/// The store is single-threaded: clones share state through `Rc`, and no
/// borrow is held while listeners run, so listeners may read or write the
/// store themselves.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("CacheStore")
            .field("entries", &inner.entries.len())
            .field("generation", &inner.generation)
            .finish()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.borrow().entries.get(key).cloned()
    }

    /// Decode the data stored under `key`.
    pub fn get_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        self.inner
            .borrow()
            .entries
            .get(key)
            .and_then(|entry| entry.data_as())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    /// Store an entry, then notify every listener of that exact key.
    pub fn set(&self, key: QueryKey, entry: CacheEntry) {
        self.inner.borrow_mut().entries.insert(key.clone(), entry);
        self.notify(&key);
    }

    /// Drop an entry; listeners observe an idle entry.
    pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry> {
        let removed = self.inner.borrow_mut().entries.remove(key);
        if removed.is_some() {
            self.notify(key);
        }
        removed
    }

    /// All keys currently stored, in key order.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.inner.borrow().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Expand patterns into the exact stored keys they match.
    pub fn matching_keys(&self, patterns: &[KeyPattern]) -> Vec<QueryKey> {
        self.keys()
            .into_iter()
            .filter(|key| patterns.iter().any(|pattern| pattern.matches(key)))
            .collect()
    }

    /// Register a listener for one exact key. Dropping the returned
    /// subscription unregisters it.
    pub fn subscribe(
        &self,
        key: QueryKey,
        listener: impl Fn(&QueryKey, &CacheEntry) + 'static,
    ) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner
            .listeners
            .entry(key.clone())
            .or_default()
            .push((id, Rc::new(listener)));

        Subscription {
            store: Rc::downgrade(&self.inner),
            key,
            id,
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every listener of `key` with its current entry.
    pub fn notify(&self, key: &QueryKey) {
        let (entry, listeners) = {
            let inner = self.inner.borrow();
            let listeners: Vec<Listener> = inner
                .listeners
                .get(key)
                .map(|list| list.iter().map(|(_, l)| Rc::clone(l)).collect())
                .unwrap_or_default();
            let entry = inner.entries.get(key).cloned().unwrap_or_default();
            (entry, listeners)
        };

        for listener in listeners {
            listener(key, &entry);
        }
    }

    /// Drop every entry and start a new generation. Listeners stay
    /// registered and observe idle entries.
    pub fn clear(&self) {
        let keys = {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            let keys: Vec<QueryKey> = inner.entries.drain().map(|(key, _)| key).collect();
            keys
        };
        for key in keys {
            self.notify(&key);
        }
    }

    /// Incremented by `clear`; fetches started in an older generation
    /// must not write their results.
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }
}

/// Handle for a registered listener.
pub struct Subscription {
    store: Weak<RefCell<StoreInner>>,
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        if let Some(list) = inner.listeners.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                inner.listeners.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_set_notifies_exact_key_synchronously() {
        let store = CacheStore::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let _sub = store.subscribe(QueryKey::post("1"), move |key, entry| {
            sink.borrow_mut().push((key.clone(), entry.data().cloned()));
        });

        store.set(
            QueryKey::post("1"),
            CacheEntry::success(json!({"likes": 5}), StaleTime::default()),
        );
        store.set(
            QueryKey::post("2"),
            CacheEntry::success(json!({"likes": 1}), StaleTime::default()),
        );

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, QueryKey::post("1"));
        assert_eq!(seen[0].1, Some(json!({"likes": 5})));
    }

    #[test]
    fn test_listener_sees_stored_state() {
        let store = CacheStore::new();
        let reader = store.clone();
        let observed = Rc::new(Cell::new(false));

        let flag = Rc::clone(&observed);
        let _sub = store.subscribe(QueryKey::feed_page(0), move |key, _| {
            flag.set(reader.get(key).is_some());
        });

        store.set(QueryKey::feed_page(0), CacheEntry::idle().loading());
        assert!(observed.get());
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let store = CacheStore::new();
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        let sub = store.subscribe(QueryKey::self_profile(), move |_, _| {
            counter.set(counter.get() + 1);
        });
        assert_eq!(store.subscriber_count(&QueryKey::self_profile()), 1);

        store.set(QueryKey::self_profile(), CacheEntry::idle());
        drop(sub);
        store.set(QueryKey::self_profile(), CacheEntry::idle());

        assert_eq!(calls.get(), 1);
        assert_eq!(store.subscriber_count(&QueryKey::self_profile()), 0);
    }

    #[test]
    fn test_success_invariants() {
        let entry = CacheEntry::idle()
            .failed(ErrorInfo::new(crate::error::ErrorKind::RemoteFailure, "boom"));
        assert_eq!(entry.status(), QueryStatus::Error);
        assert!(entry.error().is_some());

        let entry = entry.optimistic(json!(1));
        assert_eq!(entry.status(), QueryStatus::Success);
        assert!(entry.data().is_some());
        assert!(entry.error().is_none());
    }

    #[test]
    fn test_loading_keeps_previous_data() {
        let entry = CacheEntry::success(json!([1, 2]), StaleTime::default()).loading();
        assert_eq!(entry.status(), QueryStatus::Loading);
        assert_eq!(entry.data(), Some(&json!([1, 2])));
    }

    #[test]
    fn test_settled_loading_falls_back_to_carried_state() {
        let with_data = CacheEntry::success(json!([1, 2]), StaleTime::default())
            .loading()
            .settled();
        assert_eq!(with_data.status(), QueryStatus::Success);
        assert_eq!(with_data.data(), Some(&json!([1, 2])));
        assert!(with_data.is_invalidated());

        let empty = CacheEntry::idle().loading().settled();
        assert_eq!(empty.status(), QueryStatus::Idle);

        let done = CacheEntry::success(json!(1), StaleTime::default());
        assert_eq!(done.settled(), done);
    }

    #[test]
    fn test_never_stale_is_always_fresh() {
        let mut entry = CacheEntry::success(json!("x"), StaleTime::Never);
        entry.fetched_at = Some(Utc::now() - chrono::Duration::days(30));
        assert!(entry.is_fresh(StaleTime::Never));
    }

    #[test]
    fn test_zero_stale_time_is_never_fresh() {
        let entry = CacheEntry::success(json!("x"), StaleTime::default());
        assert!(!entry.is_fresh(StaleTime::After(Duration::ZERO)));
    }

    #[test]
    fn test_stale_after_ttl() {
        let mut entry = CacheEntry::success(json!("x"), StaleTime::default());
        entry.fetched_at = Some(Utc::now() - chrono::Duration::seconds(600));

        assert!(!entry.is_fresh(StaleTime::After(Duration::from_secs(300))));
        assert!(entry.is_fresh(StaleTime::After(Duration::from_secs(3600))));
    }

    #[test]
    fn test_invalidated_entry_is_not_fresh() {
        let entry = CacheEntry::success(json!("x"), StaleTime::Never).invalidated();
        assert!(!entry.is_fresh(StaleTime::Never));
        assert_eq!(entry.data(), Some(&json!("x")));
    }

    #[test]
    fn test_clear_bumps_generation_and_notifies() {
        let store = CacheStore::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let _sub = store.subscribe(QueryKey::feed_page(0), move |_, entry| {
            if entry.status() == QueryStatus::Idle {
                counter.set(counter.get() + 1);
            }
        });

        store.set(
            QueryKey::feed_page(0),
            CacheEntry::success(json!([]), StaleTime::default()),
        );
        let before = store.generation();
        store.clear();

        assert_eq!(store.generation(), before + 1);
        assert!(store.keys().is_empty());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_matching_keys_expands_patterns() {
        let store = CacheStore::new();
        for key in [
            QueryKey::feed_page(0),
            QueryKey::feed_page(1),
            QueryKey::post("a"),
            QueryKey::comments("a"),
        ] {
            store.set(key, CacheEntry::idle());
        }

        let keys = store.matching_keys(&[
            KeyPattern::Prefix(QueryKey::feed()),
            KeyPattern::Exact(QueryKey::post("a")),
        ]);
        assert_eq!(
            keys,
            vec![
                QueryKey::feed_page(0),
                QueryKey::feed_page(1),
                QueryKey::post("a")
            ]
        );
    }
}
