// Feed paginator.
// Loads an unbounded feed one index-addressed page at a time on top of the query coordinator.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::cache::QueryKey;
use crate::error::Result;

use super::coordinator::{QueryCoordinator, QueryOptions, QueryResult};

type PageLoader<T> = Rc<dyn Fn(u64) -> LocalBoxFuture<'static, Result<Vec<T>>>>;
type Gate = Rc<dyn Fn() -> bool>;

#[derive(Debug, Default, Clone, Copy)]
struct PageState {
    /// Highest page index loaded successfully.
    loaded: Option<u64>,
    /// Lowest page index that came back short. Never cleared except by `reset`.
    terminal: Option<u64>,
}

impl PageState {
    /// Last page that belongs to the feed: the terminal page once one is
    /// known, otherwise the highest loaded one.
    fn last_page(&self) -> Option<u64> {
        match (self.loaded, self.terminal) {
            (Some(loaded), Some(terminal)) => Some(loaded.min(terminal)),
            (loaded, terminal) => loaded.or(terminal),
        }
    }

    fn next_page(&self) -> u64 {
        self.loaded.map_or(0, |last| last + 1)
    }
}

/// Incrementally loaded sequence of pages, one cache key per page index.
pub struct Paginator<T> {
    queries: QueryCoordinator,
    root: QueryKey,
    page_size: u64,
    options: QueryOptions,
    loader: PageLoader<T>,
    gate: Option<Gate>,
    state: RefCell<PageState>,
}

impl<T> fmt::Debug for Paginator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("root", &self.root)
            .field("page_size", &self.page_size)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<T> Paginator<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Create a paginator whose page `n` is cached under `root/n`.
    pub fn new<F, Fut>(queries: QueryCoordinator, root: QueryKey, page_size: u64, loader: F) -> Self
    where
        F: Fn(u64) -> Fut + 'static,
        Fut: Future<Output = Result<Vec<T>>> + 'static,
    {
        Self {
            queries,
            root,
            page_size,
            options: QueryOptions::default(),
            loader: Rc::new(move |index| loader(index).boxed_local()),
            gate: None,
            state: RefCell::new(PageState::default()),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Only touch the network while `gate` returns true.
    pub fn enabled_when(mut self, gate: impl Fn() -> bool + 'static) -> Self {
        self.gate = Some(Rc::new(gate));
        self
    }

    pub fn page_key(&self, index: u64) -> QueryKey {
        self.root.clone().with(index)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn options(&self) -> QueryOptions {
        let open = self.gate.as_ref().is_none_or(|gate| gate());
        self.options.enabled(self.options.enabled && open)
    }

    /// Load (or serve from cache) the first page.
    pub async fn load_first(&self) -> QueryResult<Vec<T>> {
        self.load_page(0).await
    }

    /// Load the page after the last loaded one.
    ///
    /// Returns `None` without any network activity once a short page has
    /// been seen. Concurrent calls for the same next page share one fetch.
    pub async fn load_more(&self) -> Option<QueryResult<Vec<T>>> {
        let state = *self.state.borrow();
        if state.terminal.is_some() {
            debug!(root = %self.root, "no more pages");
            return None;
        }
        Some(self.load_page(state.next_page()).await)
    }

    /// Load one page by index and record whether it ends the sequence.
    pub async fn load_page(&self, index: u64) -> QueryResult<Vec<T>> {
        let loader = Rc::clone(&self.loader);
        let result = self
            .queries
            .fetch(self.page_key(index), move || loader(index), self.options())
            .await;

        if result.is_success() {
            if let Some(items) = &result.data {
                self.record_page(index, items.len());
            }
        }
        result
    }

    fn record_page(&self, index: u64, len: usize) {
        let mut state = self.state.borrow_mut();
        state.loaded = Some(state.loaded.map_or(index, |last| last.max(index)));
        if (len as u64) < self.page_size && state.terminal.is_none_or(|end| index < end) {
            debug!(root = %self.root, page = index, len, "terminal page");
            state.terminal = Some(index);
        }
    }

    /// False once a page shorter than the page size has loaded.
    pub fn has_more(&self) -> bool {
        self.state.borrow().terminal.is_none()
    }

    /// Number of pages in the feed so far, up to and including the terminal page.
    pub fn loaded_pages(&self) -> u64 {
        self.state.borrow().last_page().map_or(0, |last| last + 1)
    }

    /// Whether the next page is being fetched right now.
    pub fn is_fetching_next(&self) -> bool {
        let next = self.state.borrow().next_page();
        self.queries.is_fetching(&self.page_key(next))
    }

    /// Concatenate loaded pages in index order, whatever order they resolved in.
    pub fn items(&self) -> Vec<T> {
        let store = self.queries.store();
        (0..self.loaded_pages())
            .filter_map(|index| store.get_data::<Vec<T>>(&self.page_key(index)))
            .flatten()
            .collect()
    }

    /// Refetch every loaded page in order. Stale or invalidated pages hit
    /// the loader; fresh ones are served from cache.
    pub async fn refresh(&self) {
        for index in 0..self.loaded_pages() {
            let loader = Rc::clone(&self.loader);
            self.queries
                .fetch(self.page_key(index), move || loader(index), self.options())
                .await;
        }
    }

    /// Forget loaded pages and start over as a new feed.
    pub fn reset(&self) {
        let pages = self.state.borrow().next_page();
        *self.state.borrow_mut() = PageState::default();
        for index in 0..pages {
            self.queries.store().remove(&self.page_key(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, KeyPattern};
    use crate::config::RetryPolicy;
    use std::cell::Cell;
    use std::time::Duration;

    fn paginator(
        sizes: Vec<usize>,
        calls: &Rc<Cell<usize>>,
        delays: Vec<u64>,
    ) -> Paginator<String> {
        let queries = QueryCoordinator::new(CacheStore::new(), RetryPolicy::default());
        let calls = Rc::clone(calls);
        Paginator::new(queries, QueryKey::feed(), 10, move |index| {
            let calls = Rc::clone(&calls);
            let size = sizes.get(index as usize).copied().unwrap_or(0);
            let delay = delays.get(index as usize).copied().unwrap_or(0);
            async move {
                calls.set(calls.get() + 1);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Ok((0..size).map(|i| format!("{}-{}", index, i)).collect())
            }
        })
    }

    #[tokio::test]
    async fn test_feed_of_fourteen_posts() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10, 4], &calls, vec![]);

        let first = feed.load_first().await;
        assert_eq!(first.data.as_ref().map(Vec::len), Some(10));
        assert!(feed.has_more());

        let second = feed.load_more().await.unwrap();
        assert_eq!(second.data.as_ref().map(Vec::len), Some(4));
        assert!(!feed.has_more());

        let items = feed.items();
        assert_eq!(items.len(), 14);
        assert_eq!(items[0], "0-0");
        assert_eq!(items[10], "1-0");
        assert_eq!(feed.page_key(1), QueryKey::feed_page(1));
    }

    #[tokio::test]
    async fn test_terminal_page_stops_network() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10, 10, 3], &calls, vec![]);

        feed.load_first().await;
        feed.load_more().await;
        feed.load_more().await;
        assert_eq!(calls.get(), 3);
        assert!(!feed.has_more());

        assert!(feed.load_more().await.is_none());
        assert!(feed.load_more().await.is_none());
        assert_eq!(calls.get(), 3);
        assert_eq!(feed.loaded_pages(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_load_more_shares_fetch() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10, 10], &calls, vec![0, 40]);

        feed.load_first().await;
        let (a, b) = futures::join!(feed.load_more(), feed.load_more());

        assert_eq!(calls.get(), 2);
        assert_eq!(a, b);
        assert_eq!(feed.loaded_pages(), 2);
        assert!(!feed.is_fetching_next());
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_keep_index_order_when_pages_resolve_out_of_order() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10, 10], &calls, vec![80, 5]);

        futures::join!(feed.load_page(1), feed.load_page(0));

        let items = feed.items();
        assert_eq!(items.len(), 20);
        assert_eq!(items[0], "0-0");
        assert_eq!(items[19], "1-9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_page_resolving_last_still_ends_feed() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![3, 10], &calls, vec![80, 5]);

        futures::join!(feed.load_page(0), feed.load_page(1));

        assert!(!feed.has_more());
        assert_eq!(feed.loaded_pages(), 1);
        let items = feed.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], "0-2");
        assert!(feed.load_more().await.is_none());
        assert_eq!(calls.get(), 2);

        feed.reset();
        assert!(!feed.queries.store().contains(&QueryKey::feed_page(1)));
    }

    #[tokio::test]
    async fn test_failed_page_can_be_retried() {
        let queries = QueryCoordinator::new(CacheStore::new(), RetryPolicy::default());
        let attempts = Rc::new(Cell::new(0));
        let counter = Rc::clone(&attempts);
        let feed = Paginator::new(queries, QueryKey::feed(), 10, move |_| {
            counter.set(counter.get() + 1);
            let attempt = counter.get();
            async move {
                if attempt == 1 {
                    Err(crate::error::FeedError::Other("offline".into()))
                } else {
                    Ok(vec![1u32, 2, 3])
                }
            }
        });

        assert!(feed.load_more().await.unwrap().is_error());
        assert_eq!(feed.loaded_pages(), 0);
        assert!(feed.has_more());

        assert!(feed.load_more().await.unwrap().is_success());
        assert_eq!(feed.items(), vec![1, 2, 3]);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn test_closed_gate_skips_loading() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10], &calls, vec![]).enabled_when(|| false);

        let result = feed.load_first().await;
        assert!(result.is_idle());
        assert_eq!(calls.get(), 0);
        assert!(feed.items().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_refetches_invalidated_pages() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![10, 2], &calls, vec![])
            .with_options(QueryOptions::new().stale_after(crate::cache::StaleTime::Never));

        feed.load_first().await;
        feed.load_more().await;
        feed.refresh().await;
        assert_eq!(calls.get(), 2);

        feed.queries
            .invalidate(&[KeyPattern::Exact(QueryKey::feed_page(1))])
            .await;
        feed.refresh().await;
        assert_eq!(calls.get(), 3);
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn test_reset_starts_new_feed() {
        let calls = Rc::new(Cell::new(0));
        let feed = paginator(vec![3], &calls, vec![]);

        feed.load_first().await;
        assert!(!feed.has_more());

        feed.reset();
        assert!(feed.has_more());
        assert_eq!(feed.loaded_pages(), 0);
        assert!(!feed.queries.store().contains(&QueryKey::feed_page(0)));
    }
}
