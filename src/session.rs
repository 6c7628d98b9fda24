// Feed session.
// Per-session facade tying the cache, coordinators, feed paginator and remote client together.

use std::fmt;
use std::rc::Rc;

use tracing::info;

use crate::cache::{CacheEntry, CacheStore, QueryKey, QueryStatus, Subscription};
use crate::config::ClientConfig;
use crate::error::{FeedError, Result};
use crate::mutation::{MutationCoordinator, MutationKind, OptimisticPatch, optimistic};
use crate::query::{Paginator, QueryCoordinator, QueryOptions, QueryResult};
use crate::remote::{
    Comment, Identity, ImageHandle, Post, Profile, RemoteClient, SocialBackend, UserProfile,
};
use crate::validation;

const ANONYMOUS: &str = "Anonymous";

/// Everything a signed-in client needs to read and write the social feed.
pub struct FeedSession {
    client: RemoteClient,
    queries: QueryCoordinator,
    mutations: MutationCoordinator,
    feed: Paginator<Post>,
}

impl fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSession")
            .field("client", &self.client)
            .field("queries", &self.queries)
            .field("feed", &self.feed)
            .finish()
    }
}

impl FeedSession {
    /// Create a signed-out session with an empty cache.
    pub fn new(config: &ClientConfig) -> Self {
        let client = RemoteClient::new();
        let queries = QueryCoordinator::new(CacheStore::new(), config.retry);
        let mutations = MutationCoordinator::new(queries.clone());

        let page_size = config.page_size;
        let loader_client = client.clone();
        let gate_client = client.clone();
        let feed = Paginator::new(queries.clone(), QueryKey::feed(), page_size, move |index| {
            let client = loader_client.clone();
            async move { client.get_feed(page_size, index).await }
        })
        .with_options(QueryOptions::new().retry(true))
        .enabled_when(move || gate_client.is_ready());

        Self {
            client,
            queries,
            mutations,
            feed,
        }
    }

    /// Create a session already signed in to `backend`.
    pub fn connected(config: &ClientConfig, backend: Rc<dyn SocialBackend>) -> Self {
        let session = Self::new(config);
        session.sign_in(backend);
        session
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn store(&self) -> &CacheStore {
        self.queries.store()
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_ready()
    }

    pub fn sign_in(&self, backend: Rc<dyn SocialBackend>) {
        info!("session signed in");
        self.client.connect(backend);
    }

    /// Disconnect and forget everything cached for this session.
    pub fn sign_out(&self) {
        info!("session signed out");
        self.client.disconnect();
        self.feed.reset();
        self.queries.clear();
    }

    /// Listen for changes to one cache key until the subscription is dropped.
    pub fn subscribe(
        &self,
        key: QueryKey,
        listener: impl Fn(&QueryKey, &CacheEntry) + 'static,
    ) -> Subscription {
        self.store().subscribe(key, listener)
    }

    fn options(&self, retry: bool) -> QueryOptions {
        QueryOptions::new().enabled(self.is_ready()).retry(retry)
    }

    fn options_for(&self, id: &str, retry: bool) -> QueryOptions {
        let options = self.options(retry);
        options.enabled(options.enabled && !id.is_empty())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(FeedError::Unavailable)
        }
    }

    // Reads

    /// The caller's editable profile; `None` until first-time setup.
    pub async fn caller_user_profile(&self) -> QueryResult<Option<UserProfile>> {
        let client = self.client.clone();
        self.queries
            .fetch(
                QueryKey::current_user_profile(),
                move || {
                    let client = client.clone();
                    async move { client.get_caller_user_profile().await }
                },
                self.options(false),
            )
            .await
    }

    pub async fn self_profile(&self) -> QueryResult<Profile> {
        let client = self.client.clone();
        self.queries
            .fetch(
                QueryKey::self_profile(),
                move || {
                    let client = client.clone();
                    async move { client.get_self_profile().await }
                },
                self.options(false),
            )
            .await
    }

    pub async fn profile(&self, id: &str) -> QueryResult<Profile> {
        let client = self.client.clone();
        let owned = id.to_string();
        self.queries
            .fetch(
                QueryKey::profile(id),
                move || {
                    let client = client.clone();
                    let id = owned.clone();
                    async move { client.get_profile_by_id(&id).await }
                },
                self.options_for(id, true),
            )
            .await
    }

    pub async fn post(&self, id: &str) -> QueryResult<Post> {
        let client = self.client.clone();
        let owned = id.to_string();
        self.queries
            .fetch(
                QueryKey::post(id),
                move || {
                    let client = client.clone();
                    let id = owned.clone();
                    async move { client.get_post_by_id(&id).await }
                },
                self.options_for(id, true),
            )
            .await
    }

    pub async fn comments(&self, post_id: &str) -> QueryResult<Vec<Comment>> {
        let client = self.client.clone();
        let owned = post_id.to_string();
        self.queries
            .fetch(
                QueryKey::comments(post_id),
                move || {
                    let client = client.clone();
                    let post_id = owned.clone();
                    async move { client.get_comments_by_post_id(&post_id).await }
                },
                self.options_for(post_id, true),
            )
            .await
    }

    pub async fn follower_count(&self, identity: &Identity) -> QueryResult<u64> {
        let client = self.client.clone();
        let owned = identity.clone();
        self.queries
            .fetch(
                QueryKey::followers(identity.as_str()),
                move || {
                    let client = client.clone();
                    let identity = owned.clone();
                    async move { client.count_followers(&identity).await }
                },
                self.options_for(identity.as_str(), true),
            )
            .await
    }

    pub async fn following_count(&self, identity: &Identity) -> QueryResult<u64> {
        let client = self.client.clone();
        let owned = identity.clone();
        self.queries
            .fetch(
                QueryKey::following(identity.as_str()),
                move || {
                    let client = client.clone();
                    let identity = owned.clone();
                    async move { client.count_following(&identity).await }
                },
                self.options_for(identity.as_str(), true),
            )
            .await
    }

    /// Profiles matching `search`, or all of them.
    pub async fn profiles(&self, search: Option<&str>) -> QueryResult<Vec<Profile>> {
        let client = self.client.clone();
        let owned = search.map(str::to_string);
        self.queries
            .fetch(
                QueryKey::profiles(search),
                move || {
                    let client = client.clone();
                    let search = owned.clone();
                    async move { client.list_profiles(search.as_deref()).await }
                },
                self.options(true),
            )
            .await
    }

    /// The paginated main feed.
    pub fn feed(&self) -> &Paginator<Post> {
        &self.feed
    }

    /// True once the caller profile read succeeded and found nothing.
    pub fn needs_profile_setup(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.store()
            .get(&QueryKey::current_user_profile())
            .is_some_and(|entry| {
                entry.status() == QueryStatus::Success
                    && entry.data_as::<Option<UserProfile>>() == Some(None)
            })
    }

    /// Local like state for `post_id`, as toggled in this session.
    pub fn is_liked(&self, post_id: &str) -> bool {
        self.store()
            .get_data::<bool>(&QueryKey::liked(post_id))
            .unwrap_or(false)
    }

    // Mutations

    /// Like or unlike a post. The count moves immediately and is restored
    /// exactly if the remote call fails.
    pub async fn toggle_like(&self, post_id: &str) -> Result<Post> {
        self.ensure_ready()?;
        let kind = MutationKind::ToggleLike {
            post_id: post_id.to_string(),
        };
        let patch_id = post_id.to_string();
        let patch: OptimisticPatch =
            Box::new(move |store: &CacheStore| optimistic::toggle_like(store, &patch_id));

        let client = self.client.clone();
        let post_id = post_id.to_string();
        self.mutations
            .mutate(kind, Some(patch), move || async move {
                client.toggle_like(&post_id).await
            })
            .await
    }

    pub async fn create_post(&self, caption: &str, image: ImageHandle) -> Result<Post> {
        let caption = validation::caption(caption)?;
        self.ensure_ready()?;

        let client = self.client.clone();
        let post = self
            .mutations
            .mutate(MutationKind::CreatePost, None, move || async move {
                client.create_post(&caption, &image).await
            })
            .await?;
        // A new post shifts every page boundary.
        self.feed.reset();
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.ensure_ready()?;
        let kind = MutationKind::DeletePost {
            post_id: post_id.to_string(),
        };
        let client = self.client.clone();
        let post_id = post_id.to_string();
        self.mutations
            .mutate(kind, None, move || async move {
                client.delete_post(&post_id).await
            })
            .await?;
        self.feed.reset();
        Ok(())
    }

    /// Comment on a post as the caller, named after the cached self profile.
    pub async fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment> {
        let content = validation::comment(content)?;
        self.ensure_ready()?;

        let author_display_name = self
            .store()
            .get_data::<Profile>(&QueryKey::self_profile())
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let kind = MutationKind::CreateComment {
            post_id: post_id.to_string(),
        };
        let client = self.client.clone();
        let post_id = post_id.to_string();
        self.mutations
            .mutate(kind, None, move || async move {
                client
                    .create_comment(&post_id, &content, &author_display_name)
                    .await
            })
            .await
    }

    pub async fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<()> {
        self.ensure_ready()?;
        let kind = MutationKind::DeleteComment {
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
        };
        let client = self.client.clone();
        let comment_id = comment_id.to_string();
        self.mutations
            .mutate(kind, None, move || async move {
                client.delete_comment(&comment_id).await
            })
            .await
    }

    /// First-time profile setup.
    pub async fn save_caller_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: ImageHandle,
    ) -> Result<()> {
        let profile = UserProfile {
            display_name: validation::display_name(display_name)?,
            bio: validation::bio(bio)?,
            image,
        };
        self.ensure_ready()?;

        let client = self.client.clone();
        self.mutations
            .mutate(MutationKind::SaveCallerProfile, None, move || async move {
                client.save_caller_user_profile(&profile).await
            })
            .await
    }

    pub async fn update_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: ImageHandle,
    ) -> Result<Profile> {
        let display_name = validation::display_name(display_name)?;
        let bio = validation::bio(bio)?;
        self.ensure_ready()?;

        let client = self.client.clone();
        self.mutations
            .mutate(MutationKind::UpdateProfile, None, move || async move {
                client.update_profile(&display_name, &bio, &image).await
            })
            .await
    }

    pub async fn toggle_follow(&self, target: &Identity) -> Result<()> {
        self.ensure_ready()?;
        let kind = MutationKind::ToggleFollow {
            target: target.clone(),
        };
        let client = self.client.clone();
        let target = target.clone();
        self.mutations
            .mutate(kind, None, move || async move {
                client.toggle_follow(&target).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::remote::{InMemoryBackend, RemoteOp};
    use std::time::Duration;

    fn session() -> (FeedSession, Rc<InMemoryBackend>) {
        let backend = Rc::new(InMemoryBackend::new("ann"));
        let session = FeedSession::connected(&ClientConfig::default(), backend.clone());
        (session, backend)
    }

    fn placeholder() -> ImageHandle {
        ImageHandle::from_url("/assets/placeholder.png")
    }

    #[tokio::test]
    async fn test_profile_setup_flow() {
        let (session, backend) = session();
        let _caller = session.subscribe(QueryKey::current_user_profile(), |_, _| {});
        let _own = session.subscribe(QueryKey::self_profile(), |_, _| {});

        let caller = session.caller_user_profile().await;
        assert!(caller.is_success());
        assert_eq!(caller.data, Some(None));
        assert!(session.needs_profile_setup());
        assert!(session.self_profile().await.is_error());

        session
            .save_caller_profile("Ann", "", placeholder())
            .await
            .unwrap();

        // Both reads were refetched eagerly because they are subscribed.
        assert_eq!(backend.calls(RemoteOp::GetCallerUserProfile), 2);
        assert_eq!(backend.calls(RemoteOp::GetSelfProfile), 2);
        assert!(!session.needs_profile_setup());

        let caller: Option<UserProfile> = session
            .store()
            .get_data(&QueryKey::current_user_profile())
            .unwrap();
        assert_eq!(caller.unwrap().display_name, "Ann");
        let own: Profile = session.store().get_data(&QueryKey::self_profile()).unwrap();
        assert_eq!(own.display_name, "Ann");
        assert_eq!(own.author, Identity::new("ann"));
    }

    #[tokio::test]
    async fn test_feed_walks_to_terminal_page() {
        let (session, backend) = session();
        backend.seed_posts(14);
        let feed = session.feed();

        assert!(feed.has_more());
        let first = feed.load_first().await;
        assert_eq!(first.data.map(|page| page.len()), Some(10));
        assert!(feed.has_more());

        let second = feed.load_more().await.unwrap();
        assert_eq!(second.data.map(|page| page.len()), Some(4));
        assert!(!feed.has_more());
        assert!(feed.load_more().await.is_none());

        let items = feed.items();
        assert_eq!(items.len(), 14);
        assert_eq!(items[0].caption, "post #13");
        assert_eq!(items[13].caption, "post #0");
        assert_eq!(backend.calls(RemoteOp::GetFeed), 2);
    }

    #[tokio::test]
    async fn test_failed_like_restores_counts() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 5);
        session.feed().load_first().await;
        session.post(&post.id).await;

        backend.fail_next(RemoteOp::ToggleLike, 1);
        let result = session.toggle_like(&post.id).await;

        assert!(matches!(result, Err(FeedError::Remote { .. })));
        assert!(!session.is_liked(&post.id));
        let cached: Post = session.store().get_data(&QueryKey::post(&post.id)).unwrap();
        assert_eq!(cached.likes, 5);
        assert_eq!(session.feed().items()[0].likes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_is_visible_while_in_flight() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 5);
        session.post(&post.id).await;
        backend.set_latency(Duration::from_millis(50));

        let (result, during) = futures::join!(session.toggle_like(&post.id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let cached: Post = session.store().get_data(&QueryKey::post(&post.id)).unwrap();
            (cached.likes, session.is_liked(&post.id))
        });

        assert_eq!(during, (6, true));
        assert_eq!(result.unwrap().likes, 6);
        assert!(session.is_liked(&post.id));
        assert!(
            session
                .store()
                .get(&QueryKey::post(&post.id))
                .unwrap()
                .is_invalidated()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_like_during_read_leaves_settled_entry() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 5);
        session.post(&post.id).await;
        backend.set_latency(Duration::from_millis(50));
        backend.fail_next(RemoteOp::ToggleLike, 1);

        let (_, like) = futures::join!(session.post(&post.id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.toggle_like(&post.id).await
        });

        assert!(like.is_err());
        let key = QueryKey::post(&post.id);
        assert!(!session.queries.is_fetching(&key));
        let entry = session.store().get(&key).unwrap();
        assert_eq!(entry.status(), QueryStatus::Success);
        assert!(entry.is_invalidated());
        assert_eq!(entry.data_as::<Post>().unwrap().likes, 5);
        assert!(!session.is_liked(&post.id));

        backend.set_latency(Duration::ZERO);
        session.post(&post.id).await;
        assert_eq!(backend.calls(RemoteOp::GetPostById), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_call() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 0);
        backend.set_latency(Duration::from_millis(50));

        let (a, b) = futures::join!(session.post(&post.id), session.post(&post.id));

        assert_eq!(backend.calls(RemoteOp::GetPostById), 1);
        assert_eq!(a, b);
        assert_eq!(a.data, Some(post));
    }

    #[tokio::test]
    async fn test_validation_failures_touch_nothing() {
        let (session, backend) = session();

        let empty = session.create_post("   ", placeholder()).await;
        assert!(matches!(
            empty,
            Err(FeedError::Validation(ValidationError::EmptyCaption))
        ));
        let long = session.create_comment("post-1", &"x".repeat(501)).await;
        assert!(matches!(
            long,
            Err(FeedError::Validation(ValidationError::CommentTooLong { .. }))
        ));
        let unnamed = session.save_caller_profile(" ", "", placeholder()).await;
        assert!(matches!(
            unnamed,
            Err(FeedError::Validation(ValidationError::EmptyDisplayName))
        ));

        assert_eq!(backend.calls(RemoteOp::CreatePost), 0);
        assert_eq!(backend.calls(RemoteOp::CreateComment), 0);
        assert_eq!(backend.calls(RemoteOp::SaveCallerUserProfile), 0);
        assert!(session.store().keys().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 1);
        session.feed().load_first().await;
        session.post(&post.id).await;

        session.sign_out();

        assert!(!session.is_ready());
        assert!(session.store().keys().is_empty());
        assert_eq!(session.feed().loaded_pages(), 0);
        assert!(!session.needs_profile_setup());

        let read = session.post(&post.id).await;
        assert!(read.is_idle());
        assert!(session.feed().load_first().await.is_idle());
        assert_eq!(backend.calls(RemoteOp::GetPostById), 1);
        assert_eq!(backend.calls(RemoteOp::GetFeed), 1);

        let like = session.toggle_like(&post.id).await;
        assert!(matches!(like, Err(FeedError::Unavailable)));
        assert!(session.store().keys().is_empty());
    }

    #[tokio::test]
    async fn test_comment_author_from_cached_profile() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 0);

        let anonymous = session.create_comment(&post.id, "first").await.unwrap();
        assert_eq!(anonymous.author_display_name, "Anonymous");

        session
            .save_caller_profile("Ann", "hello", placeholder())
            .await
            .unwrap();
        session.self_profile().await;
        let named = session.create_comment(&post.id, "  second  ").await.unwrap();
        assert_eq!(named.author_display_name, "Ann");
        assert_eq!(named.content, "second");
    }

    #[tokio::test]
    async fn test_comment_refreshes_only_its_post() {
        let (session, backend) = session();
        let post = backend.seed_post("bob", "Bob", "sunset", 0);
        let other = backend.seed_post("bob", "Bob", "sunrise", 0);
        session.feed().load_first().await;
        session.comments(&other.id).await;
        let _watch = session.subscribe(QueryKey::comments(&post.id), |_, _| {});
        assert_eq!(session.comments(&post.id).await.data, Some(vec![]));

        session.create_comment(&post.id, "nice").await.unwrap();

        let comments: Vec<Comment> = session
            .store()
            .get_data(&QueryKey::comments(&post.id))
            .unwrap();
        assert_eq!(comments.len(), 1);
        let store = session.store();
        assert!(!store.get(&QueryKey::feed_page(0)).unwrap().is_invalidated());
        assert!(!store.get(&QueryKey::comments(&other.id)).unwrap().is_invalidated());
    }

    #[tokio::test]
    async fn test_follow_refreshes_counts() {
        let (session, _backend) = session();
        let bob = Identity::new("bob");
        let _watch = session.subscribe(QueryKey::followers("bob"), |_, _| {});
        assert_eq!(session.follower_count(&bob).await.data, Some(0));

        session.toggle_follow(&bob).await.unwrap();

        assert_eq!(
            session.store().get_data::<u64>(&QueryKey::followers("bob")),
            Some(1)
        );
        assert_eq!(
            session.following_count(&Identity::new("ann")).await.data,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_empty_id_disables_read() {
        let (session, backend) = session();
        let result = session.profile("").await;
        assert!(result.is_idle());
        assert_eq!(backend.calls(RemoteOp::GetProfileById), 0);
    }

    #[tokio::test]
    async fn test_create_post_restarts_feed() {
        let (session, backend) = session();
        backend.seed_posts(3);
        session.feed().load_first().await;
        assert!(!session.feed().has_more());

        session
            .create_post("fresh", placeholder())
            .await
            .unwrap();

        assert!(session.feed().has_more());
        let page = session.feed().load_first().await;
        assert_eq!(page.data.unwrap()[0].caption, "fresh");
    }
}
