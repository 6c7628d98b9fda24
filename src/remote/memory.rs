// In-memory social backend.
// Deterministic implementation of the remote API with call counters and failure injection.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FeedError, Result};

use super::client::{RemoteOp, SocialBackend};
use super::types::{Comment, Identity, ImageHandle, Post, Profile, UserProfile};

#[derive(Debug, Default)]
struct MemoryState {
    /// Newest first.
    posts: Vec<Post>,
    likes: HashMap<String, HashSet<Identity>>,
    comments: Vec<Comment>,
    user_profiles: HashMap<Identity, UserProfile>,
    profiles: HashMap<Identity, Profile>,
    /// (follower, followed)
    follows: HashSet<(Identity, Identity)>,
    id_counter: u64,
    calls: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, usize>,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{}-{}", prefix, self.id_counter)
    }
}

/// Backend holding all state in memory, acting as one caller.
#[derive(Debug)]
pub struct InMemoryBackend {
    caller: Identity,
    latency: Cell<Duration>,
    state: RefCell<MemoryState>,
}

impl InMemoryBackend {
    pub fn new(caller: impl Into<Identity>) -> Self {
        Self {
            caller: caller.into(),
            latency: Cell::new(Duration::ZERO),
            state: RefCell::new(MemoryState::default()),
        }
    }

    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: RemoteOp, times: usize) {
        *self.state.borrow_mut().failures.entry(op).or_default() += times;
    }

    /// Number of calls received for `op`, including failed ones.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.borrow().calls.get(&op).copied().unwrap_or(0)
    }

    /// Insert a post directly, bypassing validation and counters.
    pub fn seed_post(
        &self,
        author: &str,
        author_display_name: &str,
        caption: &str,
        likes: u64,
    ) -> Post {
        let mut state = self.state.borrow_mut();
        let id = state.next_id("post");
        let post = Post {
            image: ImageHandle::from_url(format!("/assets/posts/{}.png", id)),
            id,
            author: Identity::new(author),
            author_display_name: author_display_name.to_string(),
            caption: caption.to_string(),
            likes,
            created_at: Utc::now(),
        };
        state.posts.insert(0, post.clone());
        post
    }

    /// Insert `count` posts by a single author.
    pub fn seed_posts(&self, count: usize) -> Vec<Post> {
        (0..count)
            .map(|i| self.seed_post("seed", "Seed", &format!("post #{}", i), 0))
            .collect()
    }

    fn begin(&self, op: RemoteOp) -> Result<()> {
        let mut state = self.state.borrow_mut();
        *state.calls.entry(op).or_default() += 1;

        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FeedError::Remote {
                    op: op.name(),
                    message: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }

    async fn enter(&self, op: RemoteOp) -> Result<()> {
        let latency = self.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.begin(op)
    }

    fn upsert_profile(&self, display_name: &str, bio: &str, image: &ImageHandle) -> Profile {
        let mut state = self.state.borrow_mut();
        let existing = state.profiles.get(&self.caller).cloned();
        let profile = match existing {
            Some(existing) => Profile {
                display_name: display_name.to_string(),
                bio: bio.to_string(),
                image: image.clone(),
                ..existing
            },
            None => Profile {
                id: state.next_id("profile"),
                author: self.caller.clone(),
                display_name: display_name.to_string(),
                bio: bio.to_string(),
                image: image.clone(),
                created_at: Utc::now(),
            },
        };
        state.profiles.insert(self.caller.clone(), profile.clone());
        state.user_profiles.insert(
            self.caller.clone(),
            UserProfile {
                display_name: display_name.to_string(),
                bio: bio.to_string(),
                image: image.clone(),
            },
        );
        profile
    }
}

#[async_trait(?Send)]
impl SocialBackend for InMemoryBackend {
    async fn get_feed(&self, page_size: u64, page_index: u64) -> Result<Vec<Post>> {
        self.enter(RemoteOp::GetFeed).await?;
        let state = self.state.borrow();
        let skip = usize::try_from(page_size.saturating_mul(page_index)).unwrap_or(usize::MAX);
        Ok(state
            .posts
            .iter()
            .skip(skip)
            .take(usize::try_from(page_size).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn get_post_by_id(&self, id: &str) -> Result<Post> {
        self.enter(RemoteOp::GetPostById).await?;
        let state = self.state.borrow();
        state
            .posts
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("post {}", id)))
    }

    async fn toggle_like(&self, post_id: &str) -> Result<Post> {
        self.enter(RemoteOp::ToggleLike).await?;
        let mut state = self.state.borrow_mut();
        if !state.posts.iter().any(|post| post.id == post_id) {
            return Err(FeedError::NotFound(format!("post {}", post_id)));
        }
        let liked = {
            let likers = state.likes.entry(post_id.to_string()).or_default();
            if likers.remove(&self.caller) {
                false
            } else {
                likers.insert(self.caller.clone());
                true
            }
        };
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))?;
        post.likes = if liked {
            post.likes + 1
        } else {
            post.likes.saturating_sub(1)
        };
        Ok(post.clone())
    }

    async fn create_post(&self, caption: &str, image: &ImageHandle) -> Result<Post> {
        self.enter(RemoteOp::CreatePost).await?;
        image.report_progress(0.0);
        let mut state = self.state.borrow_mut();
        let author_display_name = state
            .profiles
            .get(&self.caller)
            .map(|profile| profile.display_name.clone())
            .unwrap_or_else(|| "Anonymous".to_string());
        let post = Post {
            id: state.next_id("post"),
            author: self.caller.clone(),
            author_display_name,
            caption: caption.to_string(),
            likes: 0,
            image: image.clone(),
            created_at: Utc::now(),
        };
        state.posts.insert(0, post.clone());
        image.report_progress(100.0);
        Ok(post)
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.enter(RemoteOp::DeletePost).await?;
        let mut state = self.state.borrow_mut();
        let position = state
            .posts
            .iter()
            .position(|post| post.id == post_id)
            .ok_or_else(|| FeedError::NotFound(format!("post {}", post_id)))?;
        if state.posts[position].author != self.caller {
            return Err(FeedError::Other("only the author can delete a post".into()));
        }
        state.posts.remove(position);
        state.comments.retain(|comment| comment.post_id != post_id);
        state.likes.remove(post_id);
        Ok(())
    }

    async fn get_comments_by_post_id(&self, post_id: &str) -> Result<Vec<Comment>> {
        self.enter(RemoteOp::GetCommentsByPostId).await?;
        let state = self.state.borrow();
        Ok(state
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        author_display_name: &str,
    ) -> Result<Comment> {
        self.enter(RemoteOp::CreateComment).await?;
        let mut state = self.state.borrow_mut();
        if !state.posts.iter().any(|post| post.id == post_id) {
            return Err(FeedError::NotFound(format!("post {}", post_id)));
        }
        let comment = Comment {
            id: state.next_id("comment"),
            post_id: post_id.to_string(),
            author: self.caller.clone(),
            author_display_name: author_display_name.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state.comments.push(comment.clone());
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        self.enter(RemoteOp::DeleteComment).await?;
        let mut state = self.state.borrow_mut();
        let position = state
            .comments
            .iter()
            .position(|comment| comment.id == comment_id)
            .ok_or_else(|| FeedError::NotFound(format!("comment {}", comment_id)))?;
        if state.comments[position].author != self.caller {
            return Err(FeedError::Other(
                "only the author can delete a comment".into(),
            ));
        }
        state.comments.remove(position);
        Ok(())
    }

    async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>> {
        self.enter(RemoteOp::GetCallerUserProfile).await?;
        Ok(self.state.borrow().user_profiles.get(&self.caller).cloned())
    }

    async fn save_caller_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.enter(RemoteOp::SaveCallerUserProfile).await?;
        self.upsert_profile(&profile.display_name, &profile.bio, &profile.image);
        Ok(())
    }

    async fn get_self_profile(&self) -> Result<Profile> {
        self.enter(RemoteOp::GetSelfProfile).await?;
        self.state
            .borrow()
            .profiles
            .get(&self.caller)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("profile for {}", self.caller)))
    }

    async fn get_profile_by_id(&self, id: &str) -> Result<Profile> {
        self.enter(RemoteOp::GetProfileById).await?;
        self.state
            .borrow()
            .profiles
            .values()
            .find(|profile| profile.id == id)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("profile {}", id)))
    }

    async fn update_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: &ImageHandle,
    ) -> Result<Profile> {
        self.enter(RemoteOp::UpdateProfile).await?;
        image.report_progress(0.0);
        let profile = self.upsert_profile(display_name, bio, image);
        image.report_progress(100.0);
        Ok(profile)
    }

    async fn list_profiles(&self, search: Option<&str>) -> Result<Vec<Profile>> {
        self.enter(RemoteOp::ListProfiles).await?;
        let needle = search.map(str::to_lowercase);
        let mut profiles: Vec<Profile> = self
            .state
            .borrow()
            .profiles
            .values()
            .filter(|profile| match &needle {
                Some(needle) => profile.display_name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(profiles)
    }

    async fn toggle_follow(&self, target: &Identity) -> Result<()> {
        self.enter(RemoteOp::ToggleFollow).await?;
        if *target == self.caller {
            return Err(FeedError::Other("cannot follow yourself".into()));
        }
        let mut state = self.state.borrow_mut();
        let edge = (self.caller.clone(), target.clone());
        if !state.follows.remove(&edge) {
            state.follows.insert(edge);
        }
        Ok(())
    }

    async fn count_followers(&self, identity: &Identity) -> Result<u64> {
        self.enter(RemoteOp::CountFollowers).await?;
        let state = self.state.borrow();
        Ok(state
            .follows
            .iter()
            .filter(|(_, followed)| followed == identity)
            .count() as u64)
    }

    async fn count_following(&self, identity: &Identity) -> Result<u64> {
        self.enter(RemoteOp::CountFollowing).await?;
        let state = self.state.borrow();
        Ok(state
            .follows
            .iter()
            .filter(|(follower, _)| follower == identity)
            .count() as u64)
    }
}
