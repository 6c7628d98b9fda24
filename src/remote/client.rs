// Remote client adapter.
// Wraps the social backend, gates calls on session readiness, and surfaces failures uniformly.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FeedError, Result};

use super::types::{Comment, Identity, ImageHandle, Post, Profile, UserProfile};

/// Operations exposed by the remote social API.
#[async_trait(?Send)]
pub trait SocialBackend {
    async fn get_feed(&self, page_size: u64, page_index: u64) -> Result<Vec<Post>>;
    async fn get_post_by_id(&self, id: &str) -> Result<Post>;
    async fn toggle_like(&self, post_id: &str) -> Result<Post>;
    async fn create_post(&self, caption: &str, image: &ImageHandle) -> Result<Post>;
    async fn delete_post(&self, post_id: &str) -> Result<()>;

    async fn get_comments_by_post_id(&self, post_id: &str) -> Result<Vec<Comment>>;
    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        author_display_name: &str,
    ) -> Result<Comment>;
    async fn delete_comment(&self, comment_id: &str) -> Result<()>;

    async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>>;
    async fn save_caller_user_profile(&self, profile: &UserProfile) -> Result<()>;
    async fn get_self_profile(&self) -> Result<Profile>;
    async fn get_profile_by_id(&self, id: &str) -> Result<Profile>;
    async fn update_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: &ImageHandle,
    ) -> Result<Profile>;
    async fn list_profiles(&self, search: Option<&str>) -> Result<Vec<Profile>>;

    async fn toggle_follow(&self, target: &Identity) -> Result<()>;
    async fn count_followers(&self, identity: &Identity) -> Result<u64>;
    async fn count_following(&self, identity: &Identity) -> Result<u64>;
}

/// Name of a remote operation, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    GetFeed,
    GetPostById,
    ToggleLike,
    CreatePost,
    DeletePost,
    GetCommentsByPostId,
    CreateComment,
    DeleteComment,
    GetCallerUserProfile,
    SaveCallerUserProfile,
    GetSelfProfile,
    GetProfileById,
    UpdateProfile,
    ListProfiles,
    ToggleFollow,
    CountFollowers,
    CountFollowing,
}

impl RemoteOp {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOp::GetFeed => "getFeed",
            RemoteOp::GetPostById => "getPostById",
            RemoteOp::ToggleLike => "toggleLike",
            RemoteOp::CreatePost => "createPost",
            RemoteOp::DeletePost => "deletePost",
            RemoteOp::GetCommentsByPostId => "getCommentsByPostId",
            RemoteOp::CreateComment => "createComment",
            RemoteOp::DeleteComment => "deleteComment",
            RemoteOp::GetCallerUserProfile => "getCallerUserProfile",
            RemoteOp::SaveCallerUserProfile => "saveCallerUserProfile",
            RemoteOp::GetSelfProfile => "getSelfProfile",
            RemoteOp::GetProfileById => "getProfileById",
            RemoteOp::UpdateProfile => "updateProfile",
            RemoteOp::ListProfiles => "listProfiles",
            RemoteOp::ToggleFollow => "toggleFollow",
            RemoteOp::CountFollowers => "countFollowers",
            RemoteOp::CountFollowing => "countFollowing",
        }
    }
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session-scoped handle to the backend.
///
/// Clones share the same connection slot, so loaders captured before a
/// sign-out see the client as unavailable afterwards.
#[derive(Clone, Default)]
pub struct RemoteClient {
    backend: Rc<RefCell<Option<Rc<dyn SocialBackend>>>>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl RemoteClient {
    /// Create a client with no backend attached.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(backend: Rc<dyn SocialBackend>) -> Self {
        let client = Self::new();
        client.connect(backend);
        client
    }

    pub fn connect(&self, backend: Rc<dyn SocialBackend>) {
        *self.backend.borrow_mut() = Some(backend);
    }

    pub fn disconnect(&self) {
        self.backend.borrow_mut().take();
    }

    /// Whether calls can be issued. Reads are skipped while not ready.
    pub fn is_ready(&self) -> bool {
        self.backend.borrow().is_some()
    }

    fn backend(&self, op: RemoteOp) -> Result<Rc<dyn SocialBackend>> {
        debug!(op = op.name(), "remote call");
        self.backend.borrow().clone().ok_or(FeedError::Unavailable)
    }

    pub async fn get_feed(&self, page_size: u64, page_index: u64) -> Result<Vec<Post>> {
        let op = RemoteOp::GetFeed;
        let backend = self.backend(op)?;
        surface(op, backend.get_feed(page_size, page_index).await)
    }

    pub async fn get_post_by_id(&self, id: &str) -> Result<Post> {
        let op = RemoteOp::GetPostById;
        let backend = self.backend(op)?;
        surface(op, backend.get_post_by_id(id).await)
    }

    pub async fn toggle_like(&self, post_id: &str) -> Result<Post> {
        let op = RemoteOp::ToggleLike;
        let backend = self.backend(op)?;
        surface(op, backend.toggle_like(post_id).await)
    }

    pub async fn create_post(&self, caption: &str, image: &ImageHandle) -> Result<Post> {
        let op = RemoteOp::CreatePost;
        let backend = self.backend(op)?;
        surface(op, backend.create_post(caption, image).await)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let op = RemoteOp::DeletePost;
        let backend = self.backend(op)?;
        surface(op, backend.delete_post(post_id).await)
    }

    pub async fn get_comments_by_post_id(&self, post_id: &str) -> Result<Vec<Comment>> {
        let op = RemoteOp::GetCommentsByPostId;
        let backend = self.backend(op)?;
        surface(op, backend.get_comments_by_post_id(post_id).await)
    }

    pub async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        author_display_name: &str,
    ) -> Result<Comment> {
        let op = RemoteOp::CreateComment;
        let backend = self.backend(op)?;
        surface(
            op,
            backend
                .create_comment(post_id, content, author_display_name)
                .await,
        )
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let op = RemoteOp::DeleteComment;
        let backend = self.backend(op)?;
        surface(op, backend.delete_comment(comment_id).await)
    }

    pub async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>> {
        let op = RemoteOp::GetCallerUserProfile;
        let backend = self.backend(op)?;
        surface(op, backend.get_caller_user_profile().await)
    }

    pub async fn save_caller_user_profile(&self, profile: &UserProfile) -> Result<()> {
        let op = RemoteOp::SaveCallerUserProfile;
        let backend = self.backend(op)?;
        surface(op, backend.save_caller_user_profile(profile).await)
    }

    pub async fn get_self_profile(&self) -> Result<Profile> {
        let op = RemoteOp::GetSelfProfile;
        let backend = self.backend(op)?;
        surface(op, backend.get_self_profile().await)
    }

    pub async fn get_profile_by_id(&self, id: &str) -> Result<Profile> {
        let op = RemoteOp::GetProfileById;
        let backend = self.backend(op)?;
        surface(op, backend.get_profile_by_id(id).await)
    }

    pub async fn update_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: &ImageHandle,
    ) -> Result<Profile> {
        let op = RemoteOp::UpdateProfile;
        let backend = self.backend(op)?;
        surface(op, backend.update_profile(display_name, bio, image).await)
    }

    pub async fn list_profiles(&self, search: Option<&str>) -> Result<Vec<Profile>> {
        let op = RemoteOp::ListProfiles;
        let backend = self.backend(op)?;
        surface(op, backend.list_profiles(search).await)
    }

    pub async fn toggle_follow(&self, target: &Identity) -> Result<()> {
        let op = RemoteOp::ToggleFollow;
        let backend = self.backend(op)?;
        surface(op, backend.toggle_follow(target).await)
    }

    pub async fn count_followers(&self, identity: &Identity) -> Result<u64> {
        let op = RemoteOp::CountFollowers;
        let backend = self.backend(op)?;
        surface(op, backend.count_followers(identity).await)
    }

    pub async fn count_following(&self, identity: &Identity) -> Result<u64> {
        let op = RemoteOp::CountFollowing;
        let backend = self.backend(op)?;
        surface(op, backend.count_following(identity).await)
    }
}

/// Fold every backend failure into `Remote`, keeping `Unavailable` as is.
fn surface<T>(op: RemoteOp, result: Result<T>) -> Result<T> {
    result.map_err(|err| {
        warn!(op = op.name(), error = %err, "remote call failed");
        match err {
            FeedError::Unavailable | FeedError::Remote { .. } => err,
            other => FeedError::Remote {
                op: op.name(),
                message: other.to_string(),
            },
        }
    })
}
