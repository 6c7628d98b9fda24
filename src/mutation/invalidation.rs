// Invalidation map.
// Static table from mutation kind to the cache keys its success makes stale.

use std::fmt;

use crate::cache::{KeyPattern, QueryKey};
use crate::remote::Identity;

/// A write operation together with the arguments that scope its effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ToggleLike { post_id: String },
    CreatePost,
    DeletePost { post_id: String },
    CreateComment { post_id: String },
    DeleteComment { post_id: String, comment_id: String },
    /// First-time profile setup.
    SaveCallerProfile,
    UpdateProfile,
    ToggleFollow { target: Identity },
}

impl MutationKind {
    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::ToggleLike { .. } => "toggleLike",
            MutationKind::CreatePost => "createPost",
            MutationKind::DeletePost { .. } => "deletePost",
            MutationKind::CreateComment { .. } => "createComment",
            MutationKind::DeleteComment { .. } => "deleteComment",
            MutationKind::SaveCallerProfile => "saveCallerProfile",
            MutationKind::UpdateProfile => "updateProfile",
            MutationKind::ToggleFollow { .. } => "toggleFollow",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key patterns to invalidate once `kind` has succeeded remotely.
pub fn invalidations(kind: &MutationKind) -> Vec<KeyPattern> {
    use KeyPattern::{Exact, Prefix};

    match kind {
        MutationKind::ToggleLike { post_id } => {
            vec![Prefix(QueryKey::feed()), Exact(QueryKey::post(post_id))]
        }
        MutationKind::CreatePost => {
            vec![Prefix(QueryKey::feed()), Exact(QueryKey::self_profile())]
        }
        MutationKind::DeletePost { post_id } => vec![
            Prefix(QueryKey::feed()),
            Exact(QueryKey::post(post_id)),
            Exact(QueryKey::comments(post_id)),
            Exact(QueryKey::self_profile()),
        ],
        MutationKind::CreateComment { post_id } | MutationKind::DeleteComment { post_id, .. } => {
            vec![
                Exact(QueryKey::comments(post_id)),
                Exact(QueryKey::post(post_id)),
            ]
        }
        MutationKind::SaveCallerProfile => vec![
            Exact(QueryKey::current_user_profile()),
            Exact(QueryKey::self_profile()),
        ],
        MutationKind::UpdateProfile => vec![
            Exact(QueryKey::self_profile()),
            Exact(QueryKey::current_user_profile()),
            Prefix(QueryKey::feed()),
            Prefix(QueryKey::profiles(None)),
        ],
        MutationKind::ToggleFollow { .. } => vec![
            Prefix(QueryKey::new("followers")),
            Prefix(QueryKey::new("following")),
            Prefix(QueryKey::feed()),
        ],
    }
}
