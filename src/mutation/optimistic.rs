// Optimistic patches.
// Compute the cache writes a mutation applies before the remote call resolves.

use serde_json::Value;

use crate::cache::{CacheStore, KeyPattern, QueryKey};
use crate::remote::Post;

/// Writes applied ahead of remote confirmation.
pub type Patch = Vec<(QueryKey, Value)>;

/// Flip the local like flag for `post_id` and move its like count by one
/// wherever the post is cached: its own entry and any feed page holding it.
pub fn toggle_like(store: &CacheStore, post_id: &str) -> Patch {
    let liked_key = QueryKey::liked(post_id);
    let liked = store.get_data::<bool>(&liked_key).unwrap_or(false);
    let adjust = |likes: u64| {
        if liked {
            likes.saturating_sub(1)
        } else {
            likes + 1
        }
    };

    let mut patch = vec![(liked_key, Value::Bool(!liked))];

    let post_key = QueryKey::post(post_id);
    if let Some(mut post) = store.get_data::<Post>(&post_key) {
        post.likes = adjust(post.likes);
        if let Ok(value) = serde_json::to_value(&post) {
            patch.push((post_key, value));
        }
    }

    for page_key in store.matching_keys(&[KeyPattern::Prefix(QueryKey::feed())]) {
        let Some(mut page) = store.get_data::<Vec<Post>>(&page_key) else {
            continue;
        };
        let Some(post) = page.iter_mut().find(|post| post.id == post_id) else {
            continue;
        };
        post.likes = adjust(post.likes);
        if let Ok(value) = serde_json::to_value(&page) {
            patch.push((page_key, value));
        }
    }

    patch
}
