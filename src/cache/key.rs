// Query key definitions.
// Structural identifiers for cacheable reads and the patterns that invalidate them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One segment of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Index(u64),
    Text(String),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Text(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Text(value)
    }
}

impl From<u64> for KeyPart {
    fn from(value: u64) -> Self {
        KeyPart::Index(value)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Index(index) => write!(f, "{}", index),
            KeyPart::Text(text) => f.write_str(text),
        }
    }
}

/// Ordered, structurally comparable identifier for one cacheable read.
///
/// Keys are built once and never mutated afterwards; the builder methods
/// consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    /// Start a key with its tag segment.
    pub fn new(tag: &str) -> Self {
        Self(vec![KeyPart::from(tag)])
    }

    /// Append a segment.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// The leading tag segment, if it is text.
    pub fn tag(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeyPart::Text(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Check whether `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Unambiguous string form; two keys are equal iff these match.
    pub fn normalized(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn current_user_profile() -> Self {
        Self::new("currentUserProfile")
    }

    pub fn self_profile() -> Self {
        Self::new("selfProfile")
    }

    pub fn profile(id: &str) -> Self {
        Self::new("profile").with(id)
    }

    /// Root of every feed page key.
    pub fn feed() -> Self {
        Self::new("feed")
    }

    pub fn feed_page(index: u64) -> Self {
        Self::feed().with(index)
    }

    pub fn post(id: &str) -> Self {
        Self::new("post").with(id)
    }

    pub fn comments(post_id: &str) -> Self {
        Self::new("comments").with(post_id)
    }

    pub fn followers(user: &str) -> Self {
        Self::new("followers").with(user)
    }

    pub fn following(user: &str) -> Self {
        Self::new("following").with(user)
    }

    pub fn profiles(search: Option<&str>) -> Self {
        match search {
            Some(term) => Self::new("profiles").with(term),
            None => Self::new("profiles"),
        }
    }

    /// Locally tracked like flag for a post (never fetched).
    pub fn liked(post_id: &str) -> Self {
        Self::new("liked").with(post_id)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// Selects cache keys for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Exactly this key.
    Exact(QueryKey),
    /// Every key whose leading segments equal this key.
    Prefix(QueryKey),
}

impl KeyPattern {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(QueryKey::post("abc"), QueryKey::new("post").with("abc"));
        assert_ne!(QueryKey::post("abc"), QueryKey::comments("abc"));
        assert_eq!(QueryKey::feed_page(2).to_string(), "feed/2");
    }

    #[test]
    fn test_normalized_form_avoids_concatenation_collisions() {
        let nested = QueryKey::new("post").with("a/b");
        let split = QueryKey::new("post").with("a").with("b");
        assert_eq!(nested.to_string(), split.to_string());
        assert_ne!(nested.normalized(), split.normalized());
        assert_ne!(nested, split);

        let text = QueryKey::feed().with("1");
        let index = QueryKey::feed_page(1);
        assert_ne!(text.normalized(), index.normalized());
        assert_ne!(text, index);
    }

    #[test]
    fn test_prefix_matching() {
        let feed = KeyPattern::Prefix(QueryKey::feed());
        assert!(feed.matches(&QueryKey::feed()));
        assert!(feed.matches(&QueryKey::feed_page(3)));
        assert!(!feed.matches(&QueryKey::post("1")));

        let followers = KeyPattern::Prefix(QueryKey::new("followers"));
        assert!(followers.matches(&QueryKey::followers("alice")));
        assert!(!followers.matches(&QueryKey::following("alice")));
    }

    #[test]
    fn test_exact_matching() {
        let pattern = KeyPattern::Exact(QueryKey::comments("p1"));
        assert!(pattern.matches(&QueryKey::comments("p1")));
        assert!(!pattern.matches(&QueryKey::comments("p2")));
    }

    #[test]
    fn test_profiles_key_with_and_without_search() {
        assert_eq!(QueryKey::profiles(None).parts().len(), 1);
        assert_eq!(QueryKey::profiles(Some("ann")).to_string(), "profiles/ann");
        assert_eq!(QueryKey::profiles(Some("ann")).tag(), Some("profiles"));
    }
}
