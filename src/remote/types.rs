// Remote API domain types.
// Entities returned by the social backend and the opaque image handle.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Principal identity of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an image's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum BlobSource {
    Url(String),
    Bytes(#[serde(with = "base64_bytes")] Bytes),
}

/// Upload progress callback, called with a percentage in `0.0..=100.0`.
pub type ProgressCallback = Rc<dyn Fn(f32)>;

/// Opaque, identity-addressed image reference.
///
/// The cache only stores and forwards handles; backends read the source and
/// report upload progress through the optional callback, which is never
/// serialized.
#[derive(Clone, Serialize, Deserialize)]
pub struct ImageHandle {
    source: BlobSource,
    #[serde(skip)]
    progress: Option<ProgressCallback>,
}

impl ImageHandle {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: BlobSource::Url(url.into()),
            progress: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: BlobSource::Bytes(bytes.into()),
            progress: None,
        }
    }

    /// Attach an upload progress callback.
    pub fn with_upload_progress(mut self, on_progress: impl Fn(f32) + 'static) -> Self {
        self.progress = Some(Rc::new(on_progress));
        self
    }

    pub fn source(&self) -> &BlobSource {
        &self.source
    }

    /// URL the image can be displayed from, when it has one.
    pub fn direct_url(&self) -> Option<&str> {
        match &self.source {
            BlobSource::Url(url) => Some(url),
            BlobSource::Bytes(_) => None,
        }
    }

    pub fn report_progress(&self, percentage: f32) {
        if let Some(on_progress) = &self.progress {
            on_progress(percentage.clamp(0.0, 100.0));
        }
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BlobSource::Url(url) => url.clone(),
            BlobSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        };
        f.debug_struct("ImageHandle")
            .field("source", &source)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// A feed post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author: Identity,
    pub author_display_name: String,
    pub caption: String,
    pub likes: u64,
    pub image: ImageHandle,
    pub created_at: DateTime<Utc>,
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: Identity,
    pub author_display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Public profile record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub author: Identity,
    pub display_name: String,
    pub bio: String,
    pub image: ImageHandle,
    pub created_at: DateTime<Utc>,
}

/// The caller's own editable profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub bio: String,
    pub image: ImageHandle,
}
