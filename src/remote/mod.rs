// Remote API module.
// Domain types, the backend trait and its adapters (HTTP gateway and in-memory).

pub mod client;
pub mod http;
pub mod memory;
pub mod types;

pub use client::{RemoteClient, RemoteOp, SocialBackend};
pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use types::{BlobSource, Comment, Identity, ImageHandle, Post, Profile, UserProfile};
