// HTTP gateway backend.
// Talks JSON over HTTP to the social API gateway with bearer authentication.

use async_trait::async_trait;
use reqwest::{
    Client, Method, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use serde::Serialize;

use crate::config::{ClientConfig, TOKEN_VAR};
use crate::error::{FeedError, Result};

use super::client::SocialBackend;
use super::types::{Comment, Identity, ImageHandle, Post, Profile, UserProfile};

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    caption: &'a str,
    image: &'a ImageHandle,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentRequest<'a> {
    content: &'a str,
    author_display_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    display_name: &'a str,
    bio: &'a str,
    image: &'a ImageHandle,
}

/// Social API client over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend for the gateway at `base_url` using `token`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| FeedError::Other(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("feedsync"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(FeedError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a backend from configuration, if an API URL is configured.
    pub fn from_config(config: &ClientConfig) -> Result<Option<Self>> {
        let Some(url) = &config.api_url else {
            return Ok(None);
        };
        let token = config
            .token
            .as_deref()
            .ok_or(FeedError::MissingEnv(TOKEN_VAR))?;
        Self::new(url, token).map(Some)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get(&self, endpoint: &str) -> Result<Response> {
        let response = self
            .client
            .get(self.url(endpoint))
            .send()
            .await
            .map_err(FeedError::Http)?;
        check_response(response).await
    }

    async fn get_with_params<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        params: &T,
    ) -> Result<Response> {
        let response = self
            .client
            .get(self.url(endpoint))
            .query(params)
            .send()
            .await
            .map_err(FeedError::Http)?;
        check_response(response).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let mut request = self.client.request(method, self.url(endpoint));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(FeedError::Http)?;
        check_response(response).await
    }

    /// Send a request whose body carries an image, reporting upload progress.
    async fn send_with_image<B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
        image: &ImageHandle,
    ) -> Result<Response> {
        image.report_progress(0.0);
        let response = self.send(method, endpoint, Some(body)).await?;
        image.report_progress(100.0);
        Ok(response)
    }
}

/// Check response status and convert errors.
async fn check_response(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
            Ok(response)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FeedError::Unauthorized),
        StatusCode::NOT_FOUND => {
            let url = response.url().to_string();
            Err(FeedError::NotFound(url))
        }
        status => Err(FeedError::Other(format!(
            "HTTP {}: {}",
            status,
            response.text().await.unwrap_or_default()
        ))),
    }
}

#[async_trait(?Send)]
impl SocialBackend for HttpBackend {
    async fn get_feed(&self, page_size: u64, page_index: u64) -> Result<Vec<Post>> {
        let params = [
            ("postsPerPage", page_size.to_string()),
            ("page", page_index.to_string()),
        ];
        let response = self.get_with_params("/feed", &params).await?;
        Ok(response.json().await?)
    }

    async fn get_post_by_id(&self, id: &str) -> Result<Post> {
        let response = self.get(&format!("/posts/{}", id)).await?;
        Ok(response.json().await?)
    }

    async fn toggle_like(&self, post_id: &str) -> Result<Post> {
        let response = self
            .send::<()>(Method::POST, &format!("/posts/{}/like", post_id), None)
            .await?;
        Ok(response.json().await?)
    }

    async fn create_post(&self, caption: &str, image: &ImageHandle) -> Result<Post> {
        let body = CreatePostRequest { caption, image };
        let response = self
            .send_with_image(Method::POST, "/posts", &body, image)
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &format!("/posts/{}", post_id), None)
            .await?;
        Ok(())
    }

    async fn get_comments_by_post_id(&self, post_id: &str) -> Result<Vec<Comment>> {
        let response = self.get(&format!("/posts/{}/comments", post_id)).await?;
        Ok(response.json().await?)
    }

    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        author_display_name: &str,
    ) -> Result<Comment> {
        let body = CreateCommentRequest {
            content,
            author_display_name,
        };
        let response = self
            .send(
                Method::POST,
                &format!("/posts/{}/comments", post_id),
                Some(&body),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_comment(&self, comment_id: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &format!("/comments/{}", comment_id), None)
            .await?;
        Ok(())
    }

    async fn get_caller_user_profile(&self) -> Result<Option<UserProfile>> {
        let response = self.get("/me/user-profile").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(response.json().await?)
    }

    async fn save_caller_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.send_with_image(Method::PUT, "/me/user-profile", profile, &profile.image)
            .await?;
        Ok(())
    }

    async fn get_self_profile(&self) -> Result<Profile> {
        let response = self.get("/me/profile").await?;
        Ok(response.json().await?)
    }

    async fn get_profile_by_id(&self, id: &str) -> Result<Profile> {
        let response = self.get(&format!("/profiles/{}", id)).await?;
        Ok(response.json().await?)
    }

    async fn update_profile(
        &self,
        display_name: &str,
        bio: &str,
        image: &ImageHandle,
    ) -> Result<Profile> {
        let body = UpdateProfileRequest {
            display_name,
            bio,
            image,
        };
        let response = self
            .send_with_image(Method::PUT, "/me/profile", &body, image)
            .await?;
        Ok(response.json().await?)
    }

    async fn list_profiles(&self, search: Option<&str>) -> Result<Vec<Profile>> {
        let response = match search {
            Some(term) => {
                self.get_with_params("/profiles", &[("search", term)])
                    .await?
            }
            None => self.get("/profiles").await?,
        };
        Ok(response.json().await?)
    }

    async fn toggle_follow(&self, target: &Identity) -> Result<()> {
        self.send::<()>(Method::POST, &format!("/follows/{}/toggle", target), None)
            .await?;
        Ok(())
    }

    async fn count_followers(&self, identity: &Identity) -> Result<u64> {
        let response = self
            .get(&format!("/users/{}/followers/count", identity))
            .await?;
        Ok(response.json().await?)
    }

    async fn count_following(&self, identity: &Identity) -> Result<u64> {
        let response = self
            .get(&format!("/users/{}/following/count", identity))
            .await?;
        Ok(response.json().await?)
    }
}
