//! Reddit post source
//!
//! Lists the top posts of a subreddit, either anonymously through the public
//! JSON endpoints or through OAuth when script-app credentials are present in
//! the environment.

pub mod listing;

use std::collections::HashSet;
use std::env;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ListingTime;
use crate::media::{Channel, Post};
use crate::reddit::listing::{Listing, TokenResponse};

pub const WWW_BASE: &str = "https://www.reddit.com";
pub const OAUTH_BASE: &str = "https://oauth.reddit.com";

/// Largest page Reddit serves for a listing
const MAX_PAGE_SIZE: usize = 100;

pub const ENV_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
pub const ENV_USERNAME: &str = "REDDIT_USERNAME";
pub const ENV_PASSWORD: &str = "REDDIT_PASSWORD";

/// Names read by the go-reddit based tool, accepted when the above are unset
pub const LEGACY_ENV_CLIENT_ID: &str = "GO_REDDIT_CLIENT_ID";
pub const LEGACY_ENV_CLIENT_SECRET: &str = "GO_REDDIT_CLIENT_SECRET";
pub const LEGACY_ENV_USERNAME: &str = "GO_REDDIT_CLIENT_USERNAME";
pub const LEGACY_ENV_PASSWORD: &str = "GO_REDDIT_CLIENT_PASSWORD";

/// Error types for the post source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Listing r/{channel} failed with HTTP {status}")]
    Status { channel: String, status: StatusCode },

    #[error("Authentication failed: {0}")]
    Auth(String),
}

/// Result type for post source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Supplies the posts of a channel for one run.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn top_posts(&self, channel: &Channel) -> SourceResult<Vec<Post>>;
}

/// Script-app credentials for the password grant
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Credentials from the environment, if all four values are set
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Each value comes from its `REDDIT_*` name, else its `GO_REDDIT_CLIENT_*` name.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |name: &str, legacy: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .or_else(|| lookup(legacy).filter(|value| !value.is_empty()))
        };

        Some(Self {
            client_id: read(ENV_CLIENT_ID, LEGACY_ENV_CLIENT_ID)?,
            client_secret: read(ENV_CLIENT_SECRET, LEGACY_ENV_CLIENT_SECRET)?,
            username: read(ENV_USERNAME, LEGACY_ENV_USERNAME)?,
            password: read(ENV_PASSWORD, LEGACY_ENV_PASSWORD)?,
        })
    }
}

/// Listing window and size
#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    pub time: ListingTime,
    pub limit: usize,
}

/// Reddit API client
pub struct RedditClient {
    client: Client,
    www_base: String,
    oauth_base: String,
    credentials: Option<Credentials>,
    token: OnceCell<String>,
    options: ListingOptions,
}

impl RedditClient {
    pub fn new(client: Client, credentials: Option<Credentials>, options: ListingOptions) -> Self {
        Self::with_base_urls(client, credentials, options, WWW_BASE, OAUTH_BASE)
    }

    /// Point the client at other hosts (a proxy, or a local server in tests)
    pub fn with_base_urls(
        client: Client,
        credentials: Option<Credentials>,
        options: ListingOptions,
        www_base: &str,
        oauth_base: &str,
    ) -> Self {
        Self {
            client,
            www_base: www_base.trim_end_matches('/').to_string(),
            oauth_base: oauth_base.trim_end_matches('/').to_string(),
            credentials,
            token: OnceCell::new(),
            options,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    async fn access_token(&self, credentials: &Credentials) -> SourceResult<&str> {
        let token = self
            .token
            .get_or_try_init(|| self.request_token(credentials))
            .await?;

        Ok(token.as_str())
    }

    /// Password grant against the token endpoint
    async fn request_token(&self, credentials: &Credentials) -> SourceResult<String> {
        let url = format!("{}/api/v1/access_token", self.www_base);
        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Auth(format!("token endpoint returned HTTP {}", response.status())));
        }

        let body: TokenResponse = response.json().await?;
        match (body.access_token, body.error) {
            (Some(token), _) if !token.is_empty() => {
                info!(username = %credentials.username, "Authenticated against the Reddit API");
                Ok(token)
            }
            (_, Some(error)) => Err(SourceError::Auth(error)),
            _ => Err(SourceError::Auth("no access token in response".to_string())),
        }
    }

    async fn fetch_page(&self, channel: &Channel, page_size: usize, after: Option<&str>) -> SourceResult<Listing> {
        let limit = page_size.to_string();
        let mut query = vec![
            ("t", self.options.time.as_str()),
            ("limit", limit.as_str()),
            ("raw_json", "1"),
        ];
        if let Some(after) = after {
            query.push(("after", after));
        }

        let request = match &self.credentials {
            Some(credentials) => {
                let token = self.access_token(credentials).await?;
                self.client
                    .get(format!("{}/r/{}/top", self.oauth_base, channel.name()))
                    .bearer_auth(token)
            }
            None => self
                .client
                .get(format!("{}/r/{}/top.json", self.www_base, channel.name())),
        };

        let response = request.query(&query).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                channel: channel.name().to_string(),
                status: response.status(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PostSource for RedditClient {
    /// Top posts of `channel` in the configured window, following `after`
    /// cursors until the limit is reached or the listing runs out. A post
    /// repeated across pages is kept once.
    async fn top_posts(&self, channel: &Channel) -> SourceResult<Vec<Post>> {
        let limit = self.options.limit;
        let mut posts: Vec<Post> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let page_size = (limit - posts.len()).min(MAX_PAGE_SIZE);
            let page = self.fetch_page(channel, page_size, after.as_deref()).await?;
            let received = page.data.children.len();
            after = page.data.after.clone();
            let listed = page.data.into_posts();
            let listed_count = listed.len();
            let before = posts.len();
            posts.extend(listed.into_iter().filter(|post| seen.insert(post.id.clone())));
            let repeated = listed_count - (posts.len() - before);
            if repeated > 0 {
                debug!(channel = %channel, repeated = repeated, "Dropped posts already listed");
            }

            debug!(channel = %channel, received = received, total = posts.len(), "Fetched listing page");

            if received == 0 || after.is_none() {
                break;
            }
        }

        posts.truncate(limit);
        info!(channel = %channel, posts = posts.len(), "Listed top posts");
        Ok(posts)
    }
}
