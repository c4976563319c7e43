pub mod api;
pub mod auth;
pub mod rate_limiter;


use api::{
    error_for_status, first_comment, RedditCommentData, RedditEndpoints, RedditListing,
    RedditPostData, MAX_PAGE_SIZE,
};
use auth::AppOnlyAuth;
use grepr_core::{
    CoreError, ErrorExt, RedditApiError, RedditConfig, RedditPost, TimeFilter, TopComment,
};
use rate_limiter::{RateLimitConfig, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where posts come from. The pipeline only talks to Reddit through this.
#[allow(async_fn_in_trait)]
pub trait PostSource {
    /// Top posts of `subreddit` within `period`, at most `limit` of them.
    async fn top_posts(
        &self,
        subreddit: &str,
        period: TimeFilter,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError>;

    /// Highest-ranked comment of a post, if it has any.
    async fn top_comment(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Option<TopComment>, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// Authenticated app-only access on oauth.reddit.com.
    OAuth,
    /// Unauthenticated `.json` endpoints on www.reddit.com.
    Public,
}

#[derive(Debug)]
pub struct RedditClient {
    http_client: Client,
    endpoints: RedditEndpoints,
    auth: Option<AppOnlyAuth>,
    oauth_limiter: Option<RateLimiter>,
    /// Paces public requests, including OAuth fallbacks.
    public_limiter: RateLimiter,
    selftext_max_chars: usize,
    comment_max_chars: usize,
}

impl RedditClient {
    pub fn new(config: &RedditConfig) -> Result<Self, CoreError> {
        Self::with_endpoints(config, RedditEndpoints::default())
    }

    pub fn with_endpoints(
        config: &RedditConfig,
        endpoints: RedditEndpoints,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let auth = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if config.has_credentials() => {
                Some(AppOnlyAuth::new(id.clone(), secret.clone(), &endpoints)?)
            }
            _ => None,
        };

        let oauth_limiter = auth
            .as_ref()
            .map(|_| RateLimiter::new(RateLimitConfig::reddit_oauth()));

        let client = Self {
            http_client,
            endpoints,
            auth,
            oauth_limiter,
            public_limiter: RateLimiter::new(RateLimitConfig::reddit_public()),
            selftext_max_chars: config.selftext_max_chars,
            comment_max_chars: config.comment_max_chars,
        };
        match client.mode() {
            ApiMode::OAuth => info!(
                "Using Reddit official API (app-only OAuth, {} req/min)",
                client
                    .oauth_limiter
                    .as_ref()
                    .map_or(0, |limiter| limiter.requests_per_minute())
            ),
            ApiMode::Public => info!(
                "Reddit API not configured - using public .json endpoint ({} req/min)",
                client.public_limiter.requests_per_minute()
            ),
        }
        Ok(client)
    }

    pub fn mode(&self) -> ApiMode {
        if self.auth.is_some() {
            ApiMode::OAuth
        } else {
            ApiMode::Public
        }
    }

    pub async fn fetch_top_posts(
        &self,
        subreddit: &str,
        period: TimeFilter,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        let path = format!("/r/{}/top", subreddit);
        let mut posts: Vec<RedditPost> = Vec::new();
        let mut after: Option<String> = None;

        while (posts.len() as u32) < limit {
            let page_size = (limit - posts.len() as u32).min(MAX_PAGE_SIZE);
            let mut params = vec![
                ("t", period.as_str().to_string()),
                ("limit", page_size.to_string()),
                ("raw_json", "1".to_string()),
            ];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            let listing: RedditListing<RedditPostData> = self.get_json(&path, &params).await?;
            if listing.data.children.is_empty() {
                break;
            }

            for child in listing.data.children {
                if posts.len() as u32 >= limit {
                    break;
                }
                if child.kind != "t3" {
                    continue;
                }
                posts.push(child.data.into_post(subreddit, self.selftext_max_chars));
            }

            after = listing.data.after;
            if after.is_none() {
                break;
            }
        }

        info!(
            "Retrieved {} top posts from r/{} ({})",
            posts.len(),
            subreddit,
            period
        );
        Ok(posts)
    }

    pub async fn fetch_top_comment(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Option<TopComment>, CoreError> {
        let path = format!("/r/{}/comments/{}", subreddit, post_id);
        let params = [
            ("limit", "1".to_string()),
            ("sort", "top".to_string()),
            ("raw_json", "1".to_string()),
        ];

        let listings: Vec<RedditListing<serde_json::Value>> =
            self.get_json(&path, &params).await?;
        let comment: Option<RedditCommentData> = first_comment(listings)?;
        Ok(comment.map(|c| c.into_comment(self.comment_max_chars)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, CoreError> {
        let token = match &self.auth {
            Some(auth) => match auth.access_token().await {
                Ok(token) => Some(token),
                Err(e) => {
                    e.log_warn();
                    warn!("Reddit API auth failed, falling back to public API");
                    None
                }
            },
            None => None,
        };

        let limiter = match (&token, &self.oauth_limiter) {
            (Some(_), Some(limiter)) => limiter,
            _ => &self.public_limiter,
        };
        let waited = limiter.acquire_permit().await;
        if waited > Duration::from_millis(100) {
            debug!("Waited {:?} for a Reddit rate limit permit", waited);
        }

        let request = match &token {
            Some(token) => self
                .http_client
                .get(format!("{}{}", self.endpoints.oauth_base, path))
                .bearer_auth(token),
            None => self
                .http_client
                .get(format!("{}{}/.json", self.endpoints.public_base, path)),
        };

        debug!("GET {} {:?}", path, params);
        let response = request.query(params).send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::RedditApi(RedditApiError::RequestTimeout)
            } else {
                CoreError::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error = error_for_status(status, response.headers(), path);
            if matches!(error, RedditApiError::InvalidToken) {
                if let Some(auth) = &self.auth {
                    auth.invalidate().await;
                }
            }
            return Err(error.into());
        }

        response.json::<T>().await.map_err(|e| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse response for {}: {}", path, e),
            })
        })
    }
}

impl PostSource for RedditClient {
    async fn top_posts(
        &self,
        subreddit: &str,
        period: TimeFilter,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        self.fetch_top_posts(subreddit, period, limit).await
    }

    async fn top_comment(
        &self,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Option<TopComment>, CoreError> {
        self.fetch_top_comment(subreddit, post_id).await
    }
}
