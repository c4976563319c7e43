use grepr_core::{truncate_chars, RedditApiError, RedditPost, TopComment};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub const REDDIT_PUBLIC_BASE: &str = "https://www.reddit.com";
pub const REDDIT_OAUTH_BASE: &str = "https://oauth.reddit.com";
pub const REDDIT_AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Reddit caps listing pages at 100 items.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Where requests go. Overridable so tests can point the client at a mock.
#[derive(Debug, Clone)]
pub struct RedditEndpoints {
    pub public_base: String,
    pub oauth_base: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for RedditEndpoints {
    fn default() -> Self {
        Self {
            public_base: REDDIT_PUBLIC_BASE.to_string(),
            oauth_base: REDDIT_OAUTH_BASE.to_string(),
            authorize_url: REDDIT_AUTHORIZE_URL.to_string(),
            token_url: REDDIT_TOKEN_URL.to_string(),
        }
    }
}

impl RedditEndpoints {
    /// Points every endpoint at one base URL.
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            public_base: base.to_string(),
            oauth_base: base.to_string(),
            authorize_url: format!("{}/api/v1/authorize", base),
            token_url: format!("{}/api/v1/access_token", base),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub stickied: bool,
}

impl RedditPostData {
    pub fn into_post(self, subreddit: &str, max_chars: usize) -> RedditPost {
        RedditPost {
            id: self.id,
            subreddit: subreddit.to_string(),
            title: self.title,
            selftext: truncate_chars(&self.selftext, max_chars),
            author: self.author.unwrap_or_else(|| "[deleted]".to_string()),
            score: self.score,
            num_comments: self.num_comments,
            upvote_ratio: self.upvote_ratio.unwrap_or_default(),
            permalink: self.permalink,
            created_utc: self.created_utc as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub author: Option<String>,
}

impl RedditCommentData {
    pub fn into_comment(self, max_chars: usize) -> TopComment {
        TopComment {
            id: self.id,
            body: truncate_chars(&self.body, max_chars),
            score: self.score,
            author: self.author.unwrap_or_else(|| "[deleted]".to_string()),
        }
    }
}

/// Picks the first real comment out of a `/comments/{id}` response, which is
/// a pair of listings: the post itself, then its comment tree.
pub fn first_comment(
    listings: Vec<RedditListing<serde_json::Value>>,
) -> Result<Option<RedditCommentData>, RedditApiError> {
    let Some(comments) = listings.into_iter().nth(1) else {
        return Ok(None);
    };
    let Some(child) = comments
        .data
        .children
        .into_iter()
        .find(|child| child.kind == "t1")
    else {
        return Ok(None);
    };
    serde_json::from_value(child.data)
        .map(Some)
        .map_err(|e| RedditApiError::InvalidResponse {
            details: format!("Failed to parse comment: {}", e),
        })
}

/// Maps a non-success HTTP status onto the matching API error.
pub fn error_for_status(status: StatusCode, headers: &HeaderMap, resource: &str) -> RedditApiError {
    match status.as_u16() {
        429 => {
            let retry_after = headers
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|secs| secs.ceil() as u64)
                .unwrap_or(60);
            RedditApiError::RateLimitExceeded { retry_after }
        }
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: resource.to_string(),
        },
        404 => RedditApiError::SubredditNotFound {
            subreddit: resource.to_string(),
        },
        code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
        code => RedditApiError::InvalidResponse {
            details: format!("Unexpected status {} for {}", code, resource),
        },
    }
}
