use crate::error::CoreError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A post as returned by Reddit, before it enters the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub permalink: String,
    pub created_utc: i64,
}

impl RedditPost {
    /// Absolute URL of the post's comment page.
    pub fn url(&self) -> String {
        format!("https://reddit.com{}", self.permalink)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopComment {
    pub id: String,
    pub body: String,
    pub score: i64,
    pub author: String,
}

/// Lifecycle of a stored post. The ordering is the pipeline order and a
/// record's status only ever moves forward along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Fetched,
    Processed,
    Pushed,
}

impl PostStatus {
    pub const ALL: [PostStatus; 3] = [PostStatus::Fetched, PostStatus::Processed, PostStatus::Pushed];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Fetched => "fetched",
            PostStatus::Processed => "processed",
            PostStatus::Pushed => "pushed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetched" => Ok(PostStatus::Fetched),
            "processed" => Ok(PostStatus::Processed),
            "pushed" => Ok(PostStatus::Pushed),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown post status '{other}'"),
            }),
        }
    }
}

/// Reddit's `t` parameter for top listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(CoreError::InvalidInput {
                message: format!(
                    "unknown period '{other}' (expected hour, day, week, month, year or all)"
                ),
            }),
        }
    }
}

/// Structured result of the AI pass over one post.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostAnalysis {
    pub category: String,
    pub summary: String,
    pub key_advice: Vec<String>,
    pub tags: Vec<String>,
    pub consensus: Option<String>,
}

/// A post as held in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub permalink: String,
    pub created_utc: i64,
    pub top_comment: Option<TopComment>,
    pub status: PostStatus,
    pub analysis: Option<PostAnalysis>,
    pub remote_id: Option<i64>,
    pub needs_sync: bool,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl PostRecord {
    pub fn from_reddit(post: RedditPost, top_comment: Option<TopComment>) -> Self {
        Self {
            reddit_id: post.id,
            subreddit: post.subreddit,
            title: post.title,
            selftext: post.selftext,
            author: post.author,
            score: post.score,
            num_comments: post.num_comments,
            upvote_ratio: post.upvote_ratio,
            permalink: post.permalink,
            created_utc: post.created_utc,
            top_comment,
            status: PostStatus::Fetched,
            analysis: None,
            remote_id: None,
            needs_sync: false,
            attempts: 0,
            last_error: None,
            fetched_at: Utc::now(),
            processed_at: None,
            pushed_at: None,
        }
    }

    pub fn url(&self) -> String {
        format!("https://reddit.com{}", self.permalink)
    }

    /// Creation time formatted the way the remote table stores it.
    pub fn created_at(&self) -> Option<String> {
        if self.created_utc <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.created_utc, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Process,
    Push,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Process => "process",
            Stage::Push => "push",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Stage::Fetch),
            "process" => Ok(Stage::Process),
            "push" => Ok(Stage::Push),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown stage '{other}'"),
            }),
        }
    }
}

/// Outcome counters for one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl StageReport {
    pub fn start(stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            stage,
            started_at: now,
            finished_at: now,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} attempted, {} ok, {} failed, {} skipped",
            self.stage, self.attempted, self.succeeded, self.failed, self.skipped
        )
    }
}

/// Cuts `text` to at most `max_chars` characters without splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
