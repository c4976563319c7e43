use grepr_core::PostRecord;
use serde::{Deserialize, Serialize};

/// Column layout of the remote posts table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub url: String,
    pub author: String,
    pub created_at: Option<String>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub key_advice: Option<String>,
    pub tags: Option<String>,
    pub consensus: Option<String>,
    pub top_comment: Option<String>,
    pub comment_score: Option<i64>,
}

impl From<&PostRecord> for RemoteRow {
    fn from(record: &PostRecord) -> Self {
        let analysis = record.analysis.as_ref();
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

        Self {
            reddit_id: record.reddit_id.clone(),
            subreddit: record.subreddit.clone(),
            title: record.title.clone(),
            selftext: record.selftext.clone(),
            score: record.score,
            num_comments: record.num_comments,
            upvote_ratio: record.upvote_ratio,
            url: record.url(),
            author: record.author.clone(),
            created_at: record.created_at(),
            category: analysis.map(|a| a.category.clone()),
            summary: analysis.and_then(|a| non_empty(a.summary.clone())),
            key_advice: analysis.and_then(|a| {
                non_empty(
                    a.key_advice
                        .iter()
                        .map(|advice| format!("• {}", advice))
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }),
            tags: analysis.and_then(|a| non_empty(a.tags.join(", "))),
            consensus: analysis.and_then(|a| a.consensus.clone()),
            top_comment: record.top_comment.as_ref().map(|c| c.body.clone()),
            comment_score: record.top_comment.as_ref().map(|c| c.score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grepr_core::{PostAnalysis, RedditPost, TopComment};

    #[test]
    fn test_row_mapping() {
        let mut record = PostRecord::from_reddit(
            RedditPost {
                id: "xyz".to_string(),
                subreddit: "Bogleheads".to_string(),
                title: "Three fund portfolio".to_string(),
                selftext: String::new(),
                author: "jack".to_string(),
                score: 321,
                num_comments: 54,
                upvote_ratio: 0.97,
                permalink: "/r/Bogleheads/comments/xyz/three_fund/".to_string(),
                created_utc: 1_700_000_000,
            },
            Some(TopComment {
                id: "c9".to_string(),
                body: "Stay the course.".to_string(),
                score: 88,
                author: "taylor".to_string(),
            }),
        );
        record.analysis = Some(PostAnalysis {
            category: "Strategie".to_string(),
            summary: String::new(),
            key_advice: vec!["Keep costs low".to_string(), "Rebalance yearly".to_string()],
            tags: vec!["VTI".to_string(), "BND".to_string()],
            consensus: Some("fort".to_string()),
        });

        let row = RemoteRow::from(&record);
        assert_eq!(row.url, "https://reddit.com/r/Bogleheads/comments/xyz/three_fund/");
        assert_eq!(row.created_at.as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(row.category.as_deref(), Some("Strategie"));
        assert_eq!(row.summary, None);
        assert_eq!(row.key_advice.as_deref(), Some("• Keep costs low\n• Rebalance yearly"));
        assert_eq!(row.tags.as_deref(), Some("VTI, BND"));
        assert_eq!(row.top_comment.as_deref(), Some("Stay the course."));
        assert_eq!(row.comment_score, Some(88));
    }

    #[test]
    fn test_unprocessed_record_has_empty_ai_columns() {
        let record = PostRecord::from_reddit(
            RedditPost {
                id: "abc".to_string(),
                subreddit: "vossous".to_string(),
                title: "t".to_string(),
                selftext: "b".to_string(),
                author: "a".to_string(),
                score: 11,
                num_comments: 0,
                upvote_ratio: 1.0,
                permalink: "/r/vossous/comments/abc/t/".to_string(),
                created_utc: 0,
            },
            None,
        );
        let row = RemoteRow::from(&record);
        assert!(row.category.is_none());
        assert!(row.key_advice.is_none());
        assert!(row.created_at.is_none());
        assert!(row.comment_score.is_none());
    }
}
