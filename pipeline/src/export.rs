use chrono::{DateTime, Utc};
use database::PostStore;
use grepr_core::{CoreError, PipelineSettings, PostRecord, TimeFilter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ExportMetadata {
    pub generated_at: DateTime<Utc>,
    pub subreddits: Vec<String>,
    pub min_score: i64,
    pub time_filter: TimeFilter,
    pub total_posts: usize,
}

#[derive(Debug, Serialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub posts: Vec<PostRecord>,
    /// Number of posts per lower-cased tag.
    pub tag_groups: BTreeMap<String, usize>,
}

impl ExportDocument {
    pub fn build(settings: &PipelineSettings, posts: Vec<PostRecord>) -> Self {
        let mut tag_groups = BTreeMap::new();
        for tag in posts
            .iter()
            .filter_map(|p| p.analysis.as_ref())
            .flat_map(|a| a.tags.iter())
        {
            *tag_groups.entry(tag.to_lowercase()).or_insert(0) += 1;
        }

        Self {
            metadata: ExportMetadata {
                generated_at: Utc::now(),
                subreddits: settings.subreddits.clone(),
                min_score: settings.min_score,
                time_filter: settings.time_filter,
                total_posts: posts.len(),
            },
            posts,
            tag_groups,
        }
    }
}

/// `grepr_output_<YYYY-MM-DD_HH-MM>.json` in the working directory.
pub fn default_export_path(now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("grepr_output_{}.json", now.format("%Y-%m-%d_%H-%M")))
}

/// Writes every stored record as pretty JSON. Returns the number of posts.
pub async fn export_json(
    store: &PostStore,
    settings: &PipelineSettings,
    path: &Path,
) -> Result<usize, CoreError> {
    let document = ExportDocument::build(settings, store.all_records().await?);
    let json = serde_json::to_string_pretty(&document)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, json).await?;

    info!("Exported {} posts to {}", document.metadata.total_posts, path.display());
    Ok(document.metadata.total_posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use grepr_core::{PostAnalysis, RedditPost};

    fn post(id: &str, tags: &[&str]) -> PostRecord {
        let mut record = PostRecord::from_reddit(
            RedditPost {
                id: id.to_string(),
                subreddit: "vosfinances".to_string(),
                title: "t".to_string(),
                selftext: String::new(),
                author: "a".to_string(),
                score: 10,
                num_comments: 0,
                upvote_ratio: 1.0,
                permalink: format!("/r/vosfinances/comments/{}/t/", id),
                created_utc: 0,
            },
            None,
        );
        record.analysis = Some(PostAnalysis {
            category: "ETF".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..PostAnalysis::default()
        });
        record
    }

    #[test]
    fn test_document_metadata_and_tag_groups() {
        let settings = PipelineSettings::default();
        let doc = ExportDocument::build(&settings, vec![post("a", &["CW8", "PEA"]), post("b", &["cw8"])]);

        assert_eq!(doc.metadata.total_posts, 2);
        assert_eq!(doc.metadata.min_score, 10);
        assert_eq!(doc.tag_groups.get("cw8"), Some(&2));
        assert_eq!(doc.tag_groups.get("pea"), Some(&1));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["metadata"]["time_filter"], "all");
        assert_eq!(value["posts"][0]["status"], "fetched");
    }

    #[test]
    fn test_default_export_path() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 5, 0).unwrap();
        assert_eq!(
            default_export_path(now),
            PathBuf::from("grepr_output_2024-05-01_08-05.json")
        );
    }
}
