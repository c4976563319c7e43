use database::{FailedRecord, PostStore};
use grepr_core::{truncate_chars, CoreError, PostStatus, StageReport};
use std::fmt;

/// Snapshot of the record store for the `status` command and cycle logs.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub counts: Vec<(PostStatus, i64)>,
    pub categories: Vec<(String, i64)>,
    pub recent_errors: Vec<FailedRecord>,
    pub recent_runs: Vec<StageReport>,
    pub remote_rows: Option<u64>,
}

impl StatusSummary {
    /// Reads counts, and the `recent` latest errors and runs.
    pub async fn collect(store: &PostStore, recent: u32) -> Result<Self, CoreError> {
        Ok(Self {
            counts: store.status_counts().await?,
            categories: store.category_counts().await?,
            recent_errors: if recent > 0 { store.recent_errors(recent).await? } else { Vec::new() },
            recent_runs: if recent > 0 { store.recent_runs(recent).await? } else { Vec::new() },
            remote_rows: None,
        })
    }

    pub fn with_remote_rows(mut self, rows: u64) -> Self {
        self.remote_rows = Some(rows);
        self
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, status: PostStatus) -> i64 {
        self.counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// One-line form, e.g. `12 posts: 3 fetched, 4 processed, 5 pushed`.
    pub fn counts_line(&self) -> String {
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(status, n)| format!("{} {}", n, status))
            .collect();
        format!("{} posts: {}", self.total(), parts.join(", "))
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.counts_line())?;
        if let Some(rows) = self.remote_rows {
            writeln!(f, "Remote table: {} rows", rows)?;
        }

        if !self.categories.is_empty() {
            writeln!(f, "\nCategories:")?;
            for (category, n) in &self.categories {
                writeln!(f, "  {:<12} {}", category, n)?;
            }
        }

        if !self.recent_errors.is_empty() {
            writeln!(f, "\nRecent errors:")?;
            for failed in &self.recent_errors {
                writeln!(
                    f,
                    "  {} ({}, {} attempts) {}: {}",
                    failed.reddit_id,
                    failed.status,
                    failed.attempts,
                    truncate_chars(&failed.title, 40),
                    failed.last_error
                )?;
            }
        }

        if !self.recent_runs.is_empty() {
            writeln!(f, "\nLast runs:")?;
            for run in &self.recent_runs {
                writeln!(f, "  {} {}", run.finished_at.format("%Y-%m-%d %H:%M"), run)?;
            }
        }
        Ok(())
    }
}
