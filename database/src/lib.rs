//! Local SQLite store for post records and the stage run log.
//!
//! Every statement that writes `status` is guarded in SQL so a record only
//! moves forward along `fetched -> processed -> pushed`.

use chrono::{DateTime, Utc};
use grepr_core::{
    CoreError, DatabaseError, PostAnalysis, PostRecord, PostStatus, Stage, StageReport,
    TopComment,
};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use std::path::Path;
use tracing::{debug, info};


const RECORD_COLUMNS: &str = "reddit_id, subreddit, title, selftext, author, score, num_comments, \
     upvote_ratio, permalink, created_utc, top_comment_id, top_comment_body, top_comment_score, \
     top_comment_author, status, category, summary, key_advice, tags, consensus, remote_id, \
     needs_sync, attempts, last_error, fetched_at, processed_at, pushed_at";

type SqliteQuery<'a> = Query<'a, Sqlite, SqliteArguments<'a>>;

/// A record whose last stage attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRecord {
    pub reddit_id: String,
    pub title: String,
    pub status: PostStatus,
    pub attempts: i64,
    pub last_error: String,
}

#[derive(Debug, Clone)]
pub struct PostStore {
    pool: SqlitePool,
}

impl PostStore {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn connect(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("{}: {}", path.display(), e),
            })?;

        info!("Opened record store at {}", path.display());
        Ok(Self { pool })
    }

    /// Opens the store and brings its schema up to date.
    pub async fn open(path: &Path) -> Result<Self, CoreError> {
        let store = Self::connect(path).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Inserts a freshly fetched post, or refreshes the volatile Reddit
    /// fields of a known one. Returns `true` when the post was new.
    pub async fn upsert_fetched(&self, record: &PostRecord) -> Result<bool, CoreError> {
        let exists = sqlx::query("SELECT 1 FROM posts WHERE reddit_id = ?")
            .bind(&record.reddit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?
            .is_some();

        let comment = record.top_comment.as_ref();

        if exists {
            sqlx::query(
                r#"
                UPDATE posts SET
                    score = ?, num_comments = ?, upvote_ratio = ?,
                    top_comment_id = COALESCE(?, top_comment_id),
                    top_comment_body = COALESCE(?, top_comment_body),
                    top_comment_score = COALESCE(?, top_comment_score),
                    top_comment_author = COALESCE(?, top_comment_author)
                WHERE reddit_id = ?
                "#,
            )
            .bind(record.score)
            .bind(record.num_comments)
            .bind(record.upvote_ratio)
            .bind(comment.map(|c| c.id.as_str()))
            .bind(comment.map(|c| c.body.as_str()))
            .bind(comment.map(|c| c.score))
            .bind(comment.map(|c| c.author.as_str()))
            .bind(&record.reddit_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

            debug!("Refreshed {} (score {})", record.reddit_id, record.score);
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO posts (
                reddit_id, subreddit, title, selftext, author, score, num_comments,
                upvote_ratio, permalink, created_utc, top_comment_id, top_comment_body,
                top_comment_score, top_comment_author, status, fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'fetched', ?)
            "#,
        )
        .bind(&record.reddit_id)
        .bind(&record.subreddit)
        .bind(&record.title)
        .bind(&record.selftext)
        .bind(&record.author)
        .bind(record.score)
        .bind(record.num_comments)
        .bind(record.upvote_ratio)
        .bind(&record.permalink)
        .bind(record.created_utc)
        .bind(comment.map(|c| c.id.as_str()))
        .bind(comment.map(|c| c.body.as_str()))
        .bind(comment.map(|c| c.score))
        .bind(comment.map(|c| c.author.as_str()))
        .bind(record.fetched_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        debug!("Stored new post {} from r/{}", record.reddit_id, record.subreddit);
        Ok(true)
    }

    /// Records still waiting for the AI pass, oldest first.
    pub async fn pending_for_process(&self, limit: Option<u32>) -> Result<Vec<PostRecord>, CoreError> {
        self.select_records(
            "WHERE status = 'fetched' ORDER BY fetched_at, reddit_id LIMIT ?",
            |q| q.bind(sql_limit(limit)),
        )
        .await
    }

    /// Already analysed records that landed in `category`.
    pub async fn records_in_category(
        &self,
        category: &str,
        limit: Option<u32>,
    ) -> Result<Vec<PostRecord>, CoreError> {
        let category = category.to_string();
        self.select_records(
            "WHERE status != 'fetched' AND category = ? ORDER BY fetched_at, reddit_id LIMIT ?",
            move |q| q.bind(category).bind(sql_limit(limit)),
        )
        .await
    }

    /// Stores an AI analysis. A fetched record becomes processed; a pushed
    /// record keeps its status and is flagged for re-sync.
    pub async fn save_analysis(&self, reddit_id: &str, analysis: &PostAnalysis) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET
                category = ?, summary = ?, key_advice = ?, tags = ?, consensus = ?,
                processed_at = ?, last_error = NULL,
                needs_sync = CASE WHEN status = 'pushed' THEN 1 ELSE needs_sync END,
                status = CASE WHEN status = 'fetched' THEN 'processed' ELSE status END
            WHERE reddit_id = ?
            "#,
        )
        .bind(&analysis.category)
        .bind(&analysis.summary)
        .bind(serde_json::to_string(&analysis.key_advice)?)
        .bind(serde_json::to_string(&analysis.tags)?)
        .bind(analysis.consensus.as_deref())
        .bind(Utc::now())
        .bind(reddit_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                resource: format!("post {}", reddit_id),
            });
        }
        Ok(())
    }

    /// Records the push stage has to send. With `all`, every analysed record.
    pub async fn pending_for_push(&self, all: bool) -> Result<Vec<PostRecord>, CoreError> {
        let clause = if all {
            "WHERE status IN ('processed', 'pushed') ORDER BY processed_at, reddit_id"
        } else {
            "WHERE status = 'processed' OR (status = 'pushed' AND needs_sync = 1) \
             ORDER BY processed_at, reddit_id"
        };
        self.select_records(clause, |q| q).await
    }

    /// Marks a record as present in the remote table. Returns `false` when the
    /// record was not in a pushable state.
    pub async fn mark_pushed(&self, reddit_id: &str, remote_id: i64) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET
                status = 'pushed', remote_id = ?, needs_sync = 0, pushed_at = ?, last_error = NULL
            WHERE reddit_id = ? AND status IN ('processed', 'pushed')
            "#,
        )
        .bind(remote_id)
        .bind(Utc::now())
        .bind(reddit_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        Ok(result.rows_affected() > 0)
    }

    /// Notes a failed stage attempt without touching status.
    pub async fn record_failure(&self, reddit_id: &str, message: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE posts SET attempts = attempts + 1, last_error = ? WHERE reddit_id = ?")
            .bind(message)
            .bind(reddit_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    pub async fn get(&self, reddit_id: &str) -> Result<Option<PostRecord>, CoreError> {
        let id = reddit_id.to_string();
        let mut records = self
            .select_records("WHERE reddit_id = ?", move |q| q.bind(id))
            .await?;
        Ok(records.pop())
    }

    pub async fn all_records(&self) -> Result<Vec<PostRecord>, CoreError> {
        self.select_records("ORDER BY subreddit, score DESC, reddit_id", |q| q)
            .await
    }

    /// Number of records per status, every status included.
    pub async fn status_counts(&self) -> Result<Vec<(PostStatus, i64)>, CoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM posts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;

        let mut counts: Vec<(PostStatus, i64)> = PostStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let status: String = row.try_get("status").map_err(DatabaseError::Sql)?;
            let count: i64 = row.try_get("count").map_err(DatabaseError::Sql)?;
            if let Some(entry) = counts.iter_mut().find(|(s, _)| s.as_str() == status) {
                entry.1 = count;
            }
        }
        Ok(counts)
    }

    /// Analysed records per category, largest first.
    pub async fn category_counts(&self) -> Result<Vec<(String, i64)>, CoreError> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS count FROM posts WHERE category IS NOT NULL \
             GROUP BY category ORDER BY count DESC, category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("category").map_err(DatabaseError::Sql)?,
                    row.try_get("count").map_err(DatabaseError::Sql)?,
                ))
            })
            .collect()
    }

    pub async fn recent_errors(&self, limit: u32) -> Result<Vec<FailedRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT reddit_id, title, status, attempts, last_error FROM posts \
             WHERE last_error IS NOT NULL ORDER BY attempts DESC, reddit_id LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        rows.iter()
            .map(|row| {
                let reddit_id: String = row.try_get("reddit_id").map_err(DatabaseError::Sql)?;
                let status = parse_status(&reddit_id, row)?;
                Ok(FailedRecord {
                    title: row.try_get("title").map_err(DatabaseError::Sql)?,
                    attempts: row.try_get("attempts").map_err(DatabaseError::Sql)?,
                    last_error: row.try_get("last_error").map_err(DatabaseError::Sql)?,
                    status,
                    reddit_id,
                })
            })
            .collect()
    }

    /// Appends a stage invocation to the run log.
    pub async fn record_run(&self, report: &StageReport) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO stage_runs (stage, started_at, finished_at, attempted, succeeded, failed, skipped)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.stage.as_str())
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(i64::from(report.attempted))
        .bind(i64::from(report.succeeded))
        .bind(i64::from(report.failed))
        .bind(i64::from(report.skipped))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;
        Ok(())
    }

    /// Most recent run log entries, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<StageReport>, CoreError> {
        let rows = sqlx::query(
            "SELECT stage, started_at, finished_at, attempted, succeeded, failed, skipped \
             FROM stage_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Sql)?;

        rows.iter().map(report_from_row).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn select_records<F>(&self, clause: &str, bind: F) -> Result<Vec<PostRecord>, CoreError>
    where
        F: for<'a> FnOnce(SqliteQuery<'a>) -> SqliteQuery<'a>,
    {
        let sql = format!("SELECT {} FROM posts {}", RECORD_COLUMNS, clause);
        let rows = bind(sqlx::query(&sql))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Sql)?;
        rows.iter().map(record_from_row).collect()
    }
}

fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

fn corrupt(reddit_id: &str, details: impl ToString) -> CoreError {
    CoreError::Database(DatabaseError::CorruptRow {
        reddit_id: reddit_id.to_string(),
        details: details.to_string(),
    })
}

fn parse_status(reddit_id: &str, row: &SqliteRow) -> Result<PostStatus, CoreError> {
    let raw: String = row.try_get("status").map_err(DatabaseError::Sql)?;
    raw.parse().map_err(|e: CoreError| corrupt(reddit_id, e))
}

fn json_list(reddit_id: &str, raw: Option<String>) -> Result<Vec<String>, CoreError> {
    match raw {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|e| corrupt(reddit_id, e)),
        _ => Ok(Vec::new()),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<PostRecord, CoreError> {
    let get_err = DatabaseError::Sql;
    let reddit_id: String = row.try_get("reddit_id").map_err(get_err)?;

    let top_comment = match row.try_get::<Option<String>, _>("top_comment_body").map_err(get_err)? {
        Some(body) => Some(TopComment {
            id: row
                .try_get::<Option<String>, _>("top_comment_id")
                .map_err(get_err)?
                .unwrap_or_default(),
            body,
            score: row
                .try_get::<Option<i64>, _>("top_comment_score")
                .map_err(get_err)?
                .unwrap_or_default(),
            author: row
                .try_get::<Option<String>, _>("top_comment_author")
                .map_err(get_err)?
                .unwrap_or_default(),
        }),
        None => None,
    };

    let analysis = match row.try_get::<Option<String>, _>("category").map_err(get_err)? {
        Some(category) => Some(PostAnalysis {
            category,
            summary: row
                .try_get::<Option<String>, _>("summary")
                .map_err(get_err)?
                .unwrap_or_default(),
            key_advice: json_list(&reddit_id, row.try_get("key_advice").map_err(get_err)?)?,
            tags: json_list(&reddit_id, row.try_get("tags").map_err(get_err)?)?,
            consensus: row.try_get("consensus").map_err(get_err)?,
        }),
        None => None,
    };

    Ok(PostRecord {
        status: parse_status(&reddit_id, row)?,
        subreddit: row.try_get("subreddit").map_err(get_err)?,
        title: row.try_get("title").map_err(get_err)?,
        selftext: row.try_get("selftext").map_err(get_err)?,
        author: row.try_get("author").map_err(get_err)?,
        score: row.try_get("score").map_err(get_err)?,
        num_comments: row.try_get("num_comments").map_err(get_err)?,
        upvote_ratio: row.try_get("upvote_ratio").map_err(get_err)?,
        permalink: row.try_get("permalink").map_err(get_err)?,
        created_utc: row.try_get("created_utc").map_err(get_err)?,
        top_comment,
        analysis,
        remote_id: row.try_get("remote_id").map_err(get_err)?,
        needs_sync: row.try_get("needs_sync").map_err(get_err)?,
        attempts: row.try_get("attempts").map_err(get_err)?,
        last_error: row.try_get("last_error").map_err(get_err)?,
        fetched_at: row.try_get("fetched_at").map_err(get_err)?,
        processed_at: row.try_get("processed_at").map_err(get_err)?,
        pushed_at: row.try_get("pushed_at").map_err(get_err)?,
        reddit_id,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<StageReport, CoreError> {
    let stage: String = row.try_get("stage").map_err(DatabaseError::Sql)?;
    let stage: Stage = stage.parse()?;
    let count = |name: &str| -> Result<u32, CoreError> {
        let value: i64 = row.try_get(name).map_err(DatabaseError::Sql)?;
        Ok(u32::try_from(value).unwrap_or(u32::MAX))
    };

    Ok(StageReport {
        stage,
        started_at: row.try_get::<DateTime<Utc>, _>("started_at").map_err(DatabaseError::Sql)?,
        finished_at: row.try_get::<DateTime<Utc>, _>("finished_at").map_err(DatabaseError::Sql)?,
        attempted: count("attempted")?,
        succeeded: count("succeeded")?,
        failed: count("failed")?,
        skipped: count("skipped")?,
    })
}
