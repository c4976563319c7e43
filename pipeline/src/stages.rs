//! The three pipeline stages. Each one reads its input from the record
//! store, advances status flags and appends a report to the run log.
//! A failure on one record is stored on that record and the stage moves on.

use database::PostStore;
use grepr_core::{
    describe_failure, CoreError, PipelineSettings, PostRecord, Stage, StageReport,
    TimeFilter, FALLBACK_CATEGORY,
};
use llm_interface::LlmProvider;
use nocodb_client::{upsert, RemoteRow, RemoteTable, UpsertOutcome};
use reddit_client::PostSource;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub period: TimeFilter,
    pub limit: u32,
    pub with_comments: bool,
}

impl FetchOptions {
    /// Options for a manual fetch; `period` overrides the configured window.
    pub fn manual(settings: &PipelineSettings, period: Option<TimeFilter>) -> Self {
        Self {
            period: period.unwrap_or(settings.time_filter),
            limit: settings.posts_per_subreddit,
            with_comments: settings.fetch_comments,
        }
    }

    /// Options for a scheduled fetch, which only looks at recent posts.
    pub fn scheduled(settings: &PipelineSettings) -> Self {
        Self {
            period: settings.scheduled_time_filter,
            ..Self::manual(settings, None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessOptions {
    pub limit: Option<u32>,
    /// Re-run records that landed in the fallback category instead of new ones.
    pub recategorize: bool,
    pub request_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushOptions {
    /// Push every analysed record, not only the pending ones.
    pub all: bool,
}

pub async fn fetch_stage<S: PostSource>(
    store: &PostStore,
    source: &S,
    settings: &PipelineSettings,
    options: &FetchOptions,
) -> Result<StageReport, CoreError> {
    let mut report = StageReport::start(Stage::Fetch);
    info!(
        "Fetching top posts ({}) from {} subreddits, min score {}",
        options.period,
        settings.subreddits.len(),
        settings.min_score
    );

    for subreddit in &settings.subreddits {
        let posts = match source.top_posts(subreddit, options.period, options.limit).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!("Skipping r/{}: {}", subreddit, e);
                report.failed += 1;
                continue;
            }
        };

        let total = posts.len();
        let (kept, below): (Vec<_>, Vec<_>) = posts
            .into_iter()
            .partition(|post| post.score >= settings.min_score);
        report.skipped += below.len() as u32;

        let mut new_posts = 0;
        for post in kept {
            report.attempted += 1;

            let top_comment = if options.with_comments {
                match source.top_comment(&post.subreddit, &post.id).await {
                    Ok(comment) => comment,
                    Err(e) => {
                        debug!("No top comment for {}: {}", post.id, e);
                        None
                    }
                }
            } else {
                None
            };

            let record = PostRecord::from_reddit(post, top_comment);
            if store.upsert_fetched(&record).await? {
                new_posts += 1;
            }
            report.succeeded += 1;
        }

        info!(
            "r/{}: {} posts returned, {} kept, {} new",
            subreddit,
            total,
            total - below.len(),
            new_posts
        );
    }

    finish(store, report).await
}

pub async fn process_stage<P: LlmProvider>(
    store: &PostStore,
    provider: &P,
    options: &ProcessOptions,
) -> Result<StageReport, CoreError> {
    let mut report = StageReport::start(Stage::Process);

    let records = if options.recategorize {
        store
            .records_in_category(FALLBACK_CATEGORY, options.limit)
            .await?
    } else {
        store.pending_for_process(options.limit).await?
    };
    info!(
        "Analysing {} posts with {}{}",
        records.len(),
        provider.name(),
        if options.recategorize { " (recategorize)" } else { "" }
    );

    for (index, record) in records.iter().enumerate() {
        if index > 0 && !options.request_delay.is_zero() {
            tokio::time::sleep(options.request_delay).await;
        }
        report.attempted += 1;

        match provider.analyze_post(record).await {
            Ok(analysis) => {
                if options.recategorize && analysis.category == FALLBACK_CATEGORY {
                    debug!("{} still has no better category", record.reddit_id);
                    report.skipped += 1;
                    continue;
                }
                store.save_analysis(&record.reddit_id, &analysis).await?;
                debug!("{} -> {}", record.reddit_id, analysis.category);
                report.succeeded += 1;
            }
            Err(e) => {
                warn!("Analysis failed for {}: {}", record.reddit_id, e);
                store
                    .record_failure(&record.reddit_id, &describe_failure(&e))
                    .await?;
                report.failed += 1;
            }
        }
    }

    finish(store, report).await
}

pub async fn push_stage<T: RemoteTable>(
    store: &PostStore,
    remote: &T,
    options: &PushOptions,
) -> Result<StageReport, CoreError> {
    let mut report = StageReport::start(Stage::Push);

    let records = store.pending_for_push(options.all).await?;
    info!("Pushing {} posts to the remote table", records.len());

    for record in &records {
        if record.analysis.is_none() {
            report.skipped += 1;
            continue;
        }
        report.attempted += 1;

        let row = RemoteRow::from(record);
        match upsert(remote, &row).await {
            Ok(outcome) => {
                if store.mark_pushed(&record.reddit_id, outcome.row_id()).await? {
                    report.succeeded += 1;
                } else {
                    report.skipped += 1;
                }
                match outcome {
                    UpsertOutcome::Created(id) => debug!("{} created as row {}", record.reddit_id, id),
                    UpsertOutcome::Updated(id) => debug!("{} updated row {}", record.reddit_id, id),
                }
            }
            Err(e) => {
                warn!("Push failed for {}: {}", record.reddit_id, e);
                store
                    .record_failure(&record.reddit_id, &describe_failure(&e))
                    .await?;
                report.failed += 1;
            }
        }
    }

    finish(store, report).await
}

async fn finish(store: &PostStore, report: StageReport) -> Result<StageReport, CoreError> {
    let report = report.finish();
    store.record_run(&report).await?;
    info!("{}", report);
    Ok(report)
}
