use database::PostStore;
use grepr_core::{
    CoreError, LlmError, NocoDbError, PipelineSettings, PostAnalysis, PostRecord, PostStatus, RedditApiError,
    RedditPost, Stage, TimeFilter, TopComment,
};
use llm_interface::LlmProvider;
use nocodb_client::{RemoteRow, RemoteTable};
use pipeline::{
    fetch_stage, process_stage, push_stage, Cadence, FetchOptions, ProcessOptions, PushOptions,
    ScheduleOptions, Scheduler,
};
use reddit_client::PostSource;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

struct TestStore {
    store: PostStore,
    path: PathBuf,
}

impl Drop for TestStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn test_store() -> TestStore {
    let path = std::env::temp_dir().join(format!("test_grepr_pipeline_{}.db", uuid::Uuid::new_v4()));
    let store = PostStore::open(&path).await.expect("Failed to open test store");
    TestStore { store, path }
}

fn post(subreddit: &str, id: &str, score: i64) -> RedditPost {
    RedditPost {
        id: id.to_string(),
        subreddit: subreddit.to_string(),
        title: format!("Post {}", id),
        selftext: "Texte".to_string(),
        author: "someone".to_string(),
        score,
        num_comments: 2,
        upvote_ratio: 0.9,
        permalink: format!("/r/{}/comments/{}/post/", subreddit, id),
        created_utc: 1_700_000_000,
    }
}

fn settings(subreddits: &[&str]) -> PipelineSettings {
    PipelineSettings {
        subreddits: subreddits.iter().map(|s| s.to_string()).collect(),
        min_score: 10,
        ..PipelineSettings::default()
    }
}

fn fetch_options() -> FetchOptions {
    FetchOptions {
        period: TimeFilter::Week,
        limit: 100,
        with_comments: true,
    }
}

#[derive(Default)]
struct FakeSource {
    posts: Mutex<HashMap<String, Vec<RedditPost>>>,
    unavailable: HashSet<String>,
}

impl FakeSource {
    fn with(posts: Vec<RedditPost>) -> Self {
        let source = Self::default();
        source.replace(posts);
        source
    }

    fn replace(&self, posts: Vec<RedditPost>) {
        let mut map: HashMap<String, Vec<RedditPost>> = HashMap::new();
        for p in posts {
            map.entry(p.subreddit.clone()).or_default().push(p);
        }
        *self.posts.lock().unwrap() = map;
    }
}

impl PostSource for FakeSource {
    async fn top_posts(
        &self,
        subreddit: &str,
        _period: TimeFilter,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError> {
        if self.unavailable.contains(subreddit) {
            return Err(RedditApiError::Forbidden {
                resource: subreddit.to_string(),
            }
            .into());
        }
        let posts = self.posts.lock().unwrap();
        Ok(posts
            .get(subreddit)
            .map(|p| p.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn top_comment(&self, _subreddit: &str, post_id: &str) -> Result<Option<TopComment>, CoreError> {
        if post_id.ends_with("nocomment") {
            return Err(RedditApiError::RequestTimeout.into());
        }
        Ok(Some(TopComment {
            id: format!("c_{}", post_id),
            body: "Top comment".to_string(),
            score: 7,
            author: "commenter".to_string(),
        }))
    }
}

struct FakeProvider {
    category: Mutex<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn new(category: &str) -> Self {
        Self {
            category: Mutex::new(category.to_string()),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    fn answer(&self, category: &str) {
        *self.category.lock().unwrap() = category.to_string();
    }
}

impl LlmProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze_post(&self, post: &PostRecord) -> Result<PostAnalysis, CoreError> {
        self.calls.lock().unwrap().push(post.reddit_id.clone());
        if self.failing.contains(&post.reddit_id) {
            return Err(LlmError::ServiceUnavailable {
                provider: "fake".to_string(),
            }
            .into());
        }
        Ok(PostAnalysis {
            category: self.category.lock().unwrap().clone(),
            summary: format!("Summary of {}", post.title),
            key_advice: vec!["Advice".to_string()],
            tags: vec!["tag".to_string()],
            consensus: None,
        })
    }
}

#[derive(Default)]
struct FakeRemote {
    rows: Mutex<BTreeMap<i64, RemoteRow>>,
    creates: Mutex<u32>,
    updates: Mutex<u32>,
    failing: HashSet<String>,
}

impl FakeRemote {
    fn failing_on(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl RemoteTable for FakeRemote {
    async fn find_by_reddit_id(&self, reddit_id: &str) -> Result<Option<i64>, CoreError> {
        if self.failing.contains(reddit_id) {
            return Err(NocoDbError::RequestFailed {
                status_code: 502,
                body: "Bad Gateway".to_string(),
            }
            .into());
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|(_, row)| row.reddit_id == reddit_id)
            .map(|(id, _)| *id))
    }

    async fn create(&self, row: &RemoteRow) -> Result<i64, CoreError> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.keys().last().copied().unwrap_or(0) + 1;
        rows.insert(id, row.clone());
        *self.creates.lock().unwrap() += 1;
        Ok(id)
    }

    async fn update(&self, row_id: i64, row: &RemoteRow) -> Result<(), CoreError> {
        self.rows.lock().unwrap().insert(row_id, row.clone());
        *self.updates.lock().unwrap() += 1;
        Ok(())
    }

    async fn count(&self) -> Result<u64, CoreError> {
        Ok(self.rows.lock().unwrap().len() as u64)
    }
}

#[tokio::test]
async fn test_fetch_filters_by_score_and_keeps_going_after_failing_subreddit() {
    let db = test_store().await;
    let mut source = FakeSource::with(vec![
        post("vosfinances", "a1", 50),
        post("vosfinances", "a2", 3),
        post("vosfinances", "a3_nocomment", 12),
        post("Bogleheads", "b1", 200),
    ]);
    source.unavailable.insert("vossous".to_string());

    let report = fetch_stage(
        &db.store,
        &source,
        &settings(&["vossous", "vosfinances", "Bogleheads"]),
        &fetch_options(),
    )
    .await
    .unwrap();

    assert_eq!(report.stage, Stage::Fetch);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);

    let a1 = db.store.get("a1").await.unwrap().unwrap();
    assert_eq!(a1.status, PostStatus::Fetched);
    assert!(a1.top_comment.is_some());
    let a3 = db.store.get("a3_nocomment").await.unwrap().unwrap();
    assert!(a3.top_comment.is_none());
    assert!(db.store.get("a2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_process_failure_does_not_block_other_posts() {
    let db = test_store().await;
    let source = FakeSource::with(vec![
        post("vosfinances", "a1", 50),
        post("vosfinances", "a2", 40),
        post("vosfinances", "a3", 30),
    ]);
    fetch_stage(&db.store, &source, &settings(&["vosfinances"]), &fetch_options())
        .await
        .unwrap();

    let provider = FakeProvider::new("ETF").failing_on(&["a2"]);
    let report = process_stage(&db.store, &provider, &ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(provider.calls.lock().unwrap().len(), 3);

    let failed = db.store.get("a2").await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Fetched);
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("[LLM] LLM error: Provider service unavailable: fake")
    );

    for id in ["a1", "a3"] {
        let record = db.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, PostStatus::Processed);
        assert_eq!(record.analysis.unwrap().category, "ETF");
    }

    // The failed record is retried on the next invocation.
    let retry = FakeProvider::new("Budget");
    let report = process_stage(&db.store, &retry, &ProcessOptions::default())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(*retry.calls.lock().unwrap(), vec!["a2".to_string()]);
}

#[tokio::test]
async fn test_push_failure_does_not_block_other_posts() {
    let db = test_store().await;
    let source = FakeSource::with(vec![
        post("vosfinances", "a1", 50),
        post("vosfinances", "a2", 40),
        post("vosfinances", "a3", 30),
    ]);
    fetch_stage(&db.store, &source, &settings(&["vosfinances"]), &fetch_options())
        .await
        .unwrap();
    process_stage(&db.store, &FakeProvider::new("ETF"), &ProcessOptions::default())
        .await
        .unwrap();

    let remote = FakeRemote::failing_on(&["a2"]);
    let report = push_stage(&db.store, &remote, &PushOptions::default()).await.unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(remote.count().await.unwrap(), 2);

    let failed = db.store.get("a2").await.unwrap().unwrap();
    assert_eq!(failed.status, PostStatus::Processed);
    assert!(failed.remote_id.is_none());
    assert_eq!(failed.attempts, 1);
    assert_eq!(
        failed.last_error.as_deref(),
        Some("[NOCODB] NocoDB error: Request failed with status 502: Bad Gateway")
    );
    for id in ["a1", "a3"] {
        let record = db.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, PostStatus::Pushed);
    }

    // Only the failed record is pending on the next push.
    let retry = FakeRemote::default();
    let report = push_stage(&db.store, &retry, &PushOptions::default()).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(
        db.store.get("a2").await.unwrap().unwrap().status,
        PostStatus::Pushed
    );
}

#[tokio::test]
async fn test_repush_does_not_duplicate_remote_rows() {
    let db = test_store().await;
    let source = FakeSource::with(vec![post("vosfinances", "a1", 50), post("Bogleheads", "b1", 60)]);
    let subs = settings(&["vosfinances", "Bogleheads"]);
    fetch_stage(&db.store, &source, &subs, &fetch_options()).await.unwrap();
    process_stage(&db.store, &FakeProvider::new("ETF"), &ProcessOptions::default())
        .await
        .unwrap();

    let remote = FakeRemote::default();
    let first = push_stage(&db.store, &remote, &PushOptions::default()).await.unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(remote.count().await.unwrap(), 2);

    // Nothing pending: a plain push is a no-op.
    let second = push_stage(&db.store, &remote, &PushOptions::default()).await.unwrap();
    assert_eq!(second.attempted, 0);

    // Forcing a full re-push updates rows in place.
    let forced = push_stage(&db.store, &remote, &PushOptions { all: true }).await.unwrap();
    assert_eq!(forced.succeeded, 2);
    assert_eq!(remote.count().await.unwrap(), 2);
    assert_eq!(*remote.creates.lock().unwrap(), 2);
    assert_eq!(*remote.updates.lock().unwrap(), 2);

    let a1 = db.store.get("a1").await.unwrap().unwrap();
    assert_eq!(a1.status, PostStatus::Pushed);
    assert!(a1.remote_id.is_some());
}

#[tokio::test]
async fn test_status_never_regresses_across_stages() {
    let db = test_store().await;
    let subs = settings(&["vosfinances"]);
    let source = FakeSource::with(vec![post("vosfinances", "a1", 50)]);
    fetch_stage(&db.store, &source, &subs, &fetch_options()).await.unwrap();
    process_stage(&db.store, &FakeProvider::new("Epargne"), &ProcessOptions::default())
        .await
        .unwrap();
    push_stage(&db.store, &FakeRemote::default(), &PushOptions::default())
        .await
        .unwrap();

    // The post shows up again with a higher score.
    source.replace(vec![post("vosfinances", "a1", 900)]);
    fetch_stage(&db.store, &source, &subs, &fetch_options()).await.unwrap();

    let record = db.store.get("a1").await.unwrap().unwrap();
    assert_eq!(record.status, PostStatus::Pushed);
    assert_eq!(record.score, 900);
    assert_eq!(record.analysis.unwrap().category, "Epargne");

    // Nothing left to process.
    let report = process_stage(&db.store, &FakeProvider::new("ETF"), &ProcessOptions::default())
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_recategorize_flags_pushed_records_for_resync() {
    let db = test_store().await;
    let subs = settings(&["vosfinances"]);
    let source = FakeSource::with(vec![post("vosfinances", "a1", 50), post("vosfinances", "a2", 40)]);
    fetch_stage(&db.store, &source, &subs, &fetch_options()).await.unwrap();

    let provider = FakeProvider::new("Autre");
    process_stage(&db.store, &provider, &ProcessOptions::default())
        .await
        .unwrap();
    let remote = FakeRemote::default();
    push_stage(&db.store, &remote, &PushOptions::default()).await.unwrap();

    provider.answer("Actions");
    let options = ProcessOptions {
        recategorize: true,
        limit: Some(1),
        ..ProcessOptions::default()
    };
    let report = process_stage(&db.store, &provider, &options).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let pushed = push_stage(&db.store, &remote, &PushOptions::default()).await.unwrap();
    assert_eq!(pushed.succeeded, 1);
    assert_eq!(remote.count().await.unwrap(), 2);
    assert_eq!(*remote.updates.lock().unwrap(), 1);

    let categories: Vec<Option<String>> = remote
        .rows
        .lock()
        .unwrap()
        .values()
        .map(|row| row.category.clone())
        .collect();
    assert!(categories.contains(&Some("Actions".to_string())));
    assert!(categories.contains(&Some("Autre".to_string())));
}

#[tokio::test]
async fn test_scheduler_runs_requested_cycles() {
    let db = test_store().await;
    let subs = settings(&["vosfinances"]);
    let source = FakeSource::with(vec![post("vosfinances", "a1", 50)]);
    let remote = FakeRemote::default();

    let scheduler = Scheduler::new(
        db.store.clone(),
        source,
        FakeProvider::new("ETF"),
        remote,
        subs.clone(),
        ProcessOptions::default(),
    )
    .with_fetch_options(FetchOptions::scheduled(&subs));

    let cycle = scheduler.run_cycle().await;
    assert!(cycle.is_clean());
    assert_eq!(cycle.reports.len(), 3);
    assert_eq!(
        db.store.get("a1").await.unwrap().unwrap().status,
        PostStatus::Pushed
    );

    let cycles = scheduler
        .run(&ScheduleOptions {
            cadence: Cadence::Every(Duration::from_millis(10)),
            run_now: true,
            max_cycles: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(cycles, 2);

    // One run log entry per stage per cycle.
    assert_eq!(db.store.recent_runs(100).await.unwrap().len(), 9);
}
