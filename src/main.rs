use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use database::PostStore;
use grepr_core::{parse_daily_time, AppConfig, CoreError, ErrorExt, TimeFilter};
use llm_interface::provider_from_config;
use nocodb_client::{NocoDbClient, RemoteTable};
use pipeline::{
    default_export_path, export_json, fetch_stage, process_stage, push_stage, Cadence,
    FetchOptions, ProcessOptions, PushOptions, ScheduleOptions, Scheduler, StatusSummary,
};
use reddit_client::RedditClient;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "grepr=info,pipeline=info,reddit_client=info,llm_interface=info,nocodb_client=info,database=info";

#[derive(Parser)]
#[command(name = "grepr", version, about = "Reddit personal finance aggregator")]
struct Cli {
    /// Configuration file (defaults to ./grepr.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch top posts from the configured subreddits
    Fetch(FetchArgs),
    /// Analyse fetched posts with the AI provider
    Process(ProcessArgs),
    /// Upsert analysed posts into NocoDB
    Push(PushArgs),
    /// Run fetch, process and push once
    Run {
        #[arg(long, value_parser = parse_period)]
        period: Option<TimeFilter>,
    },
    /// Run the pipeline periodically
    Schedule(ScheduleArgs),
    /// Show record counts, categories, errors and recent runs
    Status {
        /// Also count rows in the NocoDB table
        #[arg(long)]
        remote: bool,
    },
    /// Write every stored post to a JSON file
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long, value_parser = parse_period)]
    period: Option<TimeFilter>,
    /// Posts requested per subreddit
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    no_comments: bool,
}

#[derive(Args)]
struct ProcessArgs {
    #[arg(long)]
    limit: Option<u32>,
    /// Re-analyse posts that ended up in the fallback category
    #[arg(long)]
    recategorize: bool,
}

#[derive(Args)]
struct PushArgs {
    /// Push every analysed post, not only pending ones
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct ScheduleArgs {
    #[arg(long, conflicts_with = "at")]
    interval_hours: Option<u64>,
    /// Daily run time, HH:MM (UTC)
    #[arg(long, value_parser = parse_at)]
    at: Option<String>,
    #[arg(long)]
    run_now: bool,
    #[arg(long)]
    max_cycles: Option<u32>,
}

fn parse_period(raw: &str) -> Result<TimeFilter, String> {
    raw.parse().map_err(|e: CoreError| e.to_string())
}

fn parse_at(raw: &str) -> Result<String, String> {
    parse_daily_time(raw)
        .map(|_| raw.trim().to_string())
        .ok_or_else(|| format!("expected HH:MM, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let e = CoreError::from(e);
            e.log_error();
            bail!("Failed to load configuration: {}", e.user_friendly_message());
        }
    };

    let store = PostStore::open(&config.database.path)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;

    let result = execute(cli.command, &config, &store).await;
    store.close().await;
    result
}

async fn execute(command: Commands, config: &AppConfig, store: &PostStore) -> Result<()> {
    match command {
        Commands::Fetch(args) => {
            let reddit = RedditClient::new(&config.reddit)?;
            let mut options = FetchOptions::manual(&config.pipeline, args.period);
            if let Some(limit) = args.limit {
                options.limit = limit;
            }
            if args.no_comments {
                options.with_comments = false;
            }
            let report = fetch_stage(store, &reddit, &config.pipeline, &options).await?;
            println!("{}", report);
        }

        Commands::Process(args) => {
            let provider = provider_from_config(config)?;
            let options = ProcessOptions {
                limit: args.limit,
                recategorize: args.recategorize,
                request_delay: Duration::from_millis(config.ai.request_delay_ms),
            };
            let report = process_stage(store, &provider, &options).await?;
            println!("{}", report);
        }

        Commands::Push(args) => {
            let remote = nocodb_from_config(config)?;
            let report = push_stage(store, &remote, &PushOptions { all: args.all }).await?;
            println!("{}", report);
        }

        Commands::Run { period } => {
            let scheduler = scheduler_from_config(config, store)?
                .with_fetch_options(FetchOptions::manual(&config.pipeline, period));
            let cycle = scheduler.run_cycle().await;
            for report in &cycle.reports {
                println!("{}", report);
            }
            if !cycle.is_clean() {
                let failed: Vec<String> = cycle.errors.iter().map(|(s, _)| s.to_string()).collect();
                bail!("Stages aborted: {}", failed.join(", "));
            }
        }

        Commands::Schedule(args) => {
            let at = args.at.or_else(|| {
                args.interval_hours
                    .is_none()
                    .then(|| config.schedule.at.clone())
                    .flatten()
            });
            let cadence = match at.as_deref().and_then(parse_daily_time) {
                Some((hour, minute)) => Cadence::DailyAt { hour, minute },
                None => {
                    let hours = args.interval_hours.unwrap_or(config.schedule.interval_hours);
                    if hours == 0 {
                        bail!("--interval-hours must be at least 1");
                    }
                    Cadence::Every(Duration::from_secs(hours * 3600))
                }
            };
            let options = ScheduleOptions {
                cadence,
                run_now: args.run_now || config.schedule.run_on_start,
                max_cycles: args.max_cycles,
            };

            let scheduler = scheduler_from_config(config, store)?;
            tracing::info!("Scheduler started ({:?})", options.cadence);
            let cycles = scheduler.run(&options).await?;
            tracing::info!("Scheduler stopped after {} cycles", cycles);
        }

        Commands::Status { remote } => {
            let mut summary = StatusSummary::collect(store, 10).await?;
            if remote {
                let table = nocodb_from_config(config)?;
                summary = summary.with_remote_rows(table.count().await?);
            }
            print!("{}", summary);
        }

        Commands::Export { output } => {
            let path = output.unwrap_or_else(|| default_export_path(Utc::now()));
            let total = export_json(store, &config.pipeline, &path)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} posts to {}", total, path.display());
        }
    }
    Ok(())
}

fn nocodb_from_config(config: &AppConfig) -> Result<NocoDbClient, CoreError> {
    let credentials = config.require_nocodb()?;
    NocoDbClient::new(&credentials, config.nocodb.timeout_secs)
}

fn scheduler_from_config(
    config: &AppConfig,
    store: &PostStore,
) -> Result<Scheduler<RedditClient, llm_interface::ChatCompletionClient, NocoDbClient>, CoreError> {
    let provider = provider_from_config(config)?;
    let remote = nocodb_from_config(config)?;
    let reddit = RedditClient::new(&config.reddit)?;

    Ok(Scheduler::new(
        store.clone(),
        reddit,
        provider,
        remote,
        config.pipeline.clone(),
        ProcessOptions {
            request_delay: Duration::from_millis(config.ai.request_delay_ms),
            ..ProcessOptions::default()
        },
    ))
}
