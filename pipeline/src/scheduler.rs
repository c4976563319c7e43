use crate::report::StatusSummary;
use crate::stages::{fetch_stage, process_stage, push_stage, FetchOptions, ProcessOptions, PushOptions};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use database::PostStore;
use grepr_core::{CoreError, ErrorExt, PipelineSettings, Stage, StageReport};
use llm_interface::LlmProvider;
use nocodb_client::RemoteTable;
use reddit_client::PostSource;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    /// Once a day at `hour:minute` UTC.
    DailyAt { hour: u32, minute: u32 },
}

impl Cadence {
    /// Time to wait from `now` until the next cycle.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            Cadence::Every(interval) => interval,
            Cadence::DailyAt { hour, minute } => (next_daily_run(now, hour, minute) - now)
                .to_std()
                .unwrap_or_default(),
        }
    }
}

/// Next instant strictly after `now` whose UTC wall clock reads `hour:minute`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOptions {
    pub cadence: Cadence,
    /// Run a cycle immediately instead of waiting for the first tick.
    pub run_now: bool,
    pub max_cycles: Option<u32>,
}

/// Outcome of one fetch -> process -> push cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub reports: Vec<StageReport>,
    pub errors: Vec<(Stage, String)>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, stage: Stage, result: Result<StageReport, CoreError>) {
        match result {
            Ok(report) => self.reports.push(report),
            Err(e) => {
                e.log_error();
                error!("{} stage aborted: {}", stage, e.user_friendly_message());
                self.errors.push((stage, e.to_string()));
            }
        }
    }
}

pub struct Scheduler<S, P, T> {
    store: PostStore,
    source: S,
    provider: P,
    remote: T,
    settings: PipelineSettings,
    fetch: FetchOptions,
    process: ProcessOptions,
    push: PushOptions,
}

impl<S, P, T> Scheduler<S, P, T>
where
    S: PostSource,
    P: LlmProvider,
    T: RemoteTable,
{
    pub fn new(
        store: PostStore,
        source: S,
        provider: P,
        remote: T,
        settings: PipelineSettings,
        process: ProcessOptions,
    ) -> Self {
        Self {
            fetch: FetchOptions::scheduled(&settings),
            push: PushOptions::default(),
            store,
            source,
            provider,
            remote,
            settings,
            process,
        }
    }

    pub fn with_fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    /// Runs fetch, process and push in order. A stage that aborts is logged
    /// and the following stages still run.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut cycle = CycleReport::default();

        let fetched = fetch_stage(&self.store, &self.source, &self.settings, &self.fetch).await;
        cycle.record(Stage::Fetch, fetched);

        let processed = process_stage(&self.store, &self.provider, &self.process).await;
        cycle.record(Stage::Process, processed);

        let pushed = push_stage(&self.store, &self.remote, &self.push).await;
        cycle.record(Stage::Push, pushed);

        cycle
    }

    /// Loops until Ctrl-C or until `max_cycles` cycles have run.
    /// Returns the number of cycles completed.
    pub async fn run(&self, options: &ScheduleOptions) -> Result<u32, CoreError> {
        let mut cycles = 0u32;
        let mut run_next_now = options.run_now;

        loop {
            if options.max_cycles.is_some_and(|max| cycles >= max) {
                info!("Reached {} cycles, stopping scheduler", cycles);
                break;
            }

            if !run_next_now {
                let delay = options.cadence.delay_from(Utc::now());
                info!("Next cycle in {}", format_delay(delay));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping scheduler");
                        break;
                    }
                }
            }
            run_next_now = false;

            cycles += 1;
            info!("Starting cycle {}", cycles);
            let cycle = self.run_cycle().await;
            self.log_cycle(cycles, &cycle).await;
        }

        Ok(cycles)
    }

    async fn log_cycle(&self, number: u32, cycle: &CycleReport) {
        for report in &cycle.reports {
            info!("cycle {} | {}", number, report);
        }
        for (stage, message) in &cycle.errors {
            warn!("cycle {} | {} failed: {}", number, stage, message);
        }
        match StatusSummary::collect(&self.store, 0).await {
            Ok(summary) => info!("cycle {} | {}", number, summary.counts_line()),
            Err(e) => warn!("Could not read status counts: {}", e),
        }
    }
}

fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", delay.as_millis())
    }
}
