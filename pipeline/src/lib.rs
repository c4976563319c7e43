//! Fetch, process and push stages over the local record store, and the
//! scheduler that chains them.

pub mod export;
pub mod report;
pub mod scheduler;
pub mod stages;

pub use export::{default_export_path, export_json, ExportDocument};
pub use report::StatusSummary;
pub use scheduler::{next_daily_run, Cadence, CycleReport, ScheduleOptions, Scheduler};
pub use stages::{fetch_stage, process_stage, push_stage, FetchOptions, ProcessOptions, PushOptions};
