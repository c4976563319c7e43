use crate::categories::{CategoryDef, CategorySet};
use crate::error::ConfigError;
use crate::types::TimeFilter;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "grepr.toml";
pub const DEFAULT_USER_AGENT: &str = "grepr:v1.0 (personal finance aggregator)";

/// Checks the Reddit naming rule: 3 to 21 ASCII letters, digits or underscores.
pub fn is_valid_subreddit_name(name: &str) -> bool {
    (3..=21).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reddit: RedditConfig,
    pub ai: AiConfig,
    pub nocodb: NocoDbConfig,
    pub pipeline: PipelineSettings,
    pub database: DatabaseConfig,
    pub schedule: ScheduleConfig,
    pub categories: Vec<CategoryDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub selftext_max_chars: usize,
    pub comment_max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            selftext_max_chars: 2000,
            comment_max_chars: 1000,
            timeout_secs: 30,
        }
    }
}

impl RedditConfig {
    /// Both halves of the app credentials are present.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.client_id, &self.client_secret),
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    Groq,
    #[serde(alias = "deep-seek")]
    DeepSeek,
    OpenAi,
    Local,
}

impl AiProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProviderKind::Groq => "groq",
            AiProviderKind::DeepSeek => "deepseek",
            AiProviderKind::OpenAi => "openai",
            AiProviderKind::Local => "local",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            AiProviderKind::Groq => "https://api.groq.com/openai/v1",
            AiProviderKind::DeepSeek => "https://api.deepseek.com",
            AiProviderKind::OpenAi => "https://api.openai.com/v1",
            AiProviderKind::Local => "http://localhost:1234/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AiProviderKind::Groq => "llama-3.3-70b-versatile",
            AiProviderKind::DeepSeek => "deepseek-chat",
            AiProviderKind::OpenAi => "gpt-4o-mini",
            AiProviderKind::Local => "deepseek",
        }
    }

    /// Environment variable holding the provider's API key, if it needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            AiProviderKind::Groq => Some("GROQ_API_KEY"),
            AiProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            AiProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            AiProviderKind::Local => None,
        }
    }
}

impl fmt::Display for AiProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(AiProviderKind::Groq),
            "deepseek" | "deep-seek" => Ok(AiProviderKind::DeepSeek),
            "openai" => Ok(AiProviderKind::OpenAi),
            "local" | "lmstudio" => Ok(AiProviderKind::Local),
            other => Err(ConfigError::InvalidValue {
                field: "ai.provider".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Pause between two AI calls within one process run.
    pub request_delay_ms: u64,
    pub prompt_max_chars: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::Groq,
            api_key: None,
            base_url: None,
            model: None,
            temperature: 0.3,
            max_tokens: 800,
            timeout_secs: 60,
            request_delay_ms: 1000,
            prompt_max_chars: 4000,
        }
    }
}

impl AiConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NocoDbConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub table_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NocoDbConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: None,
            table_id: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub subreddits: Vec<String>,
    pub min_score: i64,
    pub posts_per_subreddit: u32,
    /// Window used by a manual `fetch` without `--period`.
    pub time_filter: TimeFilter,
    /// Window used by scheduled runs.
    pub scheduled_time_filter: TimeFilter,
    pub fetch_comments: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            subreddits: vec![
                "vosfinances".to_string(),
                "vossous".to_string(),
                "Bogleheads".to_string(),
                "eupersonalfinance".to_string(),
                "ETFs_Europe".to_string(),
            ],
            min_score: 10,
            posts_per_subreddit: 100,
            time_filter: TimeFilter::All,
            scheduled_time_filter: TimeFilter::Day,
            fetch_comments: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/grepr.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: u64,
    /// Daily wall-clock time (UTC, `HH:MM`); takes precedence over the interval.
    pub at: Option<String>,
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            at: None,
            run_on_start: true,
        }
    }
}

/// Credentials the push stage cannot run without.
#[derive(Debug, Clone, PartialEq)]
pub struct NocoDbCredentials {
    pub base_url: String,
    pub api_token: String,
    pub table_id: String,
}

impl AppConfig {
    /// Loads the TOML file (when present), then applies environment overrides
    /// and validation. A missing file is only an error when it was asked for
    /// explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    info!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        info!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies credential and path overrides from a variable lookup
    /// (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("REDDIT_CLIENT_ID") {
            self.reddit.client_id = Some(v);
        }
        if let Some(v) = get("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = Some(v);
        }
        if let Some(v) = get("REDDIT_USER_AGENT") {
            self.reddit.user_agent = v;
        }

        if let Some(v) = get("AI_PROVIDER") {
            self.ai.provider = v.parse()?;
        }
        if let Some(var) = self.ai.provider.api_key_var() {
            if let Some(v) = get(var) {
                self.ai.api_key = Some(v);
            }
        }
        if self.ai.provider == AiProviderKind::Local {
            if let Some(v) = get("LOCAL_BASE_URL") {
                self.ai.base_url = Some(v);
            }
            if let Some(v) = get("LOCAL_MODEL") {
                self.ai.model = Some(v);
            }
        }

        if let Some(v) = get("NOCODB_BASE_URL") {
            self.nocodb.base_url = v;
        }
        if let Some(v) = get("NOCODB_API_TOKEN") {
            self.nocodb.api_token = Some(v);
        }
        if let Some(v) = get("NOCODB_TABLE_ID") {
            self.nocodb.table_id = Some(v);
        }

        if let Some(v) = get("GREPR_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Drops invalid subreddit names and rejects settings no stage can run with.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let (valid, invalid): (Vec<String>, Vec<String>) = self
            .pipeline
            .subreddits
            .drain(..)
            .partition(|s| is_valid_subreddit_name(s));
        if !invalid.is_empty() {
            warn!("Invalid subreddit names removed: {:?}", invalid);
        }
        if valid.is_empty() {
            return Err(ConfigError::MissingField {
                field: "pipeline.subreddits".to_string(),
            });
        }
        self.pipeline.subreddits = valid;

        if self.pipeline.posts_per_subreddit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.posts_per_subreddit".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(at) = &self.schedule.at {
            if parse_daily_time(at).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "schedule.at".to_string(),
                    value: at.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn category_set(&self) -> CategorySet {
        if self.categories.is_empty() {
            CategorySet::default()
        } else {
            CategorySet::new(self.categories.clone())
        }
    }

    /// The AI provider can be reached with what is configured.
    pub fn require_ai(&self) -> Result<(), ConfigError> {
        match self.ai.provider.api_key_var() {
            Some(var) if self.ai.api_key.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::MissingEnvironmentVariable {
                    var_name: var.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn require_nocodb(&self) -> Result<NocoDbCredentials, ConfigError> {
        let api_token = self
            .nocodb
            .api_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "NOCODB_API_TOKEN".to_string(),
            })?;
        let table_id = self
            .nocodb
            .table_id
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: "NOCODB_TABLE_ID".to_string(),
            })?;
        Ok(NocoDbCredentials {
            base_url: self.nocodb.base_url.trim_end_matches('/').to_string(),
            api_token,
            table_id,
        })
    }
}

/// Parses `HH:MM` into hours and minutes.
pub fn parse_daily_time(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}
