pub mod row;

pub use row::RemoteRow;

use grepr_core::{ConfigError, CoreError, NocoDbCredentials, NocoDbError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;


/// A remote table holding one row per Reddit post.
#[allow(async_fn_in_trait)]
pub trait RemoteTable {
    async fn find_by_reddit_id(&self, reddit_id: &str) -> Result<Option<i64>, CoreError>;

    async fn create(&self, row: &RemoteRow) -> Result<i64, CoreError>;

    async fn update(&self, row_id: i64, row: &RemoteRow) -> Result<(), CoreError>;

    async fn count(&self) -> Result<u64, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn row_id(&self) -> i64 {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Creates the row for `row.reddit_id`, or updates it when it already exists.
pub async fn upsert<T: RemoteTable>(table: &T, row: &RemoteRow) -> Result<UpsertOutcome, CoreError> {
    match table.find_by_reddit_id(&row.reddit_id).await? {
        Some(row_id) => {
            table.update(row_id, row).await?;
            debug!("Updated remote row {} for {}", row_id, row.reddit_id);
            Ok(UpsertOutcome::Updated(row_id))
        }
        None => {
            let row_id = table.create(row).await?;
            debug!("Created remote row {} for {}", row_id, row.reddit_id);
            Ok(UpsertOutcome::Created(row_id))
        }
    }
}

#[derive(Deserialize)]
struct RowId {
    #[serde(rename = "Id", alias = "id")]
    id: i64,
}

#[derive(Deserialize)]
struct RecordList {
    #[serde(default)]
    list: Vec<RowId>,
}

#[derive(Deserialize)]
struct RecordCount {
    count: u64,
}

#[derive(Serialize)]
struct RowWithId<'a> {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(flatten)]
    row: &'a RemoteRow,
}

/// NocoDB v2 REST client bound to one table.
#[derive(Debug, Clone)]
pub struct NocoDbClient {
    http_client: Client,
    records_url: Url,
    count_url: Url,
    api_token: String,
    table_id: String,
}

impl NocoDbClient {
    pub fn new(credentials: &NocoDbCredentials, timeout_secs: u64) -> Result<Self, CoreError> {
        let invalid_url = |value: String| ConfigError::InvalidValue {
            field: "nocodb.base_url".to_string(),
            value,
        };

        let base = Url::parse(&format!("{}/", credentials.base_url.trim_end_matches('/')))
            .map_err(|e| invalid_url(format!("{} ({})", credentials.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(invalid_url(credentials.base_url.clone()).into());
        }

        let records_url = base
            .join(&format!("api/v2/tables/{}/records", credentials.table_id))
            .map_err(|e| invalid_url(e.to_string()))?;
        let count_url = base
            .join(&format!("api/v2/tables/{}/records/count", credentials.table_id))
            .map_err(|e| invalid_url(e.to_string()))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        info!("NocoDB table {} at {}", credentials.table_id, base);
        Ok(Self {
            http_client,
            records_url,
            count_url,
            api_token: credentials.api_token.clone(),
            table_id: credentials.table_id.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CoreError> {
        let response = request.header("xc-token", &self.api_token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                debug!("Could not read NocoDB error body: {}", e);
                String::new()
            });
            return Err(self.error_for_status(status, body).into());
        }

        response.json::<T>().await.map_err(|e| {
            NocoDbError::InvalidResponse {
                details: e.to_string(),
            }
            .into()
        })
    }

    fn error_for_status(&self, status: StatusCode, body: String) -> NocoDbError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NocoDbError::Unauthorized,
            StatusCode::NOT_FOUND => NocoDbError::TableNotFound {
                table_id: self.table_id.clone(),
            },
            _ => NocoDbError::RequestFailed {
                status_code: status.as_u16(),
                body: body.chars().take(300).collect(),
            },
        }
    }
}

impl RemoteTable for NocoDbClient {
    async fn find_by_reddit_id(&self, reddit_id: &str) -> Result<Option<i64>, CoreError> {
        let filter = format!("(reddit_id,eq,{})", reddit_id);
        let request = self
            .http_client
            .get(self.records_url.clone())
            .query(&[("where", filter.as_str()), ("limit", "1")]);

        let found: RecordList = self.send(request).await?;
        Ok(found.list.first().map(|row| row.id))
    }

    async fn create(&self, row: &RemoteRow) -> Result<i64, CoreError> {
        let request = self.http_client.post(self.records_url.clone()).json(row);
        let created: RowId = self.send(request).await?;
        Ok(created.id)
    }

    async fn update(&self, row_id: i64, row: &RemoteRow) -> Result<(), CoreError> {
        let request = self
            .http_client
            .patch(self.records_url.clone())
            .json(&RowWithId { id: row_id, row });
        let _: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, CoreError> {
        let request = self.http_client.get(self.count_url.clone());
        let counted: RecordCount = self.send(request).await?;
        Ok(counted.count)
    }
}
