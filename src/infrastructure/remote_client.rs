use crate::domain::day_record::is_sentinel_day;
use crate::infrastructure::config::RemoteConfig;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use url::Url;

const DAY_RECORDS_TABLE: &str = "day_records";
const SELECT_COLUMNS: &str = "day,slots,updated_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub user_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDayRow {
    pub day: String,
    pub payload: Value,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RemoteDayClient: Send + Sync {
    async fn upsert_day(
        &self,
        identity: &RemoteIdentity,
        day: &str,
        payload: &Value,
    ) -> Result<(), InfraError>;

    async fn fetch_day(
        &self,
        identity: &RemoteIdentity,
        day: &str,
    ) -> Result<Option<RemoteDayRow>, InfraError>;

    async fn delete_day(&self, identity: &RemoteIdentity, day: &str) -> Result<(), InfraError>;

    async fn list_days_after(
        &self,
        identity: &RemoteIdentity,
        after: &str,
    ) -> Result<Vec<RemoteDayRow>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestRemoteDayClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, serde::Serialize)]
struct UpsertRow<'a> {
    user_id: &'a str,
    day: &'a str,
    slots: &'a Value,
    updated_at: String,
}

#[derive(Debug, serde::Deserialize)]
struct RowResponse {
    day: String,
    #[serde(default)]
    slots: Value,
    updated_at: Option<String>,
}

impl RowResponse {
    fn into_row(self) -> RemoteDayRow {
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));
        let slots = if self.slots.is_null() {
            serde_json::json!({})
        } else {
            self.slots
        };
        RemoteDayRow {
            day: self.day,
            payload: serde_json::json!({ "slots": slots }),
            updated_at,
        }
    }
}

impl ReqwestRemoteDayClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn ensure_identity(identity: &RemoteIdentity) -> Result<(), InfraError> {
        if identity.user_id.trim().is_empty() || identity.access_token.trim().is_empty() {
            return Err(InfraError::Remote("remote identity must not be empty".to_string()));
        }
        Ok(())
    }

    fn http_error(operation: &str, status: StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("remote {operation} failed with status {}", status.as_u16())
        } else {
            format!(
                "remote {operation} failed with status {}; body={body}",
                status.as_u16()
            )
        };
        InfraError::Remote(message)
    }

    fn table_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Remote("remote base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push(DAY_RECORDS_TABLE);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder, identity: &RemoteIdentity) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&identity.access_token)
    }

    async fn read_body(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<(StatusCode, String), InfraError> {
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Remote(format!("network error while reading {operation} response: {error}"))
        })?;
        Ok((status, body))
    }

    async fn select(
        &self,
        identity: &RemoteIdentity,
        filters: &[(&str, String)],
    ) -> Result<Vec<RemoteDayRow>, InfraError> {
        let mut query = vec![("select", SELECT_COLUMNS.to_string())];
        query.push(("user_id", format!("eq.{}", identity.user_id)));
        query.extend(filters.iter().map(|(key, value)| (*key, value.clone())));

        let request = self.client.get(self.table_endpoint()?).query(&query);
        let response = self
            .authorize(request, identity)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while fetching day: {error}")))?;
        let (status, body) = Self::read_body("fetch", response).await?;
        if !status.is_success() {
            return Err(Self::http_error("fetch", status, &body));
        }

        let rows: Vec<RowResponse> = serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid day rows payload: {error}; body={body}"))
        })?;
        Ok(rows.into_iter().map(RowResponse::into_row).collect())
    }
}

#[async_trait]
impl RemoteDayClient for ReqwestRemoteDayClient {
    async fn upsert_day(
        &self,
        identity: &RemoteIdentity,
        day: &str,
        payload: &Value,
    ) -> Result<(), InfraError> {
        Self::ensure_identity(identity)?;
        let empty = serde_json::json!({});
        let row = UpsertRow {
            user_id: &identity.user_id,
            day,
            slots: payload.get("slots").unwrap_or(&empty),
            updated_at: Utc::now().to_rfc3339(),
        };

        let request = self
            .client
            .post(self.table_endpoint()?)
            .query(&[("on_conflict", "user_id,day")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        let response = self
            .authorize(request, identity)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while upserting day: {error}")))?;
        let (status, body) = Self::read_body("upsert", response).await?;
        if !status.is_success() {
            return Err(Self::http_error("upsert", status, &body));
        }
        Ok(())
    }

    async fn fetch_day(
        &self,
        identity: &RemoteIdentity,
        day: &str,
    ) -> Result<Option<RemoteDayRow>, InfraError> {
        Self::ensure_identity(identity)?;
        let rows = self
            .select(identity, &[("day", format!("eq.{day}")), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete_day(&self, identity: &RemoteIdentity, day: &str) -> Result<(), InfraError> {
        Self::ensure_identity(identity)?;
        let request = self.client.delete(self.table_endpoint()?).query(&[
            ("user_id", format!("eq.{}", identity.user_id)),
            ("day", format!("eq.{day}")),
        ]);
        let response = self
            .authorize(request, identity)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while deleting day: {error}")))?;
        let (status, body) = Self::read_body("delete", response).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !status.is_success() {
            return Err(Self::http_error("delete", status, &body));
        }
        Ok(())
    }

    async fn list_days_after(
        &self,
        identity: &RemoteIdentity,
        after: &str,
    ) -> Result<Vec<RemoteDayRow>, InfraError> {
        Self::ensure_identity(identity)?;
        let rows = self
            .select(
                identity,
                &[("day", format!("gt.{after}")), ("order", "day.asc".to_string())],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| !is_sentinel_day(&row.day))
            .collect())
    }
}
