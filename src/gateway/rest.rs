use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Request, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use super::{Filter, FilterOp, Gateway, OrderBy, Table};
use crate::config::Rest;

/// Client for the hosted backend: PostgREST-style row endpoints under
/// `rest/v1/` and the object storage API under `storage/v1/`.
#[derive(Clone)]
pub struct RestGateway {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    pub fn from_settings(rest: &Rest) -> Result<Self> {
        let base_url = Url::parse(rest.url.trim()).context("invalid rest.url")?;
        Self::with_base_url(rest.api_key.clone(), base_url)
    }

    pub fn with_base_url(api_key: String, mut base_url: Url) -> Result<Self> {
        // `Url::join` drops the last path segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("claybook/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn table_url(&self, table: Table) -> Result<Url> {
        self.base_url
            .join(&format!("rest/v1/{}", table.as_str()))
            .context("invalid backend base URL")
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url> {
        self.base_url
            .join(&format!("storage/v1/object/{}/{}", bucket, key))
            .context("invalid backend base URL")
    }

    fn authed(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    pub fn build_query_request(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Request> {
        let mut url = self.table_url(table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for filter in filters {
                pairs.append_pair(filter.field, &encode_filter(filter));
            }
            if let Some(order) = order {
                let dir = if order.ascending { "asc" } else { "desc" };
                pairs.append_pair("order", &format!("{}.{}", order.field, dir));
            }
        }
        self.authed(Method::GET, url)
            .header("Accept", "application/json")
            .build()
            .context("failed to build query request")
    }

    pub fn build_insert_request(&self, table: Table, record: &Value) -> Result<Request> {
        let url = self.table_url(table)?;
        self.authed(Method::POST, url)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(record)
            .build()
            .context("failed to build insert request")
    }

    pub fn build_update_request(&self, table: Table, id: &str, patch: &Value) -> Result<Request> {
        let url = self.row_url(table, id)?;
        self.authed(Method::PATCH, url)
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(patch)
            .build()
            .context("failed to build update request")
    }

    pub fn build_delete_request(&self, table: Table, id: &str) -> Result<Request> {
        let url = self.row_url(table, id)?;
        self.authed(Method::DELETE, url)
            .header("Prefer", "return=representation")
            .build()
            .context("failed to build delete request")
    }

    pub fn build_upload_request(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Request> {
        let url = self.object_url(bucket, key)?;
        self.authed(Method::POST, url)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .build()
            .context("failed to build upload request")
    }

    fn row_url(&self, table: Table, id: &str) -> Result<Url> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        Ok(url)
    }

    async fn execute(&self, request: Request) -> Result<String> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "backend request");
        for (name, value) in request.headers() {
            let lowered = name.as_str().to_lowercase();
            if lowered == "authorization" || lowered == "apikey" {
                debug!("  {}: [REDACTED]", name);
            } else {
                debug!("  {}: {}", name, value.to_str().unwrap_or("[invalid]"));
            }
        }

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach backend")?;
        let status = res.status();
        debug!(%status, "backend response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by backend: {}", body);
            return Err(anyhow!("received 429 from backend: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%method, %url, %status, "backend error: {}", body);
            return Err(anyhow!("backend error {}: {}", status, body));
        }
        res.text().await.context("failed to read backend response")
    }

    async fn execute_rows(&self, request: Request) -> Result<Vec<Value>> {
        let body = self.execute(request).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).context("invalid backend response JSON")
    }
}

/// PostgREST operator syntax for one filter, e.g. `neq.idea` or `is.null`.
pub fn encode_filter(filter: &Filter) -> String {
    match (&filter.value, filter.op) {
        (Value::Null, FilterOp::Eq) => "is.null".to_string(),
        (Value::Null, FilterOp::Neq) => "not.is.null".to_string(),
        (Value::String(s), op) => format!("{}.{}", op.as_str(), s),
        (other, op) => format!("{}.{}", op.as_str(), other),
    }
}

#[async_trait]
impl Gateway for RestGateway {
    #[instrument(skip_all, fields(table = %table))]
    async fn query(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Value>> {
        let request = self.build_query_request(table, filters, order)?;
        self.execute_rows(request).await
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        let request = self.build_insert_request(table, &record)?;
        let mut rows = self.execute_rows(request).await?;
        if rows.is_empty() {
            return Err(anyhow!("backend returned no row for insert into {}", table));
        }
        let row = rows.swap_remove(0);
        info!(id = ?row.get("id"), "inserted row");
        Ok(row)
    }

    #[instrument(skip_all, fields(table = %table, id))]
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<bool> {
        let request = self.build_update_request(table, id, &patch)?;
        Ok(!self.execute_rows(request).await?.is_empty())
    }

    #[instrument(skip_all, fields(table = %table, id))]
    async fn delete_row(&self, table: Table, id: &str) -> Result<bool> {
        let request = self.build_delete_request(table, id)?;
        Ok(!self.execute_rows(request).await?.is_empty())
    }

    #[instrument(skip_all, fields(bucket, key))]
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let size = bytes.len();
        let request = self.build_upload_request(bucket, key, bytes, content_type)?;
        let body = self.execute(request).await?;
        // The storage API echoes `{"Key": "<bucket>/<key>"}`; older deployments
        // return an empty body.
        if let Ok(resp) = serde_json::from_str::<UploadResponse>(&body) {
            debug!(stored = %resp.key, "storage acknowledged upload");
        }
        info!(size, "uploaded object");
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("storage/v1/object/public/{}/{}", bucket, key))
            .context("invalid backend base URL")?;
        Ok(url.to_string())
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}
