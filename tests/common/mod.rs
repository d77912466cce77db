#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use claybook::gateway::{Filter, Gateway, OrderBy, SqliteGateway, Table};
use tempfile::TempDir;

pub async fn setup_gateway() -> (SqliteGateway, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let gw = SqliteGateway::connect("sqlite::memory:", td.path().join("objects"), None)
        .await
        .unwrap();
    (gw, td)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(Table),
    Insert(Table),
    Update(Table, String, Value),
    Delete(Table, String),
    Upload(String, String, String),
}

/// Wraps a real gateway, records every call and fails the operations it is
/// told to fail.
#[derive(Clone)]
pub struct RecordingGateway {
    inner: SqliteGateway,
    calls: Arc<Mutex<Vec<Call>>>,
    /// Number of updates allowed to succeed before every later one fails.
    updates_before_failure: Arc<Mutex<Option<usize>>>,
    fail_uploads: bool,
    fail_inserts: bool,
}

impl RecordingGateway {
    pub fn new(inner: SqliteGateway) -> Self {
        Self {
            inner,
            calls: Arc::default(),
            updates_before_failure: Arc::default(),
            fail_uploads: false,
            fail_inserts: false,
        }
    }

    pub async fn fail_updates_after(&self, n: usize) {
        *self.updates_before_failure.lock().await = Some(n);
    }

    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn updates(&self) -> Vec<(String, Value)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(_, id, patch) => Some((id, patch)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn query(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Value>> {
        self.calls.lock().await.push(Call::Query(table));
        self.inner.query(table, filters, order).await
    }

    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        self.calls.lock().await.push(Call::Insert(table));
        if self.fail_inserts {
            return Err(anyhow!("backend unavailable"));
        }
        self.inner.insert(table, record).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<bool> {
        self.calls
            .lock()
            .await
            .push(Call::Update(table, id.to_string(), patch.clone()));
        {
            let mut budget = self.updates_before_failure.lock().await;
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(anyhow!("connection reset"));
                }
                *remaining -= 1;
            }
        }
        self.inner.update(table, id, patch).await
    }

    async fn delete_row(&self, table: Table, id: &str) -> Result<bool> {
        self.calls
            .lock()
            .await
            .push(Call::Delete(table, id.to_string()));
        self.inner.delete_row(table, id).await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        self.calls.lock().await.push(Call::Upload(
            bucket.to_string(),
            key.to_string(),
            content_type.to_string(),
        ));
        if self.fail_uploads {
            return Err(anyhow!("bucket is read-only"));
        }
        self.inner
            .upload_object(bucket, key, bytes, content_type)
            .await
    }

    fn public_url(&self, bucket: &str, key: &str) -> Result<String> {
        self.inner.public_url(bucket, key)
    }
}
