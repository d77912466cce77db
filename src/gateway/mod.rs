//! Persistence gateway: the hosted row store plus object storage that the
//! engine writes through.
//!
//! Two implementations live here:
//! - `rest`: the hosted backend, spoken to over HTTP.
//! - `sqlite`: a local SQLite store with a directory-backed bucket.
//!
//! Callers outside the crate should go through the `lifecycle`, `photos` and
//! `ordering` operations rather than the gateway, so the invariants stay in
//! one place.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::config::{BackendKind, Config};

pub mod rest;
pub mod sqlite;

pub use rest::RestGateway;
pub use sqlite::SqliteGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Pieces,
    Photos,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Pieces => "pieces",
            Table::Photos => "photos",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
        }
    }
}

/// Equality or inequality predicate on a named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: &'static str,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn neq(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            op: FilterOp::Neq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field: &'static str) -> Self {
        Self {
            field,
            ascending: true,
        }
    }

    pub fn desc(field: &'static str) -> Self {
        Self {
            field,
            ascending: false,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Rows of `table` matching every filter, in `order` when given.
    async fn query(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Value>>;

    /// Insert one record and return the stored row, generated `id` included.
    async fn insert(&self, table: Table, record: Value) -> Result<Value>;

    /// Apply a partial update. Returns `false` when no row has `id`.
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<bool>;

    /// Hard-delete a row. Returns `false` when no row has `id`.
    async fn delete_row(&self, table: Table, id: &str) -> Result<bool>;

    /// Store `bytes` under `key` without overwriting; returns the stored key.
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;

    fn public_url(&self, bucket: &str, key: &str) -> Result<String>;
}

/// Open the backend selected by `cfg.backend.kind`.
pub async fn connect(cfg: &Config) -> Result<Box<dyn Gateway>> {
    match cfg.backend.kind {
        BackendKind::Rest => {
            let rest = cfg
                .rest
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("backend.kind is rest but no rest section"))?;
            Ok(Box::new(RestGateway::from_settings(rest)?))
        }
        BackendKind::Sqlite => {
            let data_dir = cfg.app.data_dir.trim_end_matches('/');
            let database_url = sqlite_url(cfg, std::env::var("DATABASE_URL").ok());
            let objects_dir = PathBuf::from(data_dir).join("objects");
            let gw = SqliteGateway::connect(
                &database_url,
                objects_dir,
                cfg.storage.public_base_url.clone(),
            )
            .await?;
            Ok(Box::new(gw))
        }
    }
}

/// `DATABASE_URL` wins over `backend.database_url`; without either the store
/// lives at `<data_dir>/claybook.db`.
fn sqlite_url(cfg: &Config, env_url: Option<String>) -> String {
    env_url
        .filter(|url| !url.trim().is_empty())
        .or_else(|| cfg.backend.database_url.clone())
        .unwrap_or_else(|| {
            format!(
                "sqlite://{}/claybook.db",
                cfg.app.data_dir.trim_end_matches('/')
            )
        })
}
