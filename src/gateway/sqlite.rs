use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use super::{Filter, FilterOp, Gateway, OrderBy, Table};

pub type Pool = SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Bool,
    Int,
    /// Stored as unix microseconds, exchanged as RFC 3339 strings.
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    name: &'static str,
    kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

const PIECE_COLUMNS: &[Column] = &[
    col("id", ColumnKind::Text),
    col("title", ColumnKind::Text),
    col("description", ColumnKind::Text),
    col("stage", ColumnKind::Text),
    col("is_graveyard", ColumnKind::Bool),
    col("is_commission", ColumnKind::Bool),
    col("priority", ColumnKind::Int),
    col("display_order", ColumnKind::Int),
    col("created_at", ColumnKind::Timestamp),
    col("completed_at", ColumnKind::Timestamp),
];

const PHOTO_COLUMNS: &[Column] = &[
    col("id", ColumnKind::Text),
    col("piece_id", ColumnKind::Text),
    col("url", ColumnKind::Text),
    col("is_primary", ColumnKind::Bool),
    col("created_at", ColumnKind::Timestamp),
];

fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Pieces => PIECE_COLUMNS,
        Table::Photos => PHOTO_COLUMNS,
    }
}

fn column(table: Table, name: &str) -> Result<Column> {
    columns(table)
        .iter()
        .copied()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow!("unknown column {}.{}", table, name))
}

#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Bool(bool),
}

fn to_sql(column: Column, value: &Value) -> Result<SqlValue> {
    let converted = match (column.kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Bool(*b),
        (ColumnKind::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => bail!("column {} expects an integer, got {}", column.name, n),
        },
        (ColumnKind::Timestamp, Value::String(s)) => {
            let ts = DateTime::parse_from_rfc3339(s)
                .with_context(|| format!("column {} expects an RFC 3339 timestamp", column.name))?;
            SqlValue::Int(ts.with_timezone(&Utc).timestamp_micros())
        }
        (kind, other) => bail!("column {} ({:?}) cannot hold {}", column.name, kind, other),
    };
    Ok(converted)
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            qb.push("NULL");
        }
        SqlValue::Text(s) => {
            qb.push_bind(s);
        }
        SqlValue::Int(i) => {
            qb.push_bind(i);
        }
        SqlValue::Bool(b) => {
            qb.push_bind(b);
        }
    }
}

fn read_row(table: Table, row: &SqliteRow) -> Result<Value> {
    let mut out = Map::new();
    for c in columns(table) {
        let value = match c.kind {
            ColumnKind::Text => json!(row.try_get::<Option<String>, _>(c.name)?),
            ColumnKind::Bool => json!(row.try_get::<Option<bool>, _>(c.name)?),
            ColumnKind::Int => json!(row.try_get::<Option<i64>, _>(c.name)?),
            ColumnKind::Timestamp => match row.try_get::<Option<i64>, _>(c.name)? {
                Some(micros) => {
                    let ts = DateTime::<Utc>::from_timestamp_micros(micros)
                        .ok_or_else(|| anyhow!("column {} holds out-of-range time", c.name))?;
                    json!(ts)
                }
                None => Value::Null,
            },
        };
        out.insert(c.name.to_string(), value);
    }
    Ok(Value::Object(out))
}

fn select_list(table: Table) -> String {
    columns(table)
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Local gateway: rows in SQLite, objects in a directory tree
/// (`<objects_dir>/<bucket>/<key>`).
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: Pool,
    objects_dir: PathBuf,
    public_base_url: Option<String>,
}

impl SqliteGateway {
    /// Open (creating if needed) the database at `database_url` and run
    /// migrations.
    pub async fn connect(
        database_url: &str,
        objects_dir: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, objects_dir, public_base_url))
    }

    pub fn new(pool: Pool, objects_dir: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        let objects_dir = objects_dir.into();
        let objects_dir = if objects_dir.is_absolute() {
            objects_dir
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&objects_dir))
                .unwrap_or(objects_dir)
        };
        Self {
            pool,
            objects_dir,
            public_base_url,
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        check_segment_path(bucket).context("invalid bucket name")?;
        check_segment_path(key).context("invalid object key")?;
        Ok(self.objects_dir.join(bucket).join(key))
    }

    async fn fetch_by_id(&self, table: Table, id: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?", select_list(table), table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| read_row(table, &r)).transpose()
    }
}

/// Keys may contain `/` separated segments, but never empty, `.` or `..`
/// segments, nor an absolute prefix.
fn check_segment_path(raw: &str) -> Result<()> {
    if raw.is_empty() || raw.starts_with('/') || raw.split('/').any(|s| s.is_empty()) {
        bail!("'{}' must be a relative path without empty segments", raw);
    }
    let all_normal = Path::new(raw)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        bail!("'{}' must not contain '.' or '..' segments", raw);
    }
    Ok(())
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL {}", database_url))?
        .create_if_missing(true)
        .foreign_keys(true);
    // Every connection to `sqlite::memory:` is a separate database.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = pool_options.connect_with(options).await?;
    if !in_memory {
        // Enable WAL and stricter durability.
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=FULL;")
            .execute(&pool)
            .await?;
    }
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[async_trait]
impl Gateway for SqliteGateway {
    #[instrument(skip_all, fields(table = %table))]
    async fn query(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<OrderBy>,
    ) -> Result<Vec<Value>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM {}", select_list(table), table));
        for (i, filter) in filters.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            let c = column(table, filter.field)?;
            match (to_sql(c, &filter.value)?, filter.op) {
                (SqlValue::Null, FilterOp::Eq) => {
                    qb.push(c.name).push(" IS NULL");
                }
                (SqlValue::Null, FilterOp::Neq) => {
                    qb.push(c.name).push(" IS NOT NULL");
                }
                (value, FilterOp::Eq) => {
                    qb.push(c.name).push(" = ");
                    push_value(&mut qb, value);
                }
                (value, FilterOp::Neq) => {
                    qb.push(c.name).push(" <> ");
                    push_value(&mut qb, value);
                }
            }
        }
        if let Some(order) = order {
            let c = column(table, order.field)?;
            let dir = if order.ascending { "ASC" } else { "DESC" };
            // rowid keeps ties in insertion order (reversed for descending).
            qb.push(format!(" ORDER BY {} {}, rowid {}", c.name, dir, dir));
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|r| read_row(table, r)).collect()
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn insert(&self, table: Table, record: Value) -> Result<Value> {
        let Value::Object(mut fields) = record else {
            bail!("insert into {} expects a JSON object", table);
        };
        let id = match fields.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        fields.insert("id".into(), json!(id));
        fields
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now()));

        let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} (", table));
        let mut values = Vec::with_capacity(fields.len());
        for (i, (name, value)) in fields.iter().enumerate() {
            let c = column(table, name)?;
            if i > 0 {
                qb.push(", ");
            }
            qb.push(c.name);
            values.push(to_sql(c, value)?);
        }
        qb.push(") VALUES (");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(")");
        qb.build().execute(&self.pool).await?;

        info!(%id, "inserted row");
        self.fetch_by_id(table, &id)
            .await?
            .ok_or_else(|| anyhow!("row {} vanished after insert into {}", id, table))
    }

    #[instrument(skip_all, fields(table = %table, id))]
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<bool> {
        let Value::Object(fields) = patch else {
            bail!("update of {} expects a JSON object", table);
        };
        if fields.is_empty() {
            return Ok(self.fetch_by_id(table, id).await?.is_some());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", table));
        for (i, (name, value)) in fields.iter().enumerate() {
            let c = column(table, name)?;
            if c.name == "id" || c.name == "created_at" {
                bail!("{}.{} is immutable", table, c.name);
            }
            if i > 0 {
                qb.push(", ");
            }
            qb.push(c.name).push(" = ");
            push_value(&mut qb, to_sql(c, value)?);
        }
        qb.push(" WHERE id = ").push_bind(id);
        let done = qb.build().execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(table = %table, id))]
    async fn delete_row(&self, table: Table, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table);
        let done = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(bucket, key))]
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to create object {}", path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("failed to write object {}", path.display()))?;
        file.flush().await?;
        info!(size = bytes.len(), content_type, "stored object");
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> Result<String> {
        if let Some(base) = &self.public_base_url {
            check_segment_path(key).context("invalid object key")?;
            return Ok(format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key));
        }
        let path = self.object_path(bucket, key)?;
        Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| anyhow!("cannot express {} as a file URL", path.display()))
    }
}
