//! Error taxonomy surfaced by the lifecycle, photo and ordering operations.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input the user can correct (empty title, missing URL, bad date).
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: String },
    /// Backend or network failure on a row operation. Never retried.
    #[error("gateway error: {0}")]
    Gateway(#[source] anyhow::Error),
    /// Object storage write failed; raised before any metadata insert.
    #[error("upload failed: {0}")]
    Upload(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(table: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            table,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Gateway(anyhow::Error::new(err).context("undecodable row"))
    }
}
