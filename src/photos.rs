//! Photos attached to pieces and the primary ("cover") photo convention.
//!
//! The first photo attached to a piece becomes its primary photo. Nothing
//! re-balances the flag afterwards: deleting the primary photo leaves the
//! piece without one until presentation falls back via [`pick_primary_photo`].

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::config::Storage;
use crate::error::{Error, Result};
use crate::gateway::{Filter, Gateway, OrderBy, Table};
use crate::lifecycle::{decode_rows, transition_stage, Snapshot};
use crate::model::{Photo, Stage};

static EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]{1,5}$").unwrap());

const DEFAULT_EXTENSION: &str = "jpg";

/// Where the image for a new photo comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    /// A file on this device; its bytes are uploaded to object storage.
    Device(PathBuf),
    /// An already-hosted image; stored as-is.
    Url(String),
}

/// Lowercased extension of `path`, or `jpg` when it has none.
pub fn file_extension(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    if !EXTENSION.is_match(&ext) {
        return Err(Error::validation(format!(
            "unsupported file extension '{}'",
            ext
        )));
    }
    Ok(ext)
}

pub fn content_type(ext: &str) -> String {
    match ext {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        other => format!("image/{}", other),
    }
}

/// Storage key `<unix millis>-<7 random chars>.<ext>`. The timestamp keeps
/// keys roughly time-ordered; the suffix separates uploads in the same
/// millisecond.
pub fn object_key(ext: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(7).collect();
    format!("{}-{}.{}", Utc::now().timestamp_millis(), suffix, ext)
}

/// Upload a device file and return its public URL.
async fn upload_device_file(gw: &dyn Gateway, storage: &Storage, path: &Path) -> Result<String> {
    let ext = file_extension(path)?;
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        Error::Upload(anyhow::Error::new(err).context(format!("failed to read {}", path.display())))
    })?;
    let key = object_key(&ext);
    let stored = gw
        .upload_object(&storage.bucket, &key, bytes, &content_type(&ext))
        .await
        .map_err(Error::Upload)?;
    gw.public_url(&storage.bucket, &stored).map_err(Error::Upload)
}

async fn photo_count(gw: &dyn Gateway, piece_id: &str) -> Result<usize> {
    let rows = gw
        .query(Table::Photos, &[Filter::eq("piece_id", piece_id)], None)
        .await
        .map_err(Error::Gateway)?;
    Ok(rows.len())
}

/// Attach a photo to a piece. Device files are uploaded first; a failed
/// upload aborts before any row is written. An upload whose row insert then
/// fails leaves the object behind in storage.
#[instrument(skip_all, fields(piece_id))]
pub async fn attach_photo(
    gw: &dyn Gateway,
    storage: &Storage,
    piece_id: &str,
    source: PhotoSource,
) -> Result<Photo> {
    let url = match source {
        PhotoSource::Url(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(Error::validation("photo URL must not be empty"));
            }
            trimmed.to_string()
        }
        PhotoSource::Device(path) => {
            if path.as_os_str().is_empty() {
                return Err(Error::validation("photo source path must not be empty"));
            }
            upload_device_file(gw, storage, &path).await?
        }
    };

    let is_primary = photo_count(gw, piece_id).await? == 0;
    let row = gw
        .insert(
            Table::Photos,
            json!({ "piece_id": piece_id, "url": url, "is_primary": is_primary }),
        )
        .await
        .map_err(Error::Gateway)?;
    let photo: Photo = serde_json::from_value(row)?;
    info!(photo_id = %photo.id, is_primary, "attached photo");
    Ok(photo)
}

/// Photos of a piece, newest first.
#[instrument(skip_all, fields(piece_id))]
pub async fn list_photos(gw: &dyn Gateway, piece_id: &str) -> Result<Snapshot<Photo>> {
    let rows = gw
        .query(
            Table::Photos,
            &[Filter::eq("piece_id", piece_id)],
            Some(OrderBy::desc("created_at")),
        )
        .await
        .map_err(Error::Gateway)?;
    Ok(Snapshot::new(decode_rows(rows)?))
}

/// Remove a photo's row. The stored object is left in place and no other
/// photo is promoted to primary.
#[instrument(skip_all, fields(photo_id))]
pub async fn delete_photo(gw: &dyn Gateway, photo_id: &str) -> Result<()> {
    let deleted = gw
        .delete_row(Table::Photos, photo_id)
        .await
        .map_err(Error::Gateway)?;
    if !deleted {
        return Err(Error::not_found("photos", photo_id));
    }
    info!("photo deleted");
    Ok(())
}

/// Cover photo for a piece: the primary photo if any, else the first one.
pub fn pick_primary_photo(photos: &[Photo]) -> Option<&Photo> {
    photos.iter().find(|p| p.is_primary).or_else(|| photos.first())
}

/// Finish a piece, optionally attaching a final photo first. A failed attach
/// is logged and does not stop the piece from being completed.
#[instrument(skip_all, fields(piece_id))]
pub async fn complete_with_photo(
    gw: &dyn Gateway,
    storage: &Storage,
    piece_id: &str,
    source: Option<PhotoSource>,
) -> Result<Option<Photo>> {
    let photo = match source {
        Some(source) => match attach_photo(gw, storage, piece_id, source).await {
            Ok(photo) => Some(photo),
            Err(err) => {
                warn!(?err, "could not attach completion photo");
                None
            }
        },
        None => None,
    };
    transition_stage(gw, piece_id, Stage::Completed).await?;
    Ok(photo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn photo(id: &str, is_primary: bool) -> Photo {
        Photo {
            id: id.into(),
            piece_id: "p".into(),
            url: format!("https://img/{id}.jpg"),
            is_primary,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn primary_photo_wins_over_order() {
        let photos = vec![photo("a", false), photo("b", true), photo("c", false)];
        assert_eq!(pick_primary_photo(&photos).map(|p| p.id.as_str()), Some("b"));
    }

    #[test]
    fn first_photo_is_the_fallback_cover() {
        let photos = vec![photo("p1", false), photo("p2", false)];
        assert_eq!(pick_primary_photo(&photos).map(|p| p.id.as_str()), Some("p1"));
        assert!(pick_primary_photo(&[]).is_none());
    }

    #[test]
    fn object_keys_carry_time_and_suffix() {
        let key = object_key("png");
        let (millis, rest) = key.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        let (suffix, ext) = rest.split_once('.').unwrap();
        assert_eq!(suffix.len(), 7);
        assert_eq!(ext, "png");
        assert_ne!(object_key("png"), key);
    }

    #[test]
    fn extensions_and_content_types() {
        assert_eq!(file_extension(Path::new("/tmp/x.JPG")).unwrap(), "jpg");
        assert_eq!(file_extension(Path::new("/tmp/noext")).unwrap(), "jpg");
        assert!(file_extension(Path::new("/tmp/x.tar-gz")).is_err());
        assert_eq!(content_type("jpg"), "image/jpeg");
        assert_eq!(content_type("png"), "image/png");
    }
}
