//! Piece lifecycle: creation, stage transitions, the graveyard and the
//! listings each screen refreshes from.
//!
//! Nothing here caches. Every listing is a point-in-time [`Snapshot`] and
//! callers re-invoke the listing to refresh. Gateway failures surface as
//! [`Error::Gateway`] and are never retried.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::gateway::{Filter, Gateway, OrderBy, Table};
use crate::model::{NewPiece, Photo, Piece, Stage};
use crate::photos::{list_photos, pick_primary_photo};

/// Finite, consuming sequence of rows read at one point in time.
#[derive(Debug)]
pub struct Snapshot<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> Snapshot<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<T> Iterator for Snapshot<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T> ExactSizeIterator for Snapshot<T> {}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// Issue a patch against one piece, mapping "no row" to `NotFound`.
async fn patch_piece(gw: &dyn Gateway, id: &str, patch: Value) -> Result<()> {
    let matched = gw
        .update(Table::Pieces, id, patch)
        .await
        .map_err(Error::Gateway)?;
    if !matched {
        return Err(Error::not_found("pieces", id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_piece(gw: &dyn Gateway, new: NewPiece) -> Result<Piece> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(Error::validation("title must not be empty"));
    }
    // completed_at is only ever stamped by a transition.
    if new.stage == Stage::Completed {
        return Err(Error::validation(
            "pieces cannot be created as completed; add them and complete them",
        ));
    }
    let description = new
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let mut record = Map::new();
    record.insert("title".into(), json!(title));
    record.insert("description".into(), json!(description));
    record.insert("stage".into(), json!(new.stage));
    if new.stage == Stage::Idea {
        record.insert("is_commission".into(), json!(new.is_commission));
        record.insert("priority".into(), json!(new.priority));
    }

    let row = gw
        .insert(Table::Pieces, Value::Object(record))
        .await
        .map_err(Error::Gateway)?;
    let piece: Piece = serde_json::from_value(row)?;
    info!(id = %piece.id, stage = %piece.stage, "created piece");
    Ok(piece)
}

#[instrument(skip_all, fields(id))]
pub async fn get_piece(gw: &dyn Gateway, id: &str) -> Result<Piece> {
    let rows = gw
        .query(Table::Pieces, &[Filter::eq("id", id)], None)
        .await
        .map_err(Error::Gateway)?;
    decode_rows::<Piece>(rows)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("pieces", id))
}

/// Move a piece to `stage`. Any stage is reachable from any other. Moving to
/// `Completed` stamps `completed_at` in the same update; moving away never
/// clears it.
#[instrument(skip_all, fields(id, stage = %stage))]
pub async fn transition_stage(gw: &dyn Gateway, id: &str, stage: Stage) -> Result<()> {
    let mut patch = Map::new();
    patch.insert("stage".into(), json!(stage));
    if stage == Stage::Completed {
        patch.insert("completed_at".into(), json!(Utc::now()));
    }
    patch_piece(gw, id, Value::Object(patch)).await?;
    info!("stage updated");
    Ok(())
}

/// Start an idea: it joins the bench as a `New` piece.
pub async fn promote_idea_to_active(gw: &dyn Gateway, id: &str) -> Result<()> {
    transition_stage(gw, id, Stage::New).await
}

/// Send a piece to the graveyard. Scrapping twice is harmless; there is no
/// way back.
#[instrument(skip_all, fields(id))]
pub async fn scrap(gw: &dyn Gateway, id: &str) -> Result<()> {
    patch_piece(gw, id, json!({ "is_graveyard": true })).await?;
    info!("piece scrapped");
    Ok(())
}

#[instrument(skip_all, fields(id))]
pub async fn update_description(gw: &dyn Gateway, id: &str, description: &str) -> Result<()> {
    let trimmed = description.trim();
    let value = if trimmed.is_empty() {
        Value::Null
    } else {
        json!(trimmed)
    };
    patch_piece(gw, id, json!({ "description": value })).await
}

/// Parse a completion date typed by a person: RFC 3339, or a bare
/// `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_completion_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::validation(format!("'{}' is not a date", raw)))
}

/// Correct the completion date by hand. Does not look at or change the stage.
#[instrument(skip_all, fields(id))]
pub async fn update_completed_at(gw: &dyn Gateway, id: &str, raw: &str) -> Result<DateTime<Utc>> {
    let completed_at = parse_completion_date(raw)?;
    patch_piece(gw, id, json!({ "completed_at": completed_at })).await?;
    Ok(completed_at)
}

/// Non-graveyard pieces outside `exclude`, newest first.
#[instrument(skip_all)]
pub async fn list_active(gw: &dyn Gateway, exclude: &[Stage]) -> Result<Snapshot<Piece>> {
    let mut filters = vec![Filter::eq("is_graveyard", false)];
    filters.extend(exclude.iter().map(|s| Filter::neq("stage", s.as_str())));
    let rows = gw
        .query(Table::Pieces, &filters, Some(OrderBy::desc("created_at")))
        .await
        .map_err(Error::Gateway)?;
    Ok(Snapshot::new(decode_rows(rows)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOptions {
    pub include_empty_groups: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            include_empty_groups: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    pub stage: Stage,
    pub pieces: Vec<Piece>,
}

/// Group a snapshot of pieces by stage, in stage display order. Excluded
/// stages never get a group.
pub fn group_by_stage(
    pieces: impl IntoIterator<Item = Piece>,
    exclude: &[Stage],
    options: GroupOptions,
) -> Vec<StageGroup> {
    let mut groups: Vec<StageGroup> = Stage::ALL
        .into_iter()
        .filter(|s| !exclude.contains(s))
        .map(|stage| StageGroup {
            stage,
            pieces: Vec::new(),
        })
        .collect();
    for piece in pieces {
        if let Some(group) = groups.iter_mut().find(|g| g.stage == piece.stage) {
            group.pieces.push(piece);
        }
    }
    if !options.include_empty_groups {
        groups.retain(|g| !g.pieces.is_empty());
    }
    groups
}

pub async fn list_by_stage(
    gw: &dyn Gateway,
    exclude: &[Stage],
    options: GroupOptions,
) -> Result<Vec<StageGroup>> {
    let snapshot = list_active(gw, exclude).await?;
    Ok(group_by_stage(snapshot, exclude, options))
}

/// Finished, non-graveyard pieces, most recently completed first.
#[instrument(skip_all)]
pub async fn list_completed(gw: &dyn Gateway) -> Result<Snapshot<Piece>> {
    let rows = gw
        .query(
            Table::Pieces,
            &[
                Filter::eq("stage", Stage::Completed.as_str()),
                Filter::eq("is_graveyard", false),
            ],
            Some(OrderBy::desc("completed_at")),
        )
        .await
        .map_err(Error::Gateway)?;
    Ok(Snapshot::new(decode_rows(rows)?))
}

/// Live ideas in their manual order.
#[instrument(skip_all)]
pub async fn list_ideas(gw: &dyn Gateway) -> Result<Snapshot<Piece>> {
    let rows = gw
        .query(
            Table::Pieces,
            &[
                Filter::eq("stage", Stage::Idea.as_str()),
                Filter::eq("is_graveyard", false),
            ],
            Some(OrderBy::asc("display_order")),
        )
        .await
        .map_err(Error::Gateway)?;
    Ok(Snapshot::new(decode_rows(rows)?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub piece: Piece,
    pub photos: Vec<Photo>,
}

impl GalleryEntry {
    pub fn cover(&self) -> Option<&Photo> {
        pick_primary_photo(&self.photos)
    }
}

/// Completed pieces with their photos, for the gallery grid.
#[instrument(skip_all)]
pub async fn gallery(gw: &dyn Gateway) -> Result<Vec<GalleryEntry>> {
    let pieces: Vec<Piece> = list_completed(gw).await?.collect();
    let photo_sets = try_join_all(pieces.iter().map(|p| list_photos(gw, &p.id))).await?;
    Ok(pieces
        .into_iter()
        .zip(photo_sets)
        .map(|(piece, photos)| GalleryEntry {
            piece,
            photos: photos.collect(),
        })
        .collect())
}
