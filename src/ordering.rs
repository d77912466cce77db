//! Manual ordering of ideas through `display_order`.
//!
//! A reorder renumbers the whole list and writes each piece with its own
//! update. The batch is not atomic: if a write fails, earlier writes stay
//! applied and the caller's only recovery is to refetch the list
//! ([`reorder_or_refetch`]).

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::gateway::{Gateway, Table};
use crate::lifecycle::list_ideas;
use crate::model::Piece;

/// Splice the element at `from` into position `to`. Returns `false` and
/// leaves `items` untouched when the move is a no-op or out of range.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from == to || from >= items.len() || to >= items.len() {
        return false;
    }
    let moved = items.remove(from);
    items.insert(to, moved);
    true
}

/// Move one idea and persist the new order of every idea in the list.
#[instrument(skip_all, fields(from, to, len = ideas.len()))]
pub async fn reorder(
    gw: &dyn Gateway,
    mut ideas: Vec<Piece>,
    from: usize,
    to: usize,
) -> Result<Vec<Piece>> {
    if !move_item(&mut ideas, from, to) {
        return Ok(ideas);
    }
    for (index, idea) in ideas.iter_mut().enumerate() {
        idea.display_order = index as i64;
    }
    for idea in &ideas {
        let matched = gw
            .update(
                Table::Pieces,
                &idea.id,
                json!({ "display_order": idea.display_order }),
            )
            .await
            .map_err(Error::Gateway)?;
        if !matched {
            return Err(Error::not_found("pieces", idea.id.as_str()));
        }
    }
    info!("ideas reordered");
    Ok(ideas)
}

#[derive(Debug)]
pub enum ReorderOutcome {
    /// Every write landed; the list in its new order.
    Applied(Vec<Piece>),
    /// A write failed; `ideas` is what the gateway holds now.
    Refetched { ideas: Vec<Piece>, error: Error },
}

impl ReorderOutcome {
    pub fn ideas(&self) -> &[Piece] {
        match self {
            ReorderOutcome::Applied(ideas) => ideas,
            ReorderOutcome::Refetched { ideas, .. } => ideas,
        }
    }
}

/// [`reorder`], falling back to a full refetch of the ideas when any write
/// fails. Only a failed refetch is returned as an error.
pub async fn reorder_or_refetch(
    gw: &dyn Gateway,
    ideas: Vec<Piece>,
    from: usize,
    to: usize,
) -> Result<ReorderOutcome> {
    match reorder(gw, ideas, from, to).await {
        Ok(ideas) => Ok(ReorderOutcome::Applied(ideas)),
        Err(error) => {
            warn!(?error, "reorder failed; refetching ideas");
            let ideas = list_ideas(gw).await?.collect();
            Ok(ReorderOutcome::Refetched { ideas, error })
        }
    }
}
