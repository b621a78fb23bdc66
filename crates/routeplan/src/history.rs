//! Single-slot route history.
//!
//! Every mutating operation captures the route's current ordered link list
//! (with joined stop data) before touching it. The capture is written inside
//! the operation's transaction, ahead of any structural write: a committed
//! operation leaves the pre-operation state recoverable, and an aborted one
//! rolls the overwrite back so the previous snapshot survives.

use anyhow::Context;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{RouteId, RouteSnapshot, RouteStopView};
use crate::store::StoreTx;

/// Overwrites the route's history slot with its current state.
pub async fn capture<T: StoreTx>(tx: &mut T, route_id: RouteId) -> Result<RouteSnapshot> {
    let snapshot =
        RouteSnapshot { route_id, captured_at: Utc::now(), stops: route_views(tx, route_id).await? };
    tx.put_history(snapshot.clone()).await.context("writing history snapshot")?;
    Ok(snapshot)
}

/// Loads a route's ordered links with their stop records joined in.
pub(crate) async fn route_views<T: StoreTx>(
    tx: &mut T, route_id: RouteId,
) -> Result<Vec<RouteStopView>> {
    let segments = tx.segments(route_id).await?;
    let mut views = Vec::with_capacity(segments.len());
    for segment in segments {
        let stop = tx
            .stop(segment.stop_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stop {} not found", segment.stop_id)))?;
        views.push(segment.with_stop(stop));
    }
    Ok(views)
}
