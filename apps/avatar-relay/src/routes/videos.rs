use axum::{
    extract::{Query, State},
    Json,
};
use relay_core::{ClipDelivery, ClipPoll};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiResult, AppContext, JsonBody};

#[derive(Debug, Serialize)]
pub struct ClipAccepted {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub session_id: Option<String>,
}

pub async fn clip_callback(
    State(ctx): State<AppContext>,
    JsonBody(delivery): JsonBody<ClipDelivery>,
) -> ApiResult<ClipAccepted> {
    let id = ctx.hub.ingest_clip(delivery)?;
    debug!(clip_id = %id, "clip accepted");
    Ok(Json(ClipAccepted { success: true, id }))
}

pub async fn poll_clip(
    State(ctx): State<AppContext>,
    Query(query): Query<PollQuery>,
) -> Json<ClipPoll> {
    let session_id = query.session_id.as_deref().filter(|id| !id.is_empty());
    Json(ctx.hub.poll_clip(session_id))
}
