use axum::{extract::State, Json};
use relay_core::{AppState, AppStatePatch};
use tracing::debug;

use super::{Accepted, AppContext, JsonBody};

pub async fn get_state(State(ctx): State<AppContext>) -> Json<AppState> {
    Json(ctx.hub.state())
}

pub async fn update_state(
    State(ctx): State<AppContext>,
    JsonBody(patch): JsonBody<AppStatePatch>,
) -> Json<Accepted> {
    if patch.is_empty() {
        debug!("empty state patch");
    }
    ctx.hub.update_state(patch);
    Accepted::ok()
}

pub async fn reset_state(State(ctx): State<AppContext>) -> Json<Accepted> {
    ctx.hub.reset_state();
    Accepted::ok()
}
