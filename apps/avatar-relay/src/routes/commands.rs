use axum::{extract::State, Json};
use relay_core::Command;
use serde::Serialize;

use super::{ApiResult, AppContext, JsonBody};

#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub success: bool,
    pub command: Command,
}

#[derive(Debug, Serialize)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
}

pub async fn submit_command(
    State(ctx): State<AppContext>,
    JsonBody(command): JsonBody<Command>,
) -> ApiResult<CommandAccepted> {
    let command = ctx.hub.submit_command(command)?;
    Ok(Json(CommandAccepted {
        success: true,
        command,
    }))
}

/// Hands every queued command to the caller and empties the relay.
pub async fn poll_commands(State(ctx): State<AppContext>) -> Json<CommandBatch> {
    Json(CommandBatch {
        commands: ctx.hub.drain_commands(),
    })
}
