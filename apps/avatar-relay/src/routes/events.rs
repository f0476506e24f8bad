use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{Stream, StreamExt};
use relay_core::PushEvent;
use tracing::{debug, warn};

use super::AppContext;

/// Server-sent events: the current state first, then `state` per update and
/// `command` per broadcast. The feed's subscriptions are released when the
/// client disconnects and the stream is dropped.
pub async fn stream_events(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let feed = ctx.hub.open_push_feed();
    let mut shutdown = ctx.shutdown_watch();
    debug!("push consumer connected");

    let stream = feed
        .take_until(async move {
            // A closed channel means the context went away, not that shutdown began.
            if shutdown.wait_for(|stopping| *stopping).await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .map(|event| Ok(to_sse(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &PushEvent) -> Event {
    let data = event.data_json().unwrap_or_else(|err| {
        warn!(event = event.name(), error = %err, "failed to encode push event");
        "{}".into()
    });
    Event::default().event(event.name()).data(data)
}
