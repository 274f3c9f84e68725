use crate::polls::poll_results;
use crate::sse::models::{PollEvent, PollEventSender};
use crate::startup::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::{convert::Infallible, time::Duration};
use tokio::sync::broadcast::error::RecvError;

/// Live results for one post's poll: an `init` event with the current
/// tallies, then a `vote` event after every stored vote.
pub async fn poll_updates_sse(
    Extension(app_state): Extension<AppState>,
    Extension(poll_tx): Extension<PollEventSender>,
    Path(post_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = poll_tx.subscribe();

    let stream = async_stream::stream! {
        match app_state.posts.load_post(&post_id).await {
            Ok(Some(stored)) => match &stored.post.poll {
                Some(poll) => {
                    yield Ok(Event::default()
                        .event("init")
                        .data(json!({ "postId": post_id, "poll": poll_results(poll) }).to_string()));
                }
                None => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(json!({"error": "This post has no poll"}).to_string()));
                    return;
                }
            },
            Ok(None) => {
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Post not found"}).to_string()));
                return;
            }
            Err(e) => {
                warn!(post_id = %post_id, "poll stream could not load post: {}", e);
                yield Ok(Event::default()
                    .event("error")
                    .data(json!({"error": "Storage error"}).to_string()));
                return;
            }
        }

        loop {
            match rx.recv().await {
                Ok(PollEvent::VoteRecorded(update)) if update.post_id == post_id => {
                    yield Ok(Event::default()
                        .event("vote")
                        .data(json!({ "postId": post_id, "poll": update.results }).to_string()));
                }
                Ok(PollEvent::PollRemoved(removed)) if removed == post_id => {
                    yield Ok(Event::default()
                        .event("poll_removed")
                        .data(json!({ "postId": post_id }).to_string()));
                    break;
                }
                Ok(_) => {}
                // Slow subscribers skip missed updates; the next one carries full tallies.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
