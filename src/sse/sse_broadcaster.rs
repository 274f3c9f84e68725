use crate::sse::models::PollEventSender;
use tokio::sync::broadcast;

/// Events buffered per subscriber before it starts lagging.
const POLL_EVENT_CAPACITY: usize = 100;

pub fn create_poll_broadcaster() -> PollEventSender {
    let (tx, _rx) = broadcast::channel(POLL_EVENT_CAPACITY);
    tx
}
