//! Live poll results over server-sent events.

mod models;
mod poll_updates_sse;
mod sse_broadcaster;

pub use models::{PollEvent, PollEventSender, PollUpdate};
pub use poll_updates_sse::poll_updates_sse;
pub use sse_broadcaster::create_poll_broadcaster;
