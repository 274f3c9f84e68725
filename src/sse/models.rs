use crate::polls::PollResults;

/// A vote was stored; carries the refreshed results.
#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub post_id: String,
    pub results: PollResults,
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    VoteRecorded(PollUpdate),
    PollRemoved(String),
}

pub type PollEventSender = tokio::sync::broadcast::Sender<PollEvent>;
