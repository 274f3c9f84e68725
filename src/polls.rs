//! Single-choice polls attached to posts: voting, results and authoring.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookie;
use uuid::Uuid;

use crate::error::PollError;
use crate::store::models::{Poll, PollOption, Post, Voter};
use crate::visitor::VisitorState;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 8;

#[derive(Debug)]
pub struct VoteOutcome {
    pub post: Post,
    /// Vote map including the new entry.
    pub vote_cookie: Cookie<'static>,
    /// Present when this vote minted the visitor id.
    pub visitor_cookie: Option<Cookie<'static>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub question: String,
    pub total_votes: u64,
    pub options: Vec<OptionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub id: String,
    pub text: String,
    pub votes: u64,
    /// Share of all votes in percent.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterEntry {
    pub visitor_id: String,
    pub option_id: String,
    pub option_text: String,
    pub voted_at: DateTime<Utc>,
}

/// Records one vote from this browser.
///
/// The vote map cookie is checked before anything is mutated, so a browser
/// that already voted on `post_id` is refused whatever option it picks.
/// There is no server-side check on the visitor id: clearing cookies allows
/// another vote.
pub fn apply_vote(
    post: &Post,
    post_id: &str,
    option_id: &str,
    visitor: &VisitorState,
    now: DateTime<Utc>,
) -> Result<VoteOutcome, PollError> {
    let poll = match &post.poll {
        Some(poll) if poll.options.len() >= MIN_OPTIONS => poll,
        _ => return Err(PollError::PollNotConfigured),
    };

    if visitor.vote_for(post_id).is_some() {
        return Err(PollError::DuplicateVote);
    }

    let option_id = option_id.trim();
    let index = poll
        .options
        .iter()
        .position(|option| !option_id.is_empty() && option.id == option_id)
        .ok_or(PollError::InvalidOption)?;

    let (visitor_id, visitor_cookie) = visitor.visitor_id();

    let mut post = post.clone();
    if let Some(poll) = post.poll.as_mut() {
        poll.options[index].votes += 1;
        poll.voters.push(Voter {
            visitor_id,
            option_id: option_id.to_string(),
            voted_at: now,
        });
    }
    post.updated_at = now;

    Ok(VoteOutcome {
        post,
        vote_cookie: visitor.votes_cookie_with(post_id, option_id),
        visitor_cookie,
    })
}

pub fn poll_results(poll: &Poll) -> PollResults {
    let total_votes: u64 = poll.options.iter().map(|option| option.votes).sum();

    let options = poll
        .options
        .iter()
        .map(|option| OptionResult {
            id: option.id.clone(),
            text: option.text.clone(),
            votes: option.votes,
            rate: if total_votes == 0 {
                0.0
            } else {
                option.votes as f64 / total_votes as f64 * 100.0
            },
        })
        .collect();

    PollResults {
        question: poll.question.clone(),
        total_votes,
        options,
    }
}

pub fn voter_report(poll: &Poll) -> Vec<VoterEntry> {
    poll.voters
        .iter()
        .map(|voter| VoterEntry {
            visitor_id: voter.visitor_id.clone(),
            option_id: voter.option_id.clone(),
            option_text: poll
                .options
                .iter()
                .find(|option| option.id == voter.option_id)
                .map(|option| option.text.clone())
                .unwrap_or_default(),
            voted_at: voter.voted_at,
        })
        .collect()
}

/// Poll as submitted by the admin editor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollInput {
    pub question: String,
    pub options: Vec<PollOptionInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionInput {
    /// Id of an existing option being relabeled.
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

impl PollInput {
    fn validate(&self) -> Result<(), PollError> {
        if self.question.trim().is_empty() {
            return Err(PollError::InvalidPollEdit("question is required".to_string()));
        }
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(PollError::InvalidPollEdit(format!(
                "a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options"
            )));
        }
        if self.options.iter().any(|option| option.text.trim().is_empty()) {
            return Err(PollError::InvalidPollEdit("option text is required".to_string()));
        }
        Ok(())
    }
}

pub fn new_option_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("opt-{}", &random[..8])
}

impl Poll {
    pub fn from_input(input: &PollInput) -> Result<Self, PollError> {
        input.validate()?;
        Ok(Poll {
            question: input.question.trim().to_string(),
            options: input
                .options
                .iter()
                .map(|option| PollOption {
                    id: new_option_id(),
                    text: option.text.trim().to_string(),
                    votes: 0,
                })
                .collect(),
            voters: Vec::new(),
        })
    }

    /// Applies an admin edit.
    ///
    /// Once anybody has voted the set of option ids is frozen and only the
    /// question and labels may change. Before that, options can be added,
    /// removed or reordered freely.
    pub fn revise(&self, input: &PollInput) -> Result<Self, PollError> {
        input.validate()?;

        if !self.voters.is_empty() {
            let current: BTreeSet<&str> = self.options.iter().map(|o| o.id.as_str()).collect();
            let submitted: BTreeSet<&str> =
                input.options.iter().filter_map(|o| o.id.as_deref()).collect();

            if submitted != current || input.options.len() != self.options.len() {
                return Err(PollError::InvalidPollEdit(
                    "options cannot be added or removed after voting started".to_string(),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        let options = input
            .options
            .iter()
            .map(|option| {
                let existing = option
                    .id
                    .as_deref()
                    .and_then(|id| self.options.iter().find(|current| current.id == id))
                    .filter(|current| seen.insert(current.id.clone()));

                match existing {
                    Some(current) => PollOption {
                        id: current.id.clone(),
                        text: option.text.trim().to_string(),
                        votes: current.votes,
                    },
                    None => PollOption {
                        id: new_option_id(),
                        text: option.text.trim().to_string(),
                        votes: 0,
                    },
                }
            })
            .collect();

        Ok(Poll {
            question: input.question.trim().to_string(),
            options,
            voters: self.voters.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::visitor::{VOTES_COOKIE, parse_votes};

    fn poll_post(votes: &[u64]) -> Post {
        let now = Utc::now() - Duration::days(1);
        Post {
            id: "poll-post-abc123".into(),
            title: "Which one?".into(),
            category: "blog".into(),
            tag: String::new(),
            body: String::new(),
            images: vec![],
            poll: Some(Poll {
                question: "Tabs or spaces?".into(),
                options: votes
                    .iter()
                    .enumerate()
                    .map(|(i, &votes)| PollOption {
                        id: format!("opt-{i}"),
                        text: format!("Option {i}"),
                        votes,
                    })
                    .collect(),
                voters: vec![],
            }),
            views: 0,
            created_at: now,
            updated_at: now,
            created_by: "admin".into(),
            updated_by: "admin".into(),
        }
    }

    fn visitor_after(outcome: &VoteOutcome, previous: &VisitorState) -> VisitorState {
        VisitorState {
            visitor_id: previous.visitor_id.clone().or_else(|| {
                outcome
                    .visitor_cookie
                    .as_ref()
                    .map(|cookie| cookie.value().to_string())
            }),
            votes: parse_votes(outcome.vote_cookie.value()),
            ..Default::default()
        }
    }

    fn poll_of(post: &Post) -> &Poll {
        post.poll.as_ref().unwrap()
    }

    #[test]
    fn vote_increments_one_option_and_logs_voter() {
        let post = poll_post(&[0, 0]);
        let now = Utc::now();
        let outcome = apply_vote(&post, &post.id, "opt-1", &VisitorState::default(), now).unwrap();

        let poll = poll_of(&outcome.post);
        assert_eq!(poll.options[0].votes, 0);
        assert_eq!(poll.options[1].votes, 1);
        assert_eq!(poll.voters.len(), 1);
        assert_eq!(poll.voters[0].option_id, "opt-1");
        assert_eq!(poll.voters[0].voted_at, now);
        assert_eq!(outcome.post.updated_at, now);

        let visitor_cookie = outcome.visitor_cookie.as_ref().unwrap();
        assert_eq!(poll.voters[0].visitor_id, visitor_cookie.value());
        assert_eq!(outcome.vote_cookie.name(), VOTES_COOKIE);
        let votes = parse_votes(outcome.vote_cookie.value());
        assert_eq!(votes.get(&post.id).map(String::as_str), Some("opt-1"));
    }

    #[test]
    fn known_visitor_is_not_issued_a_new_id() {
        let post = poll_post(&[0, 0]);
        let visitor = VisitorState {
            visitor_id: Some("vknown-0000".into()),
            ..Default::default()
        };
        let outcome = apply_vote(&post, &post.id, "opt-0", &visitor, Utc::now()).unwrap();

        assert!(outcome.visitor_cookie.is_none());
        assert_eq!(poll_of(&outcome.post).voters[0].visitor_id, "vknown-0000");
    }

    #[test]
    fn second_vote_from_same_browser_is_rejected() {
        let post = poll_post(&[0, 0]);
        let first_visitor = VisitorState::default();
        let first = apply_vote(&post, &post.id, "opt-0", &first_visitor, Utc::now()).unwrap();
        let visitor = visitor_after(&first, &first_visitor);

        for option in ["opt-0", "opt-1", "does-not-exist"] {
            let err = apply_vote(&first.post, &post.id, option, &visitor, Utc::now()).unwrap_err();
            assert_eq!(err, PollError::DuplicateVote);
        }
        assert_eq!(poll_of(&first.post).options[0].votes, 1);
        assert_eq!(poll_of(&first.post).options[1].votes, 0);
    }

    #[test]
    fn votes_on_other_posts_do_not_block() {
        let post = poll_post(&[0, 0]);
        let mut visitor = VisitorState::default();
        visitor.votes.insert("some-other-post".into(), "opt-0".into());

        let outcome = apply_vote(&post, &post.id, "opt-0", &visitor, Utc::now()).unwrap();
        let votes = parse_votes(outcome.vote_cookie.value());
        assert_eq!(votes.len(), 2);
    }

    #[test]
    fn unknown_option_is_rejected_without_changes() {
        let post = poll_post(&[2, 3]);
        let err = apply_vote(&post, &post.id, "does-not-exist", &VisitorState::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, PollError::InvalidOption);
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let err = apply_vote(&post, &post.id, "  ", &VisitorState::default(), Utc::now()).unwrap_err();
        assert_eq!(err, PollError::InvalidOption);
        assert_eq!(poll_of(&post).options[0].votes, 2);
        assert_eq!(poll_of(&post).options[1].votes, 3);
    }

    #[test]
    fn posts_without_a_usable_poll_are_rejected() {
        let mut post = poll_post(&[0, 0]);
        post.poll = None;
        assert_eq!(
            apply_vote(&post, &post.id, "opt-0", &VisitorState::default(), Utc::now()).unwrap_err(),
            PollError::PollNotConfigured
        );

        let post = poll_post(&[0]);
        assert_eq!(
            apply_vote(&post, &post.id, "opt-0", &VisitorState::default(), Utc::now()).unwrap_err(),
            PollError::PollNotConfigured
        );
    }

    #[test]
    fn sequential_votes_keep_counts_and_voters_in_step() {
        let mut post = poll_post(&[0, 0, 0]);
        for i in 0..25 {
            let option = format!("opt-{}", i % 3);
            let visitor = VisitorState::default();
            post = apply_vote(&post, &post.id, &option, &visitor, Utc::now())
                .unwrap()
                .post;

            let poll = poll_of(&post);
            let total: u64 = poll.options.iter().map(|o| o.votes).sum();
            assert_eq!(total as usize, poll.voters.len());
        }
        assert_eq!(poll_of(&post).voters.len(), 25);
    }

    #[test]
    fn results_report_rates() {
        let post = poll_post(&[3, 1]);
        let results = poll_results(poll_of(&post));

        assert_eq!(results.total_votes, 4);
        assert_eq!(results.options[0].rate, 75.0);
        assert_eq!(results.options[1].rate, 25.0);
        assert_eq!(results.question, "Tabs or spaces?");
    }

    #[test]
    fn results_without_votes_are_zero() {
        let post = poll_post(&[0, 0, 0]);
        let results = poll_results(poll_of(&post));

        assert_eq!(results.total_votes, 0);
        assert!(results.options.iter().all(|o| o.rate == 0.0));
    }

    #[test]
    fn voter_report_resolves_option_text() {
        let post = poll_post(&[0, 0]);
        let outcome = apply_vote(&post, &post.id, "opt-1", &VisitorState::default(), Utc::now()).unwrap();
        let report = voter_report(poll_of(&outcome.post));

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].option_text, "Option 1");
    }

    fn input(question: &str, options: &[(Option<&str>, &str)]) -> PollInput {
        PollInput {
            question: question.into(),
            options: options
                .iter()
                .map(|(id, text)| PollOptionInput {
                    id: id.map(str::to_string),
                    text: (*text).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn new_polls_are_validated() {
        let poll = Poll::from_input(&input(" Pick ", &[(None, " A "), (None, "B")])).unwrap();
        assert_eq!(poll.question, "Pick");
        assert_eq!(poll.options[0].text, "A");
        assert_ne!(poll.options[0].id, poll.options[1].id);
        assert!(poll.options[0].id.starts_with("opt-"));

        assert!(Poll::from_input(&input("Pick", &[(None, "A")])).is_err());
        assert!(Poll::from_input(&input("", &[(None, "A"), (None, "B")])).is_err());
        assert!(Poll::from_input(&input("Pick", &[(None, "A"), (None, " ")])).is_err());
        let nine: Vec<_> = (0..9).map(|_| (None, "x")).collect();
        assert!(Poll::from_input(&input("Pick", &nine)).is_err());
    }

    #[test]
    fn relabel_after_voting_keeps_ids_and_counts() {
        let post = poll_post(&[0, 0]);
        let voted = apply_vote(&post, &post.id, "opt-0", &VisitorState::default(), Utc::now())
            .unwrap()
            .post;

        let revised = poll_of(&voted)
            .revise(&input("Renamed", &[(Some("opt-1"), "Second"), (Some("opt-0"), "First")]))
            .unwrap();
        assert_eq!(revised.question, "Renamed");
        assert_eq!(revised.options[1].id, "opt-0");
        assert_eq!(revised.options[1].text, "First");
        assert_eq!(revised.options[1].votes, 1);
        assert_eq!(revised.voters.len(), 1);

        let err = poll_of(&voted)
            .revise(&input("Q", &[(Some("opt-0"), "A"), (Some("opt-1"), "B"), (None, "C")]))
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidPollEdit(_)));
    }

    #[test]
    fn options_can_change_before_voting() {
        let post = poll_post(&[0, 0]);
        let revised = poll_of(&post)
            .revise(&input("Q", &[(Some("opt-0"), "Kept"), (None, "New"), (None, "Newer")]))
            .unwrap();

        assert_eq!(revised.options.len(), 3);
        assert_eq!(revised.options[0].id, "opt-0");
        assert!(revised.options[1].id != "opt-1");
    }
}
