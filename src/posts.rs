//! Handlers for posts kept in the document store.

use axum::{
    Json,
    extract::{Extension, Form, FromRequest, Path, Query, Request},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::Cookies;

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult, PollError};
use crate::media::validate_key;
use crate::polls::{PollInput, PollResults, apply_vote, poll_results, voter_report};
use crate::sse::{PollEvent, PollEventSender, PollUpdate};
use crate::startup::AppState;
use crate::store::StoreError;
use crate::store::models::{Poll, Post};
use crate::store::posts::{StoredPost, new_post_id};
use crate::views::apply_unique_view;
use crate::visitor::VisitorState;

const MAX_TITLE_CHARS: usize = 200;

/// A post as shown to visitors: poll tallies instead of the voter log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPost {
    pub id: String,
    pub title: String,
    pub category: String,
    pub tag: String,
    pub body: String,
    pub images: Vec<String>,
    pub poll: Option<PollResults>,
    pub views: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

impl From<&Post> for PublicPost {
    fn from(post: &Post) -> Self {
        PublicPost {
            id: post.id.clone(),
            title: post.title.clone(),
            category: post.category.clone(),
            tag: post.tag.clone(),
            body: post.body.clone(),
            images: post.images.clone(),
            poll: post.poll.as_ref().map(poll_results),
            views: post.views,
            created_at: post.created_at,
            updated_at: post.updated_at,
            created_by: post.created_by.clone(),
            updated_by: post.updated_by.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default, alias = "option_id")]
    pub option_id: String,
}

/// Accepts the vote as JSON or as an urlencoded form post.
impl<S> FromRequest<S> for VoteRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(vote) = Form::<VoteRequest>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(vote)
        } else {
            let Json(vote) = Json::<VoteRequest>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(vote)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub poll: Option<PollInput>,
}

impl PostInput {
    fn validate(&self) -> AppResult<()> {
        let title = self.title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::BadRequest(format!(
                "Title is required and must be at most {MAX_TITLE_CHARS} characters"
            )));
        }
        for image in &self.images {
            validate_key(image)?;
        }
        Ok(())
    }
}

async fn load_or_404(app_state: &AppState, id: &str) -> AppResult<StoredPost> {
    app_state
        .posts
        .load_post(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}

fn require_writes(app_state: &AppState) -> AppResult<()> {
    if app_state.posts.can_write() {
        Ok(())
    } else {
        Err(AppError::NotConfigured(
            "Post storage has no write credential configured".to_string(),
        ))
    }
}

pub async fn list_posts(
    Extension(app_state): Extension<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let matches = |wanted: &Option<String>, value: &str| {
        wanted
            .as_deref()
            .is_none_or(|wanted| wanted.eq_ignore_ascii_case(value))
    };

    let posts: Vec<_> = app_state
        .posts
        .list()
        .await?
        .into_iter()
        .filter(|post| matches(&query.category, &post.category) && matches(&query.tag, &post.tag))
        .collect();

    Ok(Json(json!({ "ok": true, "posts": posts })))
}

/// Returns the post and counts the view once per browser.
///
/// Without a write credential views are neither stored nor remembered in
/// the cookie.
pub async fn get_post(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let StoredPost { mut post, revision } = load_or_404(&app_state, &id).await?;
    let visitor = VisitorState::from_cookies(&cookies, app_state.cookie_policy());

    if app_state.posts.can_write() {
        let outcome = apply_unique_view(&post, &id, &visitor);
        if outcome.incremented {
            let saved = app_state
                .posts
                .save_post_and_index(&outcome.post, Some(&revision), &format!("Count view of {id}"))
                .await;

            let counted = match saved {
                Ok(_) => true,
                Err(e @ StoreError::PartiallyApplied { .. }) => {
                    warn!(post_id = %id, "view stored but index not refreshed: {}", e);
                    true
                }
                Err(e) => {
                    warn!(post_id = %id, "view was not recorded: {}", e);
                    false
                }
            };

            if counted {
                if let Some(cookie) = outcome.cookie {
                    cookies.add(cookie);
                }
                debug!(post_id = %id, views = outcome.post.views, "view counted");
                post = outcome.post;
            }
        }
    }

    let voted_option_id = visitor.vote_for(&id).map(str::to_string);

    Ok(Json(json!({
        "ok": true,
        "post": PublicPost::from(&post),
        "votedOptionId": voted_option_id,
    })))
}

pub async fn vote(
    Extension(app_state): Extension<AppState>,
    Extension(poll_tx): Extension<PollEventSender>,
    cookies: Cookies,
    Path(id): Path<String>,
    vote: VoteRequest,
) -> AppResult<impl IntoResponse> {
    require_writes(&app_state)?;

    let StoredPost { post, revision } = load_or_404(&app_state, &id).await?;
    let visitor = VisitorState::from_cookies(&cookies, app_state.cookie_policy());
    let outcome = apply_vote(&post, &id, &vote.option_id, &visitor, Utc::now())?;

    let saved = app_state
        .posts
        .save_post_and_index(&outcome.post, Some(&revision), &format!("Record vote on {id}"))
        .await;

    // Once the document holds the vote the browser must remember it, even if
    // the index lagged behind.
    if matches!(saved, Ok(_) | Err(StoreError::PartiallyApplied { .. })) {
        cookies.add(outcome.vote_cookie);
        if let Some(cookie) = outcome.visitor_cookie {
            cookies.add(cookie);
        }
    }
    saved?;

    let poll = outcome
        .post
        .poll
        .as_ref()
        .ok_or(PollError::PollNotConfigured)?;
    let results = poll_results(poll);
    debug!(post_id = %id, option_id = %vote.option_id, total = results.total_votes, "vote recorded");

    // Nobody listening is fine.
    let _ = poll_tx.send(PollEvent::VoteRecorded(PollUpdate {
        post_id: id.clone(),
        results: results.clone(),
    }));

    Ok(Json(json!({ "ok": true, "poll": results })))
}

pub async fn poll_voters(
    _admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let StoredPost { post, .. } = load_or_404(&app_state, &id).await?;
    let poll = post.poll.ok_or(PollError::PollNotConfigured)?;

    Ok(Json(json!({
        "ok": true,
        "question": poll.question,
        "voters": voter_report(&poll),
    })))
}

pub async fn create_post(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Json(input): Json<PostInput>,
) -> AppResult<impl IntoResponse> {
    require_writes(&app_state)?;
    input.validate()?;

    let poll = input.poll.as_ref().map(Poll::from_input).transpose()?;
    let now = Utc::now();
    let title = input.title.trim().to_string();

    let post = Post {
        id: new_post_id(&title),
        title,
        category: input.category.trim().to_string(),
        tag: input.tag.trim().to_string(),
        body: input.body,
        images: input.images,
        poll,
        views: 0,
        created_at: now,
        updated_at: now,
        created_by: admin.login.clone(),
        updated_by: admin.login.clone(),
    };

    app_state
        .posts
        .save_post_and_index(&post, None, &format!("Create post {}", post.id))
        .await?;
    info!(post_id = %post.id, login = %admin.login, "post created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "post": PublicPost::from(&post) })),
    ))
}

/// Replaces the editable fields. Omitting `poll` removes the poll.
pub async fn update_post(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Extension(poll_tx): Extension<PollEventSender>,
    Path(id): Path<String>,
    Json(input): Json<PostInput>,
) -> AppResult<impl IntoResponse> {
    require_writes(&app_state)?;
    input.validate()?;

    let StoredPost { mut post, revision } = load_or_404(&app_state, &id).await?;

    let poll = match (&post.poll, &input.poll) {
        (_, None) => None,
        (Some(existing), Some(edit)) => Some(existing.revise(edit)?),
        (None, Some(edit)) => Some(Poll::from_input(edit)?),
    };
    let poll_removed = post.poll.is_some() && poll.is_none();

    let dropped_images: Vec<String> = post
        .images
        .iter()
        .filter(|image| !input.images.contains(image))
        .cloned()
        .collect();

    post.title = input.title.trim().to_string();
    post.category = input.category.trim().to_string();
    post.tag = input.tag.trim().to_string();
    post.body = input.body;
    post.images = input.images;
    post.poll = poll;
    post.updated_at = Utc::now();
    post.updated_by = admin.login.clone();

    app_state
        .posts
        .save_post_and_index(&post, Some(&revision), &format!("Update post {id}"))
        .await?;
    info!(post_id = %id, login = %admin.login, "post updated");

    for key in &dropped_images {
        if let Err(e) = app_state.media.delete(key).await {
            warn!(post_id = %id, image = %key, "image cleanup failed: {}", e);
        }
    }
    if poll_removed {
        let _ = poll_tx.send(PollEvent::PollRemoved(id.clone()));
    }

    Ok(Json(json!({ "ok": true, "post": PublicPost::from(&post) })))
}

pub async fn delete_post(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Extension(poll_tx): Extension<PollEventSender>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_writes(&app_state)?;

    let stored = load_or_404(&app_state, &id).await?;
    app_state
        .posts
        .delete_post(&stored, app_state.media.as_ref(), &format!("Delete post {id}"))
        .await?;
    info!(post_id = %id, login = %admin.login, "post deleted");

    if stored.post.poll.is_some() {
        let _ = poll_tx.send(PollEvent::PollRemoved(id));
    }

    Ok(Json(json!({ "ok": true })))
}
