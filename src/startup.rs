use crate::articles;
use crate::auth;
use crate::config::Config;
use crate::db::connection::{DbPool, get_pool_stats};
use crate::media::{self, LocalMediaStore, MediaStore};
use crate::posts;
use crate::sse::{PollEventSender, poll_updates_sse};
use crate::store::{DocumentStore, GithubDocumentStore, MemoryDocumentStore, PostStore, StoreError};
use crate::visitor::CookiePolicy;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension},
    http::{
        Method, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tower_cookies::CookieManagerLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted image upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub posts: Arc<PostStore>,
    pub media: Arc<dyn MediaStore>,
}

impl AppState {
    /// Wires the stores described by `config`. Posts live in the GitHub
    /// repository when one is configured and in memory otherwise.
    pub fn new(config: Config, db: DbPool) -> Result<Self, StoreError> {
        let documents: Arc<dyn DocumentStore> = match &config.github {
            Some(github) => {
                info!(repo = %github.repo, branch = %github.branch, "posts stored in GitHub");
                Arc::new(GithubDocumentStore::new(
                    github.repo.clone(),
                    github.branch.clone(),
                    github.token.clone(),
                )?)
            }
            None => {
                warn!("GITHUB_REPO not set, posts are kept in memory only");
                Arc::new(MemoryDocumentStore::new())
            }
        };

        if !documents.can_write() {
            warn!("no write credential for posts: views are not counted and voting is disabled");
        }

        let media_base = format!("{}/media", config.public_base_url.trim_end_matches('/'));
        let media: Arc<dyn MediaStore> =
            Arc::new(LocalMediaStore::new(config.media_dir.clone(), media_base));

        Ok(Self::from_parts(config, db, documents, media))
    }

    pub fn from_parts(
        config: Config,
        db: DbPool,
        documents: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        let posts = Arc::new(PostStore::new(documents, config.posts_prefix.clone()));
        AppState {
            config: Arc::new(config),
            db,
            posts,
            media,
        }
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy {
            secure: self.config.cookie_secure,
        }
    }
}

/// Keeps an eye on the pool so outages show up in the logs before requests fail.
pub fn spawn_pool_health_check(db: DbPool) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match db.acquire().await {
                Ok(conn) => {
                    drop(conn);
                    debug!("{}", get_pool_stats(&db));
                }
                Err(e) => {
                    error!("Database connection health check failed: {}", e);
                }
            }
        }
    });
}

pub fn build_router(app_state: AppState, poll_tx: PollEventSender) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/api/posts/{id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/api/posts/{id}/poll/vote", post(posts::vote))
        .route("/api/posts/{id}/poll/voters", get(posts::poll_voters))
        .route("/api/posts/{id}/poll/stream", get(poll_updates_sse))
        .route(
            "/api/articles",
            get(articles::list_articles).post(articles::create_article),
        )
        .route(
            "/api/articles/{id}",
            get(articles::admin_get_article)
                .put(articles::update_article)
                .delete(articles::delete_article),
        )
        .route(
            "/api/articles/{lang}/{section}/{slug}",
            get(articles::get_article_page),
        )
        .route("/api/tags", get(articles::list_tags))
        .route(
            "/api/media",
            post(media::upload_media).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/media/{*key}", get(media::serve_media))
        .route(
            "/api/admin/session",
            get(auth::current).post(auth::login).delete(auth::logout),
        )
        .fallback(handler_404)
        .layer(Extension(app_state))
        .layer(Extension(poll_tx))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, ACCEPT, AUTHORIZATION]),
        )
}

async fn health(Extension(app_state): Extension<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "postsWritable": app_state.posts.can_write(),
        "pool": get_pool_stats(&app_state.db),
    }))
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": "nothing to see here", "code": "NOT_FOUND" })),
    )
}
