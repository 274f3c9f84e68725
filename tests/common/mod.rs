#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use ub_site::config::Config;
use ub_site::db::connection::lazy_pool;
use ub_site::media::LocalMediaStore;
use ub_site::sse::create_poll_broadcaster;
use ub_site::startup::{AppState, build_router};
use ub_site::store::MemoryDocumentStore;
use ub_site::store::models::{Poll, PollOption, Post, PostIndex};

pub const ADMIN_LOGIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse";
pub const JWT_SECRET: &str = "test-secret";
pub const POST_ID: &str = "hello-world-a1b2c3";
pub const PLAIN_POST_ID: &str = "no-poll-d4e5f6";

pub fn test_config(media_dir: &Path) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        // Never connected: the post and media routes do not touch Postgres.
        database_url: "postgres://localhost/ub_site_test".to_string(),
        public_base_url: "http://localhost:8080".to_string(),
        cookie_secure: false,
        jwt_secret: JWT_SECRET.to_string(),
        admin_login: ADMIN_LOGIN.to_string(),
        admin_password_hash: Some(bcrypt::hash(ADMIN_PASSWORD, 4).unwrap()),
        github: None,
        posts_prefix: "data/posts".to_string(),
        media_dir: media_dir.to_path_buf(),
    }
}

pub fn poll_post() -> Post {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    Post {
        id: POST_ID.to_string(),
        title: "Hello world".to_string(),
        category: "notes".to_string(),
        tag: "intro".to_string(),
        body: "First post".to_string(),
        images: vec![],
        poll: Some(Poll {
            question: "Tea or coffee?".to_string(),
            options: vec![
                PollOption {
                    id: "opt-tea".to_string(),
                    text: "Tea".to_string(),
                    votes: 0,
                },
                PollOption {
                    id: "opt-coffee".to_string(),
                    text: "Coffee".to_string(),
                    votes: 0,
                },
            ],
            voters: vec![],
        }),
        views: 0,
        created_at: at,
        updated_at: at,
        created_by: ADMIN_LOGIN.to_string(),
        updated_by: ADMIN_LOGIN.to_string(),
    }
}

pub fn plain_post() -> Post {
    let mut post = poll_post();
    post.id = PLAIN_POST_ID.to_string();
    post.title = "No poll here".to_string();
    post.category = "misc".to_string();
    post.poll = None;
    post
}

pub async fn seeded_store(store: MemoryDocumentStore) -> Arc<MemoryDocumentStore> {
    let posts = [poll_post(), plain_post()];
    for post in &posts {
        store
            .insert(
                &format!("data/posts/{}.json", post.id),
                &serde_json::to_string(post).unwrap(),
            )
            .await;
    }
    let index = PostIndex {
        posts: posts.iter().map(Post::summary).collect(),
    };
    store
        .insert("data/posts/index.json", &serde_json::to_string(&index).unwrap())
        .await;
    Arc::new(store)
}

pub struct TestApp {
    pub router: Router,
    pub documents: Arc<MemoryDocumentStore>,
    pub media_dir: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_store(MemoryDocumentStore::new()).await
    }

    pub async fn read_only() -> Self {
        Self::with_store(MemoryDocumentStore::read_only()).await
    }

    async fn with_store(store: MemoryDocumentStore) -> Self {
        let media_dir = tempfile::tempdir().unwrap();
        let config = test_config(media_dir.path());
        let db = lazy_pool(&config.database_url).unwrap();
        let documents = seeded_store(store).await;
        let media = Arc::new(LocalMediaStore::new(
            media_dir.path(),
            "http://localhost:8080/media",
        ));
        let app_state = AppState::from_parts(config, db, documents.clone(), media);
        let router = build_router(app_state, create_poll_broadcaster());

        TestApp {
            router,
            documents,
            media_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `name=value` pairs from every Set-Cookie header.
pub fn set_cookies(response: &Response<Body>) -> Vec<(String, String)> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn set_cookie_names(response: &Response<Body>) -> Vec<String> {
    set_cookies(response).into_iter().map(|(name, _)| name).collect()
}

/// Folds Set-Cookie headers into a Cookie header, like a browser would.
pub fn cookie_header(response: &Response<Body>, previous: Option<&str>) -> String {
    let mut jar: Vec<(String, String)> = previous
        .unwrap_or_default()
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    for (name, value) in set_cookies(response) {
        jar.retain(|(existing, _)| *existing != name);
        jar.push((name, value));
    }

    jar.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub async fn admin_cookie(app: &TestApp) -> String {
    let response = app
        .send(json_request(
            "POST",
            "/api/admin/session",
            serde_json::json!({ "login": ADMIN_LOGIN, "password": ADMIN_PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(response.status(), 200);
    cookie_header(&response, None)
}
