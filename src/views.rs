use tower_cookies::Cookie;

use crate::store::models::Post;
use crate::visitor::{ARTICLE_VIEW_COOKIE_PREFIX, VisitorState, visitor_cookie};

#[derive(Debug)]
pub struct ViewOutcome {
    pub post: Post,
    pub incremented: bool,
    /// Updated views cookie, only when the view was counted.
    pub cookie: Option<Cookie<'static>>,
}

/// Counts a view of `post_id` unless this browser already has it in its
/// views cookie. Nothing is written here; the caller persists `post` only
/// when `incremented` is set.
///
/// The cookie keeps the newest entries only, so a visitor who has read more
/// posts than it can hold may be counted again on an old post.
pub fn apply_unique_view(post: &Post, post_id: &str, visitor: &VisitorState) -> ViewOutcome {
    if visitor.has_viewed(post_id) {
        return ViewOutcome {
            post: post.clone(),
            incremented: false,
            cookie: None,
        };
    }

    let mut post = post.clone();
    post.views = post.views.saturating_add(1);

    ViewOutcome {
        post,
        incremented: true,
        cookie: Some(visitor.views_cookie_with(post_id)),
    }
}

pub fn article_view_cookie_name(article_id: i64) -> String {
    format!("{ARTICLE_VIEW_COOKIE_PREFIX}{article_id}")
}

/// Per-article sentinel cookie for the relational backend, `None` when this
/// browser already counted the article.
pub fn article_view_cookie(article_id: i64, visitor: &VisitorState) -> Option<Cookie<'static>> {
    if visitor.viewed_articles.contains(&article_id) {
        return None;
    }
    Some(visitor_cookie(
        article_view_cookie_name(article_id),
        "1".to_string(),
        visitor.policy,
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::visitor::{VIEWS_CAP, parse_viewed};

    fn post(views: u64) -> Post {
        let now = Utc::now();
        Post {
            id: "hello-abc123".into(),
            title: "Hello".into(),
            category: "blog".into(),
            tag: String::new(),
            body: String::new(),
            images: vec![],
            poll: None,
            views,
            created_at: now,
            updated_at: now,
            created_by: "admin".into(),
            updated_by: "admin".into(),
        }
    }

    #[test]
    fn first_view_increments_and_sets_cookie() {
        let visitor = VisitorState::default();
        let outcome = apply_unique_view(&post(4), "hello-abc123", &visitor);

        assert!(outcome.incremented);
        assert_eq!(outcome.post.views, 5);
        let cookie = outcome.cookie.unwrap();
        assert_eq!(parse_viewed(cookie.value()), ["hello-abc123"]);
    }

    #[test]
    fn repeat_view_with_same_cookie_is_not_counted() {
        let first = apply_unique_view(&post(0), "hello-abc123", &VisitorState::default());
        let visitor = VisitorState {
            viewed: parse_viewed(first.cookie.as_ref().unwrap().value()),
            ..Default::default()
        };

        let second = apply_unique_view(&first.post, "hello-abc123", &visitor);
        assert!(!second.incremented);
        assert!(second.cookie.is_none());
        assert_eq!(second.post.views, 1);
    }

    #[test]
    fn updated_timestamp_is_left_alone() {
        let original = post(0);
        let outcome = apply_unique_view(&original, "hello-abc123", &VisitorState::default());
        assert_eq!(outcome.post.updated_at, original.updated_at);
    }

    #[test]
    fn cookie_is_capped_after_many_views() {
        let visitor = VisitorState {
            viewed: (0..305).map(|i| format!("seen-{i}")).collect(),
            ..Default::default()
        };

        let outcome = apply_unique_view(&post(10), "hello-abc123", &visitor);
        let viewed = parse_viewed(outcome.cookie.unwrap().value());

        assert_eq!(viewed.len(), VIEWS_CAP);
        assert_eq!(viewed[0], "seen-6");
        assert_eq!(viewed[VIEWS_CAP - 1], "hello-abc123");
    }

    #[test]
    fn article_cookie_only_on_first_view() {
        let mut visitor = VisitorState::default();
        let cookie = article_view_cookie(42, &visitor).unwrap();
        assert_eq!(cookie.name(), "ub_post_view_42");
        assert_eq!(cookie.value(), "1");

        visitor.viewed_articles.insert(42);
        assert!(article_view_cookie(42, &visitor).is_none());
        assert!(article_view_cookie(43, &visitor).is_some());
    }
}
