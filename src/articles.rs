//! Handlers for articles kept in Postgres.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tower_cookies::Cookies;

use crate::auth::AdminUser;
use crate::db::models::{ArticleChanges, ArticleStatus, Lang, NewArticle, Section, tag_slug};
use crate::db::repositories::{
    create_article as insert_article, get_article, get_published, increment_view_count,
    list_published, list_tags as select_tags, soft_delete_article, tags_for_article,
    update_article as apply_article_changes,
};
use crate::error::{AppError, AppResult};
use crate::media::validate_key;
use crate::startup::AppState;
use crate::store::posts::slugify;
use crate::views::article_view_cookie;
use crate::visitor::VisitorState;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_TITLE_CHARS: usize = 255;
/// Width of the `tags.slug` and `tags.name` columns.
const MAX_TAG_CHARS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ArticleQuery {
    pub lang: Lang,
    pub section: Section,
    pub tag: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub slug: Option<String>,
    pub lang: Lang,
    pub section: Section,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub body: String,
    pub cover_key: Option<String>,
    #[serde(default)]
    pub status: ArticleStatus,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleUpdate {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub cover_key: Option<String>,
    pub status: Option<ArticleStatus>,
    pub tags: Option<Vec<String>>,
}

fn validate_title(title: &str) -> AppResult<()> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::BadRequest(format!(
            "Title is required and must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_slug(slug: &str) -> AppResult<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 200
        && slug.chars().all(|c| c.is_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid slug: {slug}")))
    }
}

fn validate_tags(tags: &[String]) -> AppResult<()> {
    for tag in tags {
        let name = tag.trim();
        let slug = tag_slug(name);
        let too_long = name.chars().count() > MAX_TAG_CHARS || slug.chars().count() > MAX_TAG_CHARS;
        if slug.is_empty() || too_long {
            return Err(AppError::BadRequest(format!(
                "Tags must be non-empty and at most {MAX_TAG_CHARS} characters: {tag:?}"
            )));
        }
    }
    Ok(())
}

/// Turns the slug uniqueness violation into a 409.
fn slug_conflict(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            AppError::Conflict("An article with this slug already exists".to_string())
        }
        _ => e.into(),
    }
}

pub async fn list_articles(
    Extension(app_state): Extension<AppState>,
    Query(query): Query<ArticleQuery>,
) -> AppResult<impl IntoResponse> {
    let page = query.page.unwrap_or(1);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 || !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(AppError::BadRequest(format!(
            "page must be >= 1 and size between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let tag = query.tag.as_deref().map(tag_slug);
    let articles = list_published(
        &app_state.db,
        query.lang,
        query.section,
        tag.as_deref(),
        size,
        (page - 1) * size,
    )
    .await?;

    Ok(Json(json!({
        "ok": true,
        "articles": articles,
        "page": page,
        "size": size,
    })))
}

/// Public article page. The view counts once per browser, tracked by a
/// per-article cookie.
pub async fn get_article_page(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
    Path((lang, section, slug)): Path<(String, String, String)>,
) -> AppResult<impl IntoResponse> {
    let not_found = || AppError::NotFound("Article not found".to_string());
    let lang = Lang::parse(&lang).ok_or_else(not_found)?;
    let section = Section::parse(&section).ok_or_else(not_found)?;

    let mut article = get_published(&app_state.db, lang, section, &slug)
        .await?
        .ok_or_else(not_found)?;

    let visitor = VisitorState::from_cookies(&cookies, app_state.cookie_policy());
    if let Some(cookie) = article_view_cookie(article.id, &visitor) {
        if let Some(count) = increment_view_count(&app_state.db, article.id).await? {
            article.view_count = count;
            cookies.add(cookie);
        }
    }

    let tags = tags_for_article(&app_state.db, article.id).await?;

    Ok(Json(json!({ "ok": true, "article": article, "tags": tags })))
}

pub async fn list_tags(Extension(app_state): Extension<AppState>) -> AppResult<impl IntoResponse> {
    let tags = select_tags(&app_state.db).await?;
    Ok(Json(json!({ "ok": true, "tags": tags })))
}

/// Admin view by id, drafts included.
pub async fn admin_get_article(
    _admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let article = get_article(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Article not found".to_string()))?;
    let tags = tags_for_article(&app_state.db, id).await?;

    Ok(Json(json!({ "ok": true, "article": article, "tags": tags })))
}

pub async fn create_article(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Json(input): Json<ArticleInput>,
) -> AppResult<impl IntoResponse> {
    validate_title(&input.title)?;
    let slug = match input.slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => slug.to_lowercase(),
        _ => slugify(&input.title),
    };
    validate_slug(&slug)?;
    validate_tags(&input.tags)?;
    if let Some(key) = &input.cover_key {
        validate_key(key)?;
    }

    let article = NewArticle {
        slug,
        lang: input.lang,
        section: input.section,
        title: input.title.trim().to_string(),
        summary: input.summary,
        body: input.body,
        cover_key: input.cover_key,
        status: input.status,
    };

    let created = insert_article(&app_state.db, &article, &input.tags)
        .await
        .map_err(slug_conflict)?;
    info!(article_id = created.id, slug = %created.slug, login = %admin.login, "article created");

    let tags = tags_for_article(&app_state.db, created.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "article": created, "tags": tags })),
    ))
}

pub async fn update_article(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<ArticleUpdate>,
) -> AppResult<impl IntoResponse> {
    if let Some(title) = &input.title {
        validate_title(title)?;
    }
    let slug = input.slug.as_deref().map(|slug| slug.trim().to_lowercase());
    if let Some(slug) = &slug {
        validate_slug(slug)?;
    }
    if let Some(tags) = &input.tags {
        validate_tags(tags)?;
    }
    if let Some(key) = &input.cover_key {
        validate_key(key)?;
    }

    let previous = get_article(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Article not found".to_string()))?;

    let changes = ArticleChanges {
        slug,
        title: input.title.map(|title| title.trim().to_string()),
        summary: input.summary,
        body: input.body,
        cover_key: input.cover_key,
        status: input.status,
    };

    let updated = apply_article_changes(&app_state.db, id, &changes, input.tags.as_deref())
        .await
        .map_err(slug_conflict)?
        .ok_or_else(|| AppError::NotFound("Article not found".to_string()))?;
    info!(article_id = id, login = %admin.login, "article updated");

    if let Some(old_cover) = previous.cover_key {
        if updated.cover_key.as_deref() != Some(old_cover.as_str()) {
            if let Err(e) = app_state.media.delete(&old_cover).await {
                warn!(article_id = id, key = %old_cover, "cover cleanup failed: {}", e);
            }
        }
    }

    let tags = tags_for_article(&app_state.db, id).await?;
    Ok(Json(json!({ "ok": true, "article": updated, "tags": tags })))
}

/// Soft delete. The row stays for audit; it drops out of every listing.
pub async fn delete_article(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    if !soft_delete_article(&app_state.db, id).await? {
        return Err(AppError::NotFound("Article not found".to_string()));
    }
    info!(article_id = id, login = %admin.login, "article deleted");

    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_limited_to_url_safe_characters() {
        assert!(validate_slug("hello-world").is_ok());
        assert!(validate_slug("안녕-세계").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("a/b").is_err());
        assert!(validate_slug("with space").is_err());
    }

    #[test]
    fn titles_must_be_present() {
        assert!(validate_title("  ").is_err());
        assert!(validate_title("Title").is_ok());
        assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
    }

    #[test]
    fn tags_must_fit_the_tag_columns() {
        let longest = "x".repeat(MAX_TAG_CHARS);
        let too_long = "x".repeat(MAX_TAG_CHARS + 1);
        let tags = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();

        assert!(validate_tags(&[]).is_ok());
        assert!(validate_tags(&tags(&["Rust", "게임 개발"])).is_ok());
        assert!(validate_tags(&tags(&[longest.as_str()])).is_ok());

        let err = validate_tags(&tags(&["Rust", too_long.as_str()])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(matches!(validate_tags(&tags(&["   "])), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn non_unique_errors_pass_through() {
        let err = slug_conflict(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(_)));
    }
}
