use crate::db::connection::DbPool;
use crate::db::models::{Article, ArticleChanges, Lang, NewArticle, Section};
use crate::db::repositories::tag_repository::replace_article_tags;
use sqlx::Error;

const ARTICLE_COLUMNS: &str = "id, slug, lang, section, title, summary, body, cover_key, status, \
     view_count, is_deleted, deleted_at, created_at, updated_at";

/// Published, non-deleted articles, newest first.
pub async fn list_published(
    pool: &DbPool,
    lang: Lang,
    section: Section,
    tag: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Article>, Error> {
    let sql = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles a
         WHERE lang = $1 AND section = $2 AND status = 'published' AND is_deleted = FALSE
           AND ($3::TEXT IS NULL OR EXISTS (
               SELECT 1 FROM article_tags t WHERE t.article_id = a.id AND t.tag_slug = $3
           ))
         ORDER BY created_at DESC
         LIMIT $4 OFFSET $5"
    );

    sqlx::query_as::<_, Article>(&sql)
        .bind(lang.as_str())
        .bind(section.as_str())
        .bind(tag)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

pub async fn get_published(
    pool: &DbPool,
    lang: Lang,
    section: Section,
    slug: &str,
) -> Result<Option<Article>, Error> {
    let sql = format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles
         WHERE lang = $1 AND section = $2 AND slug = $3
           AND status = 'published' AND is_deleted = FALSE"
    );

    sqlx::query_as::<_, Article>(&sql)
        .bind(lang.as_str())
        .bind(section.as_str())
        .bind(slug)
        .fetch_optional(pool)
        .await
}

/// Any non-deleted article, drafts included.
pub async fn get_article(pool: &DbPool, id: i64) -> Result<Option<Article>, Error> {
    let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1 AND is_deleted = FALSE");

    sqlx::query_as::<_, Article>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Single-statement increment; concurrent views cannot lose updates.
pub async fn increment_view_count(pool: &DbPool, id: i64) -> Result<Option<i64>, Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "UPDATE articles SET view_count = view_count + 1
         WHERE id = $1 AND is_deleted = FALSE
         RETURNING view_count",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(count,)| count))
}

pub async fn create_article(
    pool: &DbPool,
    article: &NewArticle,
    tags: &[String],
) -> Result<Article, Error> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        "INSERT INTO articles (slug, lang, section, title, summary, body, cover_key, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {ARTICLE_COLUMNS}"
    );
    let created = sqlx::query_as::<_, Article>(&sql)
        .bind(&article.slug)
        .bind(article.lang.as_str())
        .bind(article.section.as_str())
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.body)
        .bind(&article.cover_key)
        .bind(article.status.as_str())
        .fetch_one(&mut *tx)
        .await?;

    replace_article_tags(&mut *tx, created.id, tags).await?;

    tx.commit().await?;
    Ok(created)
}

/// Applies `changes`; `tags` replaces the tag set when given.
pub async fn update_article(
    pool: &DbPool,
    id: i64,
    changes: &ArticleChanges,
    tags: Option<&[String]>,
) -> Result<Option<Article>, Error> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        "UPDATE articles
         SET slug = COALESCE($1, slug),
             title = COALESCE($2, title),
             summary = COALESCE($3, summary),
             body = COALESCE($4, body),
             cover_key = COALESCE($5, cover_key),
             status = COALESCE($6, status),
             updated_at = CURRENT_TIMESTAMP
         WHERE id = $7 AND is_deleted = FALSE
         RETURNING {ARTICLE_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, Article>(&sql)
        .bind(&changes.slug)
        .bind(&changes.title)
        .bind(&changes.summary)
        .bind(&changes.body)
        .bind(&changes.cover_key)
        .bind(changes.status.map(|status| status.as_str()))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(updated) = updated else {
        tx.rollback().await?;
        return Ok(None);
    };

    if let Some(tags) = tags {
        replace_article_tags(&mut *tx, id, tags).await?;
    }

    tx.commit().await?;
    Ok(Some(updated))
}

/// Marks the article deleted; returns false when it was already gone.
pub async fn soft_delete_article(pool: &DbPool, id: i64) -> Result<bool, Error> {
    let result = sqlx::query(
        "UPDATE articles SET is_deleted = TRUE, deleted_at = CURRENT_TIMESTAMP
         WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
